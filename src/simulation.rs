//! Per-run simulation context
//!
//! A [`Simulation`] owns everything one run mutates: the scheduler, both
//! actors, the damage ledger and, when recording, the replay log. Nothing is
//! global, so a baseline run and any number of replays can execute side by
//! side on different threads.
//!
//! Events are plain data. [`Simulation::step`] pops the earliest one and
//! dispatches it here, so handlers are free to schedule or cancel more events.

use crate::actor::{Actor, ActorId};
use crate::buff::{ActiveHook, DotSource, EndHook};
use crate::damage::{DamageFigure, DamageLedger, DamagePipeline, LedgerSink, SourceArgs, SourceKeys, CHANCE_SCALE};
use crate::data::{ActiveEffect, BeginEffect, BuffKey, BuffRow, DotSpec, EndEffect, GameData, SkillEventRow, SkillRow, TriggerPhase};
use crate::error::{Result, SimError};
use crate::replay::{LogRecord, ReplayLog};
use crate::rotation::Rotation;
use crate::scheduler::{Scheduler, Tick, TICKS_PER_FRAME};
use crate::script::{ActionBehavior, ScriptRegistry, SkillContext};
use crate::stats;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Fast RNG wrapper for proc rolls
#[derive(Debug, Clone)]
pub struct FastRng {
    inner: fastrand::Rng,
}

impl FastRng {
    #[inline(always)]
    pub fn new(seed: u64) -> Self {
        Self {
            inner: fastrand::Rng::with_seed(seed),
        }
    }

    /// Uniform in `0..n`
    #[inline(always)]
    pub fn below(&mut self, n: u32) -> u32 {
        self.inner.u32(..n)
    }
}

/// Everything the scheduler can hold
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    BuffTick { actor: ActorId, key: BuffKey },
    CooldownReady { actor: ActorId, id: u32 },
    NextAction,
    CastSkill {
        caster: ActorId,
        skill_id: u32,
        level: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimOptions {
    /// Log every damage computation for later replay
    pub record: bool,
    /// Proc RNG seed; random when unset
    pub seed: Option<u64>,
}

/// What a finished run hands back
#[derive(Debug)]
pub struct RunOutcome {
    pub ledger: DamageLedger,
    pub log: Option<ReplayLog>,
    pub end_tick: Tick,
}

impl RunOutcome {
    /// Fight duration, measured to the tick the run stopped at
    pub fn elapsed(&self) -> Tick {
        self.end_tick
    }

    pub fn dps(&self) -> f64 {
        self.ledger.dps(self.elapsed())
    }
}

/// `channel_interval` scale of a DOT spread over the buff's whole duration
pub fn dot_interval_cof(row: &BuffRow) -> f64 {
    let count = row.count.max(1) as i64;
    let total_frames = count * row.interval / TICKS_PER_FRAME;
    (total_frames / 12).max(16) as f64 / 16.0 / count as f64
}

/// Recipe modifiers that apply to one skill cast
struct RecipeEffects {
    cooldown_add: [Tick; 3],
    damage_add: i64,
    scripts: Vec<Arc<dyn ActionBehavior>>,
}

fn ensure_player(caster: ActorId) -> Result<()> {
    if caster == ActorId::Player {
        Ok(())
    } else {
        Err(SimError::InvalidConfig(format!(
            "{caster:?} cannot deal damage; only the player's output is simulated"
        )))
    }
}

pub struct Simulation {
    sched: Scheduler<SimEvent>,
    player: Actor,
    target: Actor,
    data: Arc<GameData>,
    scripts: Arc<ScriptRegistry>,
    pipeline: DamagePipeline,
    ledger: DamageLedger,
    log: Option<ReplayLog>,
    keys: SourceKeys,
    rng: FastRng,
    cast_queue: VecDeque<(ActorId, u32, Option<u32>)>,
    draining: bool,
    rotation: Option<Rotation>,
}

impl Simulation {
    pub fn new(
        data: Arc<GameData>,
        scripts: Arc<ScriptRegistry>,
        mut player: Actor,
        mut target: Actor,
        pipeline: DamagePipeline,
        options: SimOptions,
    ) -> Self {
        let seed = options.seed.unwrap_or_else(rand::random::<u64>);
        player.attr.set_recording(options.record);
        target.attr.set_recording(options.record);
        debug!(seed, record = options.record, "simulation created");

        Self {
            sched: Scheduler::new(),
            player,
            target,
            data,
            scripts,
            pipeline,
            ledger: DamageLedger::new(),
            log: options.record.then(ReplayLog::new),
            keys: SourceKeys::default(),
            rng: FastRng::new(seed),
            cast_queue: VecDeque::new(),
            draining: false,
            rotation: None,
        }
    }

    /// Publish every landed hit to `sink` as well
    pub fn with_sink(mut self, sink: Box<dyn LedgerSink>) -> Self {
        self.ledger = DamageLedger::with_sink(sink);
        self
    }

    #[inline(always)]
    pub fn now(&self) -> Tick {
        self.sched.now()
    }

    pub fn data(&self) -> &GameData {
        &self.data
    }

    pub fn scheduler(&self) -> &Scheduler<SimEvent> {
        &self.sched
    }

    pub fn ledger(&self) -> &DamageLedger {
        &self.ledger
    }

    pub fn log(&self) -> Option<&ReplayLog> {
        self.log.as_ref()
    }

    pub fn actor(&self, id: ActorId) -> &Actor {
        match id {
            ActorId::Player => &self.player,
            ActorId::Target => &self.target,
        }
    }

    pub fn actor_mut(&mut self, id: ActorId) -> &mut Actor {
        match id {
            ActorId::Player => &mut self.player,
            ActorId::Target => &mut self.target,
        }
    }

    fn parts(&mut self, id: ActorId) -> (&mut Actor, &mut Scheduler<SimEvent>) {
        let actor = match id {
            ActorId::Player => &mut self.player,
            ActorId::Target => &mut self.target,
        };
        (actor, &mut self.sched)
    }

    pub fn rotation(&self) -> Option<&Rotation> {
        self.rotation.as_ref()
    }

    // Driving

    /// Dispatch the earliest pending event. False when nothing is pending.
    pub fn step(&mut self) -> Result<bool> {
        let Some((tick, event)) = self.sched.step() else {
            return Ok(false);
        };
        trace!(tick, ?event, "dispatch");
        self.dispatch(tick, event)?;
        Ok(true)
    }

    /// Step until the queue is empty
    pub fn run_until_idle(&mut self) -> Result<()> {
        while self.step()? {}
        Ok(())
    }

    /// Drive `rotation` until its list is exhausted or nothing is pending.
    pub fn run(&mut self, mut rotation: Rotation) -> Result<()> {
        rotation.start(self)?;
        self.rotation = Some(rotation);
        while !self.rotation.as_ref().map_or(true, Rotation::is_finished) {
            if !self.step()? {
                break;
            }
        }
        info!(
            tick = self.now(),
            hits = self.ledger.len(),
            total = self.ledger.total(),
            "run finished"
        );
        Ok(())
    }

    pub fn finish(self) -> RunOutcome {
        let end_tick = self.sched.now();
        let log = self.log.map(|mut log| {
            log.set_end_tick(end_tick);
            log
        });
        RunOutcome {
            end_tick,
            ledger: self.ledger,
            log,
        }
    }

    fn dispatch(&mut self, tick: Tick, event: SimEvent) -> Result<()> {
        match event {
            SimEvent::BuffTick { actor, key } => self.buff_tick(actor, key, tick),
            SimEvent::CooldownReady { actor, id } => {
                let cooldowns = &mut self.actor_mut(actor).cooldowns;
                // Not active at all means it was freed early by a modification
                if cooldowns.is_active(id) && !cooldowns.expire(id, tick) {
                    return Ok(());
                }
                debug!(?actor, cooldown = id, "cooldown ready");
                if actor == ActorId::Player {
                    self.with_rotation(|rotation, sim| rotation.on_cooldown_ready(sim, id))?;
                }
                Ok(())
            }
            SimEvent::NextAction => self.with_rotation(|rotation, sim| rotation.advance(sim)),
            SimEvent::CastSkill {
                caster,
                skill_id,
                level,
            } => self.cast_skill(caster, skill_id, level),
        }
    }

    fn with_rotation<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Rotation, &mut Simulation) -> Result<()>,
    {
        let Some(mut rotation) = self.rotation.take() else {
            return Ok(());
        };
        let result = f(&mut rotation, self);
        self.rotation = Some(rotation);
        result
    }

    pub fn schedule_next_action(&mut self, delay: Tick) -> Result<Tick> {
        self.sched.schedule(delay, SimEvent::NextAction)
    }

    pub fn schedule_cast(
        &mut self,
        caster: ActorId,
        skill_id: u32,
        level: Option<u32>,
        delay: Tick,
    ) -> Result<Tick> {
        self.sched.schedule(
            delay,
            SimEvent::CastSkill {
                caster,
                skill_id,
                level,
            },
        )
    }

    // Casting

    /// Queue a cast. Requests made while a cast is resolving run after it.
    pub fn cast_skill(&mut self, caster: ActorId, skill_id: u32, level: Option<u32>) -> Result<()> {
        self.cast_queue.push_back((caster, skill_id, level));
        if self.draining {
            return Ok(());
        }
        self.draining = true;
        let mut result = Ok(());
        while let Some((caster, skill_id, level)) = self.cast_queue.pop_front() {
            if let Err(e) = self.cast_now(caster, skill_id, level) {
                result = Err(e);
                break;
            }
        }
        self.cast_queue.clear();
        self.draining = false;
        result
    }

    /// Resolve a cast immediately. Returns false when the skill could not be
    /// cast right now (cooldown running, out-of-fight requirement unmet).
    pub fn cast_now(&mut self, caster: ActorId, skill_id: u32, level: Option<u32>) -> Result<bool> {
        let data = Arc::clone(&self.data);
        let skill = data.skill(skill_id)?;
        let level = match level {
            Some(level) => level,
            None => self.actor(caster).skill_level(skill_id)?,
        };

        let actor = self.actor(caster);
        if let Some(id) = skill.cooldowns.iter().find(|id| actor.cooldowns.is_active(**id)) {
            debug!(?caster, skill = skill_id, cooldown = *id, "skill on cooldown");
            return Ok(false);
        }
        if skill.need_out_of_fight && actor.in_fight {
            debug!(?caster, skill = skill_id, "skill needs out of fight");
            return Ok(false);
        }

        let mut triggers: Vec<SkillEventRow> = Vec::new();
        for id in &actor.triggers {
            let row = data.skill_event(*id)?;
            if row.matches(&skill) {
                triggers.push(row.clone());
            }
        }

        for row in triggers.iter().filter(|t| t.phase == TriggerPhase::PreCast) {
            self.roll_trigger(caster, row)?;
        }

        let recipes = self.recipe_effects(caster, &skill)?;
        let behavior = self.scripts.get(&skill.script)?;
        let ctx = SkillContext {
            caster,
            target: caster.opponent(),
            skill: Arc::clone(&skill),
            level,
            cooldown_add: recipes.cooldown_add,
        };
        debug!(?caster, skill = skill_id, level, tick = self.now(), "casting");
        let ops = behavior.cast(self, &ctx)?;

        if recipes.damage_add != 0 {
            self.actor_mut(caster)
                .attr
                .add(stats::ALL_DAMAGE_ADD_PERCENT, recipes.damage_add)?;
        }
        for script in &recipes.scripts {
            script.apply(self, caster)?;
        }

        let mut critical = false;
        if let Some(ops) = ops.filter(|ops| !ops.is_empty()) {
            ensure_player(caster)?;
            let mut chance = 0;
            for args in &ops {
                let source = self.compute_source(args);
                chance = source.critical_chance;
                self.land(&source);
            }
            self.player.in_fight = true;
            self.target.in_fight = true;
            critical = i64::from(self.rng.below(CHANCE_SCALE as u32)) < chance;
        }

        for row in &triggers {
            let fires = match row.phase {
                TriggerPhase::PreCast => false,
                TriggerPhase::Cast | TriggerPhase::Hit => true,
                TriggerPhase::CriticalStrike => critical,
            };
            if fires {
                self.roll_trigger(caster, row)?;
            }
        }

        for script in recipes.scripts.iter().rev() {
            script.unapply(self, caster)?;
        }
        if recipes.damage_add != 0 {
            self.actor_mut(caster)
                .attr
                .add(stats::ALL_DAMAGE_ADD_PERCENT, -recipes.damage_add)?;
        }
        Ok(true)
    }

    fn roll_trigger(&mut self, caster: ActorId, row: &SkillEventRow) -> Result<()> {
        if self.rng.below(1024) < row.odds {
            debug!(event = row.id, skill = row.skill_id, phase = ?row.phase, "skill event fired");
            self.cast_now(caster, row.skill_id, row.skill_level)?;
        }
        Ok(())
    }

    fn recipe_effects(&self, caster: ActorId, skill: &SkillRow) -> Result<RecipeEffects> {
        let mut effects = RecipeEffects {
            cooldown_add: [0; 3],
            damage_add: 0,
            scripts: Vec::new(),
        };
        for recipe in self.data.recipes_for(skill, &self.actor(caster).recipes)? {
            for (slot, add) in effects.cooldown_add.iter_mut().zip(recipe.cooldown_add) {
                *slot += add;
            }
            effects.damage_add += recipe.damage_add_percent.unwrap_or(0);
            if let Some(script) = &recipe.script {
                effects.scripts.push(self.scripts.get(script)?);
            }
        }
        Ok(effects)
    }

    // Damage

    fn compute_source(&mut self, args: &SourceArgs) -> DamageFigure {
        let tick = self.sched.now();
        let key = self.keys.next(tick, args.skill_id, args.level);
        if let Some(log) = self.log.as_mut() {
            log.push(LogRecord::Source {
                tick,
                attacker: self.player.attr.export_changes(),
                target: self.target.attr.export_changes(),
                key,
                args: args.clone(),
            });
        }
        self.pipeline.source(&self.player.attr, &self.target.attr, args, key)
    }

    fn land(&mut self, source: &DamageFigure) {
        let tick = self.sched.now();
        if let Some(log) = self.log.as_mut() {
            log.push(LogRecord::Mitigation {
                tick,
                attacker: self.player.attr.export_changes(),
                target: self.target.attr.export_changes(),
                source: source.key,
            });
        }
        let figure = self.pipeline.mitigate(&self.target.attr, source);
        trace!(tick, key = %figure.key, expected = figure.expected, "hit landed");
        self.ledger.record(tick, figure);
    }

    /// Apply a DOT buff on `owner` and fix its per-tick source figure now.
    pub fn set_dot(
        &mut self,
        caster: ActorId,
        owner: ActorId,
        dot: &DotSpec,
        skill: &SkillRow,
        level: u32,
    ) -> Result<()> {
        ensure_player(caster)?;
        self.add_buff(caster, owner, dot.buff_id, dot.buff_level, 1, None)?;

        let key = BuffKey::new(dot.buff_id, dot.buff_level);
        let row = self
            .actor(owner)
            .buffs
            .get(key)
            .map(|b| Arc::clone(&b.row))
            .ok_or(SimError::BuffNotActive {
                id: key.id,
                level: key.level,
            })?;
        let (kind_school, damage_base) = row
            .active
            .iter()
            .find_map(|e| match e {
                ActiveEffect::CallDamage {
                    school,
                    damage_base,
                } => Some((*school, *damage_base)),
                ActiveEffect::Script { .. } => None,
            })
            .ok_or_else(|| SimError::InvalidConfig(format!("buff {key} has no call_damage effect")))?;

        let args = SourceArgs {
            skill_id: skill.id,
            level,
            name: if row.name.is_empty() {
                skill.name.clone()
            } else {
                row.name.clone()
            },
            school: dot.school,
            kind_school,
            damage_base,
            damage_rand: 0.0,
            channel_interval: dot.channel_interval,
            weapon_damage_percent: 0,
            surplus: false,
            channel_interval_cof: dot_interval_cof(&row),
        };

        let scripts = self.recipe_effects(caster, skill)?.scripts;
        for script in &scripts {
            script.apply(self, caster)?;
        }
        let figure = self.compute_source(&args);
        for script in scripts.iter().rev() {
            script.unapply(self, caster)?;
        }
        debug!(buff = %key, key = %figure.key, "dot set");
        self.actor_mut(owner)
            .buffs
            .set_dot(key, DotSource { caster, figure })
    }

    fn call_dot(&mut self, owner: ActorId, key: BuffKey) -> Result<()> {
        let source = self
            .actor(owner)
            .buffs
            .get(key)
            .and_then(|b| b.dot.clone())
            .ok_or_else(|| SimError::MissingSource(format!("dot {key}")))?;
        self.land(&source.figure);
        Ok(())
    }

    // Buffs

    /// Apply buff `(id, level)` from `caster` onto `owner`. The periodic
    /// interval is hasted by the caster.
    pub fn add_buff(
        &mut self,
        caster: ActorId,
        owner: ActorId,
        id: u32,
        level: u32,
        stacks: u32,
        duration: Option<Tick>,
    ) -> Result<()> {
        let row = self.data.buff(id, level)?;
        let haste = self.actor(caster).haste();
        let (actor, sched) = self.parts(owner);
        let released = actor
            .buffs
            .apply(Arc::clone(&row), caster, stacks, haste, duration, sched)?;
        self.run_end_hooks(owner, row.key(), released)?;
        self.attach_effects(owner, &row)
    }

    fn attach_effects(&mut self, owner: ActorId, row: &BuffRow) -> Result<()> {
        let key = row.key();
        if let Some(script) = &row.on_remove {
            self.scripts.get(script)?;
            self.actor_mut(owner)
                .buffs
                .push_end_hook(key, EndHook::OnRemove(script.clone()))?;
        }

        for effect in &row.begin {
            let hook = match effect {
                BeginEffect::Attribute { stat, value } => {
                    self.actor_mut(owner).attr.add(stat, *value)?;
                    EndHook::RemoveAttribute {
                        stat: stat.clone(),
                        value: *value,
                    }
                }
                BeginEffect::Script { script } => {
                    let behavior = self.scripts.get(script)?;
                    behavior.apply(self, owner)?;
                    EndHook::Unapply(script.clone())
                }
                BeginEffect::Trigger { event } => {
                    self.data.skill_event(*event)?;
                    self.actor_mut(owner).triggers.insert(*event);
                    EndHook::ForgetTrigger(*event)
                }
                BeginEffect::Recipe { id, level } => {
                    self.data.recipe(*id, *level)?;
                    self.actor_mut(owner).recipes.insert((*id, *level));
                    EndHook::ForgetRecipe {
                        id: *id,
                        level: *level,
                    }
                }
            };
            self.actor_mut(owner).buffs.push_end_hook(key, hook)?;
        }

        for effect in &row.active {
            let hook = match effect {
                ActiveEffect::CallDamage { .. } => ActiveHook::CallDamage,
                ActiveEffect::Script { script } => ActiveHook::Script(script.clone()),
            };
            self.actor_mut(owner).buffs.push_active_hook(key, hook)?;
        }

        for effect in &row.end {
            let hook = match effect {
                EndEffect::Script { script } => EndHook::Script(script.clone()),
                EndEffect::ApplyBuff { id, level } => EndHook::ApplyBuff(BuffKey::new(*id, *level)),
            };
            self.actor_mut(owner).buffs.push_end_hook(key, hook)?;
        }
        Ok(())
    }

    fn run_end_hooks(&mut self, owner: ActorId, key: BuffKey, hooks: Vec<EndHook>) -> Result<()> {
        for hook in hooks {
            match hook {
                EndHook::RemoveAttribute { stat, value } => {
                    self.actor_mut(owner).attr.add(&stat, -value)?;
                }
                EndHook::Unapply(script) => {
                    let behavior = self.scripts.get(&script)?;
                    behavior.unapply(self, owner)?;
                }
                EndHook::OnRemove(script) => {
                    let behavior = self.scripts.get(&script)?;
                    behavior.on_remove(self, owner, key)?;
                }
                EndHook::ForgetTrigger(event) => {
                    self.actor_mut(owner).triggers.remove(&event);
                }
                EndHook::ForgetRecipe { id, level } => {
                    self.actor_mut(owner).recipes.remove(&(id, level));
                }
                EndHook::Script(script) => {
                    let behavior = self.scripts.get(&script)?;
                    behavior.apply(self, owner)?;
                }
                EndHook::ApplyBuff(next) => {
                    self.add_buff(owner, owner, next.id, next.level, 1, None)?;
                }
            }
        }
        Ok(())
    }

    fn buff_tick(&mut self, owner: ActorId, key: BuffKey, tick: Tick) -> Result<()> {
        let Some(hooks) = self.actor(owner).buffs.fire(key, tick) else {
            return Ok(());
        };
        for hook in hooks {
            match hook {
                ActiveHook::CallDamage => self.call_dot(owner, key)?,
                ActiveHook::Script(script) => {
                    let behavior = self.scripts.get(&script)?;
                    behavior.apply(self, owner)?;
                }
            }
        }
        let (actor, sched) = self.parts(owner);
        if let Some(hooks) = actor.buffs.advance(key, tick, sched)? {
            self.run_end_hooks(owner, key, hooks)?;
        }
        Ok(())
    }

    /// Remove buff `id` (optionally one level) from `owner` and run its end hooks
    pub fn remove_buff(&mut self, owner: ActorId, id: u32, level: Option<u32>, all: bool) -> Result<()> {
        let (actor, sched) = self.parts(owner);
        let released = actor.buffs.remove(id, level, all, sched)?;
        for (key, hooks) in released {
            self.run_end_hooks(owner, key, hooks)?;
        }
        Ok(())
    }

    // Cooldowns

    /// Start cooldown `id`, hasted by the actor's own haste
    pub fn set_cooldown(&mut self, actor: ActorId, id: u32, extra: Tick) -> Result<Tick> {
        let data = Arc::clone(&self.data);
        let row = data.cooldown(id)?;
        let (actor, sched) = self.parts(actor);
        let haste = actor.haste();
        actor.cooldowns.setcd(row, extra, haste, sched)
    }

    /// Shift a running cooldown. Freeing it early still delivers its ready event.
    pub fn modify_cooldown(&mut self, actor: ActorId, id: u32, delta: Tick) -> Result<()> {
        let (owner, sched) = self.parts(actor);
        let was_active = owner.cooldowns.is_active(id);
        if owner.cooldowns.modify(id, delta, sched)?.is_none() && was_active {
            self.sched.schedule(0, SimEvent::CooldownReady { actor, id })?;
        }
        Ok(())
    }
}
