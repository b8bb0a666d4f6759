//! Scripted action-list driver
//!
//! The fight definition names lists of actions; the driver walks their
//! concatenation in order. Normal skills sit on the global cooldown and the
//! driver only moves on when it expires. Special skills and commands run
//! immediately and the walk continues.

use crate::actor::ActorId;
use crate::config::FightConfig;
use crate::error::{Result, SimError};
use crate::scheduler::{ms, Tick};
use crate::simulation::Simulation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Non-skill rotation entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Drop a buff from the player
    RemoveBuff {
        id: u32,
        #[serde(default)]
        level: Option<u32>,
        #[serde(default)]
        all: bool,
    },
    /// Off-GCD cast of a learned skill (or any skill at an explicit level)
    Cast {
        skill_id: u32,
        #[serde(default)]
        level: Option<u32>,
    },
    /// Hold the rotation for a number of ticks
    Wait { ticks: Tick },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Normal(u32),
    Special(u32),
    Command(Command),
}

fn resolve(fight: &FightConfig, name: &str) -> Result<Action> {
    if let Some(id) = fight.normal_skills.get(name) {
        return Ok(Action::Normal(*id));
    }
    if let Some(id) = fight.special_skills.get(name) {
        return Ok(Action::Special(*id));
    }
    if let Some(cmd) = fight.commands.get(name) {
        return Ok(Action::Command(cmd.clone()));
    }
    Err(SimError::InvalidConfig(format!("unknown action `{name}`")))
}

#[derive(Debug, Clone)]
pub struct Rotation {
    actions: Vec<(String, Action)>,
    cursor: usize,
    gcd: u32,
    ping: Tick,
    on_cooldown_ready: BTreeMap<u32, u32>,
    opening: Vec<u32>,
    initial: BTreeMap<String, i64>,
    /// A NextAction event is pending
    waiting: bool,
}

impl Rotation {
    pub fn from_config(fight: &FightConfig) -> Result<Self> {
        let mut actions = Vec::new();
        for list in &fight.sequence {
            let names = fight
                .lists
                .get(list)
                .ok_or_else(|| SimError::InvalidConfig(format!("unknown action list `{list}`")))?;
            for name in names {
                actions.push((name.clone(), resolve(fight, name)?));
            }
        }
        if fight.ping_ms < 0 {
            return Err(SimError::InvalidConfig(format!("negative ping {}ms", fight.ping_ms)));
        }

        Ok(Self {
            actions,
            cursor: 0,
            gcd: fight.gcd,
            ping: ms(fight.ping_ms),
            on_cooldown_ready: fight.on_cooldown_ready.clone(),
            opening: fight.opening.clone(),
            initial: fight.initial.clone(),
            waiting: false,
        })
    }

    pub fn actions(&self) -> &[(String, Action)] {
        &self.actions
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.actions.len()
    }

    /// Initial stats, opening casts, then the first action
    pub fn start(&mut self, sim: &mut Simulation) -> Result<()> {
        let player = sim.actor_mut(ActorId::Player);
        for (stat, value) in &self.initial {
            player.attr.set(stat, *value)?;
        }
        for id in &self.opening {
            sim.cast_skill(ActorId::Player, *id, None)?;
        }
        self.advance(sim)
    }

    fn wait(&mut self, sim: &mut Simulation, delay: Tick) -> Result<()> {
        self.waiting = true;
        sim.schedule_next_action(delay)?;
        Ok(())
    }

    /// Walk the list until a normal skill is cast or something must be waited for.
    pub fn advance(&mut self, sim: &mut Simulation) -> Result<()> {
        self.waiting = false;
        while let Some((name, action)) = self.actions.get(self.cursor).cloned() {
            match action {
                Action::Normal(id) => {
                    let now = sim.now();
                    let skill = sim.data().skill(id)?;
                    let cooldowns = &sim.actor(ActorId::Player).cooldowns;
                    if skill.cooldowns.iter().any(|c| cooldowns.is_active(*c)) {
                        let ready = cooldowns.get_max_expiry(&skill.cooldowns);
                        debug!(action = %name, ready, "waiting on cooldown");
                        return self.wait(sim, ready - now + self.ping.max(1));
                    }

                    sim.cast_skill(ActorId::Player, id, None)?;
                    self.cursor += 1;
                    if !sim.actor(ActorId::Player).cooldowns.is_active(self.gcd) {
                        warn!(action = %name, tick = now, "cast did not start the global cooldown, skipping");
                        return self.wait(sim, self.ping.max(1));
                    }
                    return Ok(());
                }
                Action::Special(id) => {
                    sim.cast_skill(ActorId::Player, id, None)?;
                    self.cursor += 1;
                }
                Action::Command(Command::Wait { ticks }) => {
                    self.cursor += 1;
                    return self.wait(sim, ticks);
                }
                Action::Command(cmd) => {
                    self.execute(sim, &name, &cmd)?;
                    self.cursor += 1;
                }
            }
        }
        Ok(())
    }

    fn execute(&mut self, sim: &mut Simulation, name: &str, cmd: &Command) -> Result<()> {
        match cmd {
            Command::RemoveBuff { id, level, all } => {
                sim.remove_buff(ActorId::Player, *id, *level, *all)
            }
            Command::Cast { skill_id, level } => {
                if level.is_none() && !sim.actor(ActorId::Player).knows(*skill_id) {
                    warn!(action = %name, skill = skill_id, "skill not learned, skipping");
                    return Ok(());
                }
                sim.cast_skill(ActorId::Player, *skill_id, *level)
            }
            Command::Wait { ticks } => self.wait(sim, *ticks),
        }
    }

    /// Player cooldown `id` expired
    pub fn on_cooldown_ready(&mut self, sim: &mut Simulation, id: u32) -> Result<()> {
        if id == self.gcd && !self.waiting && !self.is_finished() {
            self.wait(sim, self.ping)?;
        }
        if let Some(skill) = self.on_cooldown_ready.get(&id) {
            debug!(cooldown = id, skill, "recast on cooldown ready");
            sim.cast_skill(ActorId::Player, *skill, None)?;
        }
        Ok(())
    }
}
