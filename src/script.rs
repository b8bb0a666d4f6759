//! Action behaviors and their registry
//!
//! Skills and scripted buff modifiers resolve to an [`ActionBehavior`] by
//! name. Behaviors are registered explicitly at startup: the built-in
//! `standard` skill behavior plus one entry per `scripts` row of the static
//! data. Every entry point is optional; calling one a behavior lacks is a
//! contract error.

use crate::actor::ActorId;
use crate::damage::SourceArgs;
use crate::data::{BuffKey, GameData, ScriptDef, SkillRow};
use crate::error::{Result, SimError};
use crate::scheduler::Tick;
use crate::simulation::Simulation;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Per-cast inputs handed to [`ActionBehavior::cast`]
#[derive(Debug, Clone)]
pub struct SkillContext {
    pub caster: ActorId,
    pub target: ActorId,
    pub skill: Arc<SkillRow>,
    pub level: u32,
    /// Recipe cooldown additions, one per cooldown slot
    pub cooldown_add: [Tick; 3],
}

fn missing(name: &str, entry: &'static str) -> SimError {
    SimError::MissingEntryPoint {
        script: name.to_string(),
        entry,
    }
}

pub trait ActionBehavior: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve a cast. `None` means no damage was dealt.
    fn cast(&self, _sim: &mut Simulation, _ctx: &SkillContext) -> Result<Option<Vec<SourceArgs>>> {
        Err(missing(self.name(), "cast"))
    }

    /// Buff modifier added
    fn apply(&self, _sim: &mut Simulation, _actor: ActorId) -> Result<()> {
        Err(missing(self.name(), "apply"))
    }

    /// Buff modifier removed
    fn unapply(&self, _sim: &mut Simulation, _actor: ActorId) -> Result<()> {
        Err(missing(self.name(), "unapply"))
    }

    /// Buff carrying this behavior as its `on_remove` ended
    fn on_remove(&self, _sim: &mut Simulation, _actor: ActorId, _buff: BuffKey) -> Result<()> {
        Err(missing(self.name(), "on_remove"))
    }
}

/// Data-driven skill: everything it does is read from the skill row
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardSkill;

impl ActionBehavior for StandardSkill {
    fn name(&self) -> &str {
        "standard"
    }

    fn cast(&self, sim: &mut Simulation, ctx: &SkillContext) -> Result<Option<Vec<SourceArgs>>> {
        let skill = &ctx.skill;
        if let Some(buff) = skill.requires_absent_buff {
            if sim.actor(ctx.caster).buffs.is_active(buff, None) {
                return Ok(None);
            }
        }

        for (slot, id) in skill.cooldowns.iter().enumerate() {
            let extra = ctx.cooldown_add.get(slot).copied().unwrap_or(0);
            sim.set_cooldown(ctx.caster, *id, extra)?;
        }
        for buff in &skill.buffs {
            let target = if buff.on_target { ctx.target } else { ctx.caster };
            sim.add_buff(ctx.caster, target, buff.id, buff.level, buff.stacks, buff.duration)?;
        }
        if let Some(dot) = &skill.dot {
            sim.set_dot(ctx.caster, ctx.target, dot, skill, ctx.level)?;
        }
        for change in &skill.modify_cooldowns {
            sim.modify_cooldown(ctx.caster, change.id, change.delta)?;
        }
        for follow in &skill.casts {
            sim.cast_skill(ctx.caster, follow.id, follow.level)?;
        }
        for delayed in &skill.delayed_casts {
            sim.schedule_cast(ctx.caster, delayed.id, delayed.level, delayed.delay)?;
        }

        if skill.damage.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            skill
                .damage
                .iter()
                .map(|spec| SourceArgs::from_spec(skill, ctx.level, spec))
                .collect(),
        ))
    }
}

/// Adds stat changes on `apply` and takes them back on `unapply`
#[derive(Debug, Clone)]
pub struct StatBonus {
    name: String,
    changes: BTreeMap<String, i64>,
}

impl StatBonus {
    pub fn new(name: impl Into<String>, changes: BTreeMap<String, i64>) -> Self {
        Self {
            name: name.into(),
            changes,
        }
    }

    fn shift(&self, sim: &mut Simulation, actor: ActorId, sign: i64) -> Result<()> {
        let attr = &mut sim.actor_mut(actor).attr;
        for (stat, value) in &self.changes {
            attr.add(stat, sign * value)?;
        }
        Ok(())
    }
}

impl ActionBehavior for StatBonus {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, sim: &mut Simulation, actor: ActorId) -> Result<()> {
        self.shift(sim, actor, 1)
    }

    fn unapply(&self, sim: &mut Simulation, actor: ActorId) -> Result<()> {
        self.shift(sim, actor, -1)
    }
}

/// Casts a skill when applied or when its buff ends
#[derive(Debug, Clone)]
pub struct CastOnEvent {
    name: String,
    skill_id: u32,
    level: Option<u32>,
}

impl CastOnEvent {
    pub fn new(name: impl Into<String>, skill_id: u32, level: Option<u32>) -> Self {
        Self {
            name: name.into(),
            skill_id,
            level,
        }
    }
}

impl ActionBehavior for CastOnEvent {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, sim: &mut Simulation, actor: ActorId) -> Result<()> {
        sim.cast_skill(actor, self.skill_id, self.level)
    }

    fn on_remove(&self, sim: &mut Simulation, actor: ActorId, _buff: BuffKey) -> Result<()> {
        sim.cast_skill(actor, self.skill_id, self.level)
    }
}

#[derive(Clone, Default)]
pub struct ScriptRegistry {
    behaviors: HashMap<String, Arc<dyn ActionBehavior>>,
}

impl fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.behaviors.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ScriptRegistry").field("behaviors", &names).finish()
    }
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("standard", Arc::new(StandardSkill));
        registry
    }

    /// Built-ins plus every script defined in `data`
    pub fn from_data(data: &GameData) -> Self {
        let mut registry = Self::with_builtins();
        for (name, def) in data.scripts() {
            let behavior: Arc<dyn ActionBehavior> = match def {
                ScriptDef::StatBonus { changes } => Arc::new(StatBonus::new(name, changes.clone())),
                ScriptDef::CastSkill { skill_id, level } => {
                    Arc::new(CastOnEvent::new(name, *skill_id, *level))
                }
            };
            registry.register(name, behavior);
        }
        registry
    }

    /// Register `behavior` under `name`, returning any behavior it replaces
    pub fn register(
        &mut self,
        name: impl Into<String>,
        behavior: Arc<dyn ActionBehavior>,
    ) -> Option<Arc<dyn ActionBehavior>> {
        self.behaviors.insert(name.into(), behavior)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ActionBehavior>> {
        self.behaviors
            .get(name)
            .cloned()
            .ok_or_else(|| SimError::UnregisteredScript(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.behaviors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::GameDataFile;
    use crate::error::ErrorKind;

    #[test]
    fn test_registry_from_data() {
        let file: GameDataFile = serde_yaml::from_str(
            r#"
scripts:
  - name: sun_bonus
    behavior: stat_bonus
    changes:
      solar_attack_power_percent: 102
  - name: echo
    behavior: cast_skill
    skill_id: 42
"#,
        )
        .unwrap();
        let data = GameData::from_tables(file).unwrap();
        let registry = ScriptRegistry::from_data(&data);

        assert_eq!(registry.len(), 3);
        assert!(registry.contains("standard"));
        assert_eq!(registry.get("echo").unwrap().name(), "echo");

        let err = registry.get("nope").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Contract);
    }

    #[test]
    fn test_missing_entry_point_names_script() {
        let err = missing("sun_bonus", "on_remove");
        assert_eq!(err.to_string(), "behavior `sun_bonus` has no `on_remove` entry point");
        assert_eq!(err.kind(), ErrorKind::Contract);
    }
}
