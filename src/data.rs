//! Static game data: skill, buff, cooldown, trigger, recipe and script rows
//!
//! Rows are loaded once from YAML/JSON tables and indexed into composite-key
//! maps. Lookups of unknown keys are configuration errors.

use crate::error::{Result, SimError};
use crate::scheduler::Tick;
use crate::stats::School;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// (id, level) key of a buff row and of a live buff instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuffKey {
    pub id: u32,
    pub level: u32,
}

impl BuffKey {
    pub fn new(id: u32, level: u32) -> Self {
        Self { id, level }
    }
}

impl fmt::Display for BuffKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.level)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuffKind {
    #[default]
    Ordinary,
    Dot,
    Hot,
}

/// Effect registered when a buff is applied and undone on expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BeginEffect {
    Attribute { stat: String, value: i64 },
    Script { script: String },
    Trigger { event: u32 },
    /// Grant a recipe for the buff's lifetime
    Recipe { id: u32, level: u32 },
}

/// Effect run on every periodic tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActiveEffect {
    /// Periodic damage; the figure itself is computed when the DOT is set
    CallDamage { school: School, damage_base: f64 },
    Script { script: String },
}

/// Effect run once when the buff ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndEffect {
    Script { script: String },
    ApplyBuff { id: u32, level: u32 },
}

fn one() -> u32 {
    1
}

fn tick_max() -> Tick {
    Tick::MAX
}

fn standard() -> String {
    "standard".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuffRow {
    pub id: u32,
    pub level: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: BuffKind,
    /// Periodic interval in ticks; 0 means the buff never ticks
    #[serde(default)]
    pub interval: Tick,
    #[serde(default)]
    pub min_interval: Tick,
    #[serde(default = "tick_max")]
    pub max_interval: Tick,
    /// Number of periodic ticks before expiry
    #[serde(default = "one")]
    pub count: u32,
    #[serde(default)]
    pub stackable: bool,
    #[serde(default = "one")]
    pub max_stack: u32,
    #[serde(default)]
    pub begin: Vec<BeginEffect>,
    #[serde(default)]
    pub active: Vec<ActiveEffect>,
    #[serde(default)]
    pub end: Vec<EndEffect>,
    /// Behavior whose `on_remove` runs when the buff ends
    #[serde(default)]
    pub on_remove: Option<String>,
}

impl BuffRow {
    pub fn key(&self) -> BuffKey {
        BuffKey::new(self.id, self.level)
    }

    /// DOT and HOT rows keep their timer when reapplied
    pub fn is_over_time(&self) -> bool {
        matches!(self.kind, BuffKind::Dot | BuffKind::Hot)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownRow {
    pub id: u32,
    pub duration: Tick,
    #[serde(default)]
    pub min_duration: Tick,
    #[serde(default = "tick_max")]
    pub max_duration: Tick,
}

/// One damage operation a skill deals on cast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageSpec {
    pub school: School,
    #[serde(default)]
    pub damage_base: f64,
    #[serde(default)]
    pub damage_rand: f64,
    #[serde(default)]
    pub channel_interval: f64,
    #[serde(default)]
    pub weapon_damage_percent: i64,
    #[serde(default)]
    pub surplus: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuffRef {
    pub id: u32,
    pub level: u32,
    /// Apply to the opponent instead of the caster
    #[serde(default)]
    pub on_target: bool,
    #[serde(default = "one")]
    pub stacks: u32,
    /// Overrides the first timer delay
    #[serde(default)]
    pub duration: Option<Tick>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DotSpec {
    pub buff_id: u32,
    pub buff_level: u32,
    pub school: School,
    pub channel_interval: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRef {
    pub id: u32,
    /// Defaults to the caster's learned level
    #[serde(default)]
    pub level: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayedCast {
    pub id: u32,
    #[serde(default)]
    pub level: Option<u32>,
    pub delay: Tick,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownDelta {
    pub id: u32,
    pub delta: Tick,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRow {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    /// Registered behavior resolving the cast
    #[serde(default = "standard")]
    pub script: String,
    /// School used for critical strike and critical damage power
    pub kind_school: School,
    #[serde(default)]
    pub need_out_of_fight: bool,
    #[serde(default)]
    pub recipe_type: Option<u32>,
    #[serde(default)]
    pub event_mask1: u32,
    #[serde(default)]
    pub event_mask2: u32,
    /// Cooldown slots, in recipe `cooldown_add` order
    #[serde(default)]
    pub cooldowns: Vec<u32>,
    /// The cast is skipped while this buff is active on the caster
    #[serde(default)]
    pub requires_absent_buff: Option<u32>,
    #[serde(default)]
    pub damage: Vec<DamageSpec>,
    #[serde(default)]
    pub buffs: Vec<BuffRef>,
    #[serde(default)]
    pub dot: Option<DotSpec>,
    #[serde(default)]
    pub casts: Vec<SkillRef>,
    #[serde(default)]
    pub delayed_casts: Vec<DelayedCast>,
    #[serde(default)]
    pub modify_cooldowns: Vec<CooldownDelta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPhase {
    PreCast,
    Cast,
    Hit,
    CriticalStrike,
}

/// Skill event: a chance to cast `skill_id` when a matching skill is cast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillEventRow {
    pub id: u32,
    pub phase: TriggerPhase,
    #[serde(default)]
    pub event_skill: Option<u32>,
    #[serde(default)]
    pub event_mask1: u32,
    #[serde(default)]
    pub event_mask2: u32,
    /// Out of 1024
    pub odds: u32,
    pub skill_id: u32,
    #[serde(default)]
    pub skill_level: Option<u32>,
}

impl SkillEventRow {
    pub fn matches(&self, skill: &SkillRow) -> bool {
        self.event_skill == Some(skill.id)
            || (self.event_mask1 & skill.event_mask1) != 0
            || (self.event_mask2 & skill.event_mask2) != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRow {
    pub id: u32,
    pub level: u32,
    #[serde(default)]
    pub skill_id: Option<u32>,
    #[serde(default)]
    pub recipe_type: Option<u32>,
    #[serde(default)]
    pub cooldown_add: [Tick; 3],
    #[serde(default)]
    pub damage_add_percent: Option<i64>,
    #[serde(default)]
    pub script: Option<String>,
}

impl RecipeRow {
    pub fn applies_to(&self, skill: &SkillRow) -> bool {
        self.skill_id == Some(skill.id)
            || (skill.recipe_type.is_some() && self.recipe_type == skill.recipe_type)
    }
}

/// Configuration of a named behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum ScriptDef {
    StatBonus { changes: BTreeMap<String, i64> },
    CastSkill { skill_id: u32, #[serde(default)] level: Option<u32> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRow {
    pub name: String,
    #[serde(flatten)]
    pub def: ScriptDef,
}

/// Raw table layout as written in scenario files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameDataFile {
    pub buffs: Vec<BuffRow>,
    pub cooldowns: Vec<CooldownRow>,
    pub skills: Vec<SkillRow>,
    pub skill_events: Vec<SkillEventRow>,
    pub recipes: Vec<RecipeRow>,
    pub scripts: Vec<ScriptRow>,
}

/// Indexed, read-only static data
#[derive(Debug, Clone, Default)]
pub struct GameData {
    buffs: HashMap<BuffKey, Arc<BuffRow>>,
    cooldowns: HashMap<u32, CooldownRow>,
    skills: HashMap<u32, Arc<SkillRow>>,
    skill_events: HashMap<u32, SkillEventRow>,
    recipes: BTreeMap<(u32, u32), RecipeRow>,
    scripts: BTreeMap<String, ScriptDef>,
}

fn index<K, V>(table: &'static str, rows: Vec<V>, key: impl Fn(&V) -> K) -> Result<HashMap<K, V>>
where
    K: std::hash::Hash + Eq + fmt::Debug,
{
    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        let k = key(&row);
        if map.contains_key(&k) {
            return Err(SimError::InvalidConfig(format!("duplicate {table} row {k:?}")));
        }
        map.insert(k, row);
    }
    Ok(map)
}

impl GameData {
    pub fn from_tables(file: GameDataFile) -> Result<Self> {
        let buffs = index("buff", file.buffs, |r| r.key())?
            .into_iter()
            .map(|(k, v)| (k, Arc::new(v)))
            .collect();
        let skills = index("skill", file.skills, |r| r.id)?
            .into_iter()
            .map(|(k, v)| (k, Arc::new(v)))
            .collect();
        let recipes = index("recipe", file.recipes, |r| (r.id, r.level))?
            .into_iter()
            .collect();
        let scripts = index("script", file.scripts, |r| r.name.clone())?
            .into_iter()
            .map(|(k, v)| (k, v.def))
            .collect();

        Ok(Self {
            buffs,
            cooldowns: index("cooldown", file.cooldowns, |r| r.id)?,
            skills,
            skill_events: index("skill event", file.skill_events, |r| r.id)?,
            recipes,
            scripts,
        })
    }

    /// Load tables from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let file: GameDataFile = if path.extension().map_or(false, |e| e == "json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Self::from_tables(file)
    }

    pub fn buff(&self, id: u32, level: u32) -> Result<Arc<BuffRow>> {
        self.buffs
            .get(&BuffKey::new(id, level))
            .cloned()
            .ok_or_else(|| SimError::unknown_row("buff", BuffKey::new(id, level)))
    }

    pub fn cooldown(&self, id: u32) -> Result<&CooldownRow> {
        self.cooldowns
            .get(&id)
            .ok_or_else(|| SimError::unknown_row("cooldown", id))
    }

    pub fn skill(&self, id: u32) -> Result<Arc<SkillRow>> {
        self.skills
            .get(&id)
            .cloned()
            .ok_or_else(|| SimError::unknown_row("skill", id))
    }

    pub fn skill_event(&self, id: u32) -> Result<&SkillEventRow> {
        self.skill_events
            .get(&id)
            .ok_or_else(|| SimError::unknown_row("skill event", id))
    }

    pub fn recipe(&self, id: u32, level: u32) -> Result<&RecipeRow> {
        self.recipes
            .get(&(id, level))
            .ok_or_else(|| SimError::unknown_row("recipe", format!("{id}:{level}")))
    }

    pub fn scripts(&self) -> impl Iterator<Item = (&str, &ScriptDef)> {
        self.scripts.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Owned recipes that modify `skill`
    pub fn recipes_for(
        &self,
        skill: &SkillRow,
        owned: &BTreeSet<(u32, u32)>,
    ) -> Result<Vec<&RecipeRow>> {
        let mut out = Vec::new();
        for (id, level) in owned {
            let recipe = self.recipe(*id, *level)?;
            if recipe.applies_to(skill) {
                out.push(recipe);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLES: &str = r#"
buffs:
  - id: 10
    level: 1
    kind: dot
    interval: 192
    count: 6
    active:
      - type: call_damage
        school: lunar
        damage_base: 30
  - id: 11
    level: 1
    begin:
      - type: attribute
        stat: haste_percent
        value: 50
cooldowns:
  - id: 1
    duration: 1536
skills:
  - id: 100
    kind_school: solar
    recipe_type: 4
    cooldowns: [1]
    damage:
      - school: solar
        damage_base: 50
        channel_interval: 96
recipes:
  - id: 900
    level: 1
    recipe_type: 4
    damage_add_percent: 51
  - id: 901
    level: 1
    skill_id: 999
scripts:
  - name: bonus
    behavior: stat_bonus
    changes:
      solar_attack_power_percent: 102
"#;

    #[test]
    fn test_load_and_lookup() {
        let file: GameDataFile = serde_yaml::from_str(TABLES).unwrap();
        let data = GameData::from_tables(file).unwrap();

        let dot = data.buff(10, 1).unwrap();
        assert!(dot.is_over_time());
        assert_eq!(dot.max_interval, Tick::MAX);
        assert_eq!(data.buff(11, 1).unwrap().count, 1);
        assert_eq!(data.skill(100).unwrap().script, "standard");
        assert_eq!(data.cooldown(1).unwrap().duration, 1536);

        let err = data.buff(10, 2).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_recipes_match_by_type_or_skill() {
        let file: GameDataFile = serde_yaml::from_str(TABLES).unwrap();
        let data = GameData::from_tables(file).unwrap();
        let skill = data.skill(100).unwrap();
        let owned: BTreeSet<(u32, u32)> = [(900, 1), (901, 1)].into_iter().collect();
        let recipes = data.recipes_for(&skill, &owned).unwrap();
        assert_eq!(recipes.len(), 1);
        assert_eq!(recipes[0].damage_add_percent, Some(51));
    }

    #[test]
    fn test_duplicate_rows_rejected() {
        let mut file: GameDataFile = serde_yaml::from_str(TABLES).unwrap();
        let dup = file.cooldowns[0].clone();
        file.cooldowns.push(dup);
        assert!(matches!(
            GameData::from_tables(file),
            Err(SimError::InvalidConfig(_))
        ));
    }
}
