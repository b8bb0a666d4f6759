//! Configuration structures for loading scenario YAML/JSON files

use crate::actor::{Actor, ActorId};
use crate::attribute::AttributeModel;
use crate::damage::DamagePipeline;
use crate::data::{GameData, GameDataFile};
use crate::error::Result;
use crate::replay::{fingerprint, LogStore, ReplayLog};
use crate::rotation::{Command, Rotation};
use crate::script::ScriptRegistry;
use crate::sensitivity::{default_perturbations, Perturbation};
use crate::simulation::{RunOutcome, SimOptions, Simulation};
use crate::stats::{install_conversions, standard_model, Conversion, LevelParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// One side of the fight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterConfig {
    pub level: i64,
    #[serde(default)]
    pub is_npc: bool,
    /// Stat values set before the fight
    #[serde(default)]
    pub stats: BTreeMap<String, i64>,
    #[serde(default)]
    pub conversions: Vec<Conversion>,
    /// Learned skills: id -> level
    #[serde(default)]
    pub skills: BTreeMap<u32, u32>,
    /// Owned recipes as (id, level)
    #[serde(default)]
    pub recipes: Vec<(u32, u32)>,
    /// Skill events registered for the whole fight
    #[serde(default)]
    pub triggers: Vec<u32>,
}

/// Fight definition: the action list and its options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FightConfig {
    pub ping_ms: i64,
    /// Cooldown id of the global cooldown
    pub gcd: u32,
    /// Names of action lists, walked in order
    pub sequence: Vec<String>,
    pub lists: BTreeMap<String, Vec<String>>,
    pub normal_skills: BTreeMap<String, u32>,
    pub special_skills: BTreeMap<String, u32>,
    pub commands: BTreeMap<String, Command>,
    /// Skills cast at tick 0 before the first action
    pub opening: Vec<u32>,
    /// Player stat values set before the opening
    pub initial: BTreeMap<String, i64>,
    /// Cooldown id -> skill cast when that cooldown expires
    pub on_cooldown_ready: BTreeMap<u32, u32>,
    /// Skill events that only register when `procs_enabled`
    pub random_procs: Vec<u32>,
    pub procs_enabled: bool,
    pub seed: Option<u64>,
}

/// Everything a recorded log depends on. Sensitivity settings are left out:
/// they only change how the log is replayed.
#[derive(Serialize)]
struct RecordedInputs<'a> {
    data: &'a GameDataFile,
    player: &'a CharacterConfig,
    target: &'a CharacterConfig,
    env: &'a BTreeMap<String, i64>,
    params: &'a LevelParams,
    fight: &'a FightConfig,
}

fn default_reference() -> String {
    "attack".to_string()
}

/// Full scenario file: static data, both characters and the fight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub data: GameDataFile,
    pub player: CharacterConfig,
    pub target: CharacterConfig,
    /// Persistent player stat additions (gear, food, enchants)
    #[serde(default)]
    pub env: BTreeMap<String, i64>,
    pub fight: FightConfig,
    #[serde(default)]
    pub params: LevelParams,
    #[serde(default = "default_perturbations")]
    pub sensitivity: Vec<Perturbation>,
    #[serde(default = "default_reference")]
    pub reference: String,
}

impl Scenario {
    /// Load a scenario from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let path_str = path.as_ref().to_string_lossy().to_lowercase();

        if path_str.ends_with(".json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(serde_yaml::from_str(&content)?)
        }
    }

    pub fn game_data(&self) -> Result<GameData> {
        GameData::from_tables(self.data.clone())
    }

    pub fn pipeline(&self) -> DamagePipeline {
        DamagePipeline::new(self.params)
    }

    fn model(&self, character: &CharacterConfig, env: bool) -> Result<AttributeModel> {
        let mut m = standard_model(character.level, character.is_npc, self.params);
        install_conversions(&mut m, &character.conversions)?;
        for (stat, value) in &character.stats {
            m.set(stat, *value)?;
        }
        if env {
            for (stat, value) in &self.env {
                m.add(stat, *value)?;
            }
        }
        Ok(m)
    }

    pub fn build_player(&self) -> Result<AttributeModel> {
        self.model(&self.player, true)
    }

    pub fn build_target(&self) -> Result<AttributeModel> {
        self.model(&self.target, false)
    }

    /// Fresh (player, target) pair, as the fight starts
    pub fn build_models(&self) -> Result<(AttributeModel, AttributeModel)> {
        Ok((self.build_player()?, self.build_target()?))
    }

    fn actor(&self, id: ActorId, character: &CharacterConfig, data: &GameData) -> Result<Actor> {
        let attr = self.model(character, id == ActorId::Player)?;
        let mut actor = Actor::new(id, attr);
        for (skill, level) in &character.skills {
            data.skill(*skill)?;
            actor.learn(*skill, *level);
        }
        for (recipe, level) in &character.recipes {
            data.recipe(*recipe, *level)?;
            actor.recipes.insert((*recipe, *level));
        }
        let procs: &[u32] = if id == ActorId::Player && self.fight.procs_enabled {
            self.fight.random_procs.as_slice()
        } else {
            &[]
        };
        for event in character.triggers.iter().chain(procs) {
            data.skill_event(*event)?;
            actor.triggers.insert(*event);
        }
        Ok(actor)
    }

    /// Simulation ready to run this scenario's fight. The seed falls back to
    /// the fight's own seed.
    pub fn build_simulation(&self, options: SimOptions) -> Result<Simulation> {
        let data = Arc::new(self.game_data()?);
        let scripts = Arc::new(ScriptRegistry::from_data(&data));
        for skill in self.fight.normal_skills.values().chain(self.fight.special_skills.values()) {
            data.skill(*skill)?;
        }
        let player = self.actor(ActorId::Player, &self.player, &data)?;
        let target = self.actor(ActorId::Target, &self.target, &data)?;
        let options = SimOptions {
            seed: options.seed.or(self.fight.seed),
            ..options
        };
        Ok(Simulation::new(data, scripts, player, target, self.pipeline(), options))
    }

    pub fn rotation(&self) -> Result<Rotation> {
        Rotation::from_config(&self.fight)
    }

    /// Run the fight to completion
    pub fn run(&self, options: SimOptions) -> Result<RunOutcome> {
        let mut sim = self.build_simulation(options)?;
        sim.run(self.rotation()?)?;
        Ok(sim.finish())
    }

    /// Cache key of this scenario's recorded log
    pub fn fingerprint(&self) -> Result<String> {
        fingerprint(&RecordedInputs {
            data: &self.data,
            player: &self.player,
            target: &self.target,
            env: &self.env,
            params: &self.params,
            fight: &self.fight,
        })
    }

    /// Logs are reusable only when nothing in the fight is random
    pub fn is_cacheable(&self) -> bool {
        !self.fight.procs_enabled
    }

    /// Recorded log of this fight, taken from `store` when one was saved
    /// under the scenario's fingerprint.
    pub fn recorded_log(&self, store: Option<&LogStore>, seed: Option<u64>) -> Result<ReplayLog> {
        let store = store.filter(|_| self.is_cacheable());
        let fp = self.fingerprint()?;
        if let Some(store) = store {
            if let Some(log) = store.load(&fp)? {
                info!(fingerprint = %fp, records = log.len(), "using cached log");
                return Ok(log);
            }
        }

        let outcome = self.run(SimOptions { record: true, seed })?;
        let log = outcome.log.unwrap_or_default();
        if let Some(store) = store {
            store.save(&fp, &log)?;
        }
        Ok(log)
    }
}
