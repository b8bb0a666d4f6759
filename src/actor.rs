//! Combatant state bundle

use crate::attribute::AttributeModel;
use crate::buff::BuffTable;
use crate::cooldown::CooldownTable;
use crate::error::{Result, SimError};
use crate::stats;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorId {
    Player,
    Target,
}

impl ActorId {
    #[inline(always)]
    pub fn opponent(self) -> Self {
        match self {
            ActorId::Player => ActorId::Target,
            ActorId::Target => ActorId::Player,
        }
    }
}

/// Everything one side of the fight owns
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: ActorId,
    pub attr: AttributeModel,
    pub buffs: BuffTable,
    pub cooldowns: CooldownTable,
    /// Learned skills: id -> level
    pub skills: BTreeMap<u32, u32>,
    /// Registered skill event ids
    pub triggers: BTreeSet<u32>,
    /// Owned recipes: (id, level)
    pub recipes: BTreeSet<(u32, u32)>,
    pub in_fight: bool,
}

impl Actor {
    pub fn new(id: ActorId, attr: AttributeModel) -> Self {
        Self {
            id,
            attr,
            buffs: BuffTable::new(id),
            cooldowns: CooldownTable::new(id),
            skills: BTreeMap::new(),
            triggers: BTreeSet::new(),
            recipes: BTreeSet::new(),
            in_fight: false,
        }
    }

    pub fn learn(&mut self, skill_id: u32, level: u32) {
        self.skills.insert(skill_id, level);
    }

    pub fn knows(&self, skill_id: u32) -> bool {
        self.skills.contains_key(&skill_id)
    }

    pub fn skill_level(&self, skill_id: u32) -> Result<u32> {
        self.skills
            .get(&skill_id)
            .copied()
            .ok_or(SimError::SkillNotLearned(skill_id))
    }

    #[inline(always)]
    pub fn haste(&self) -> i64 {
        self.attr.get(stats::FINAL_HASTE)
    }
}
