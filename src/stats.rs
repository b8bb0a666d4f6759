//! Standard stat catalogue
//!
//! Declares every stat a combatant carries, tags its kind, and installs the
//! derived formulas that turn ratings into final percentages. All rating
//! conversions are integer arithmetic in 1024ths or basis points.

use crate::attribute::{AttributeModel, StatKind};
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Damage school. Everything except physics is magic and also reads the shared `magic_*` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum School {
    Physics,
    Solar,
    Lunar,
    Neutral,
    Poison,
}

impl School {
    pub const ALL: [School; 5] = [
        School::Physics,
        School::Solar,
        School::Lunar,
        School::Neutral,
        School::Poison,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            School::Physics => "physics",
            School::Solar => "solar",
            School::Lunar => "lunar",
            School::Neutral => "neutral",
            School::Poison => "poison",
        }
    }

    #[inline(always)]
    pub fn is_magic(self) -> bool {
        self != School::Physics
    }

    /// Divisor of attack power in the source phase
    pub fn attack_divisor(self) -> f64 {
        if self.is_magic() {
            12.0
        } else {
            10.0
        }
    }
}

impl fmt::Display for School {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Primary attributes
pub const SPUNK: &str = "spunk_base";
pub const STRENGTH: &str = "strength_base";
pub const AGILITY: &str = "agility_base";
pub const SPIRIT: &str = "spirit_base";
pub const VITALITY: &str = "vitality_base";

// Shared ratings and percents
pub const ALL_CRITICAL_STRIKE: &str = "all_critical_strike";
pub const ALL_CRITICAL_DAMAGE_POWER: &str = "all_critical_damage_power_base";
pub const SURPLUS: &str = "surplus_value_base";
pub const STRAIN: &str = "strain_base";
pub const STRAIN_PERCENT: &str = "strain_percent";
pub const STRAIN_RATE: &str = "strain_rate";
pub const HASTE: &str = "haste_base";
pub const HASTE_PERCENT: &str = "haste_percent";
pub const UNLIMITED_HASTE_PERCENT: &str = "unlimited_haste_percent";
pub const WEAPON_DAMAGE: &str = "weapon_damage_base";
pub const WEAPON_DAMAGE_RAND: &str = "weapon_damage_rand";
pub const PHYSICS_SHIELD_ADDITIONAL: &str = "physics_shield_additional";
pub const ALL_DAMAGE_ADD_PERCENT: &str = "all_damage_add_percent";
pub const ALL_MAGIC_DAMAGE_ADD_PERCENT: &str = "all_magic_damage_add_percent";
pub const DST_MOVE_STATE_DAMAGE_ADD: &str = "add_damage_by_dst_move_state";
pub const ALL_SHIELD_IGNORE_PERCENT: &str = "all_shield_ignore_percent";
pub const DST_NPC_DAMAGE_COEFFICIENT: &str = "dst_npc_damage_coefficient";

// Finals not split by school
pub const FINAL_STRAIN: &str = "final_strain";
pub const FINAL_HASTE: &str = "final_haste";
pub const FINAL_SURPLUS: &str = "final_surplus";

/// Per-school and shared-magic stat names
pub mod name {
    use super::School;

    fn magic_or(school: &str, suffix: &str) -> String {
        format!("{school}_{suffix}")
    }

    pub fn attack_power_base(s: &str) -> String {
        magic_or(s, "attack_power_base")
    }
    pub fn attack_power_percent(s: &str) -> String {
        magic_or(s, "attack_power_percent")
    }
    pub fn attack_power_bonus(s: School) -> String {
        magic_or(s.as_str(), "attack_power_bonus")
    }
    pub fn critical_strike(s: &str) -> String {
        magic_or(s, "critical_strike")
    }
    pub fn critical_strike_rate(s: School) -> String {
        magic_or(s.as_str(), "critical_strike_rate")
    }
    pub fn critical_strike_bonus(s: School) -> String {
        magic_or(s.as_str(), "critical_strike_bonus")
    }
    pub fn critical_damage_power(s: &str) -> String {
        magic_or(s, "critical_damage_power_base")
    }
    pub fn critical_damage_power_rate(s: &str) -> String {
        magic_or(s, "critical_damage_power_rate")
    }
    pub fn overcome_base(s: &str) -> String {
        magic_or(s, "overcome_base")
    }
    pub fn overcome_percent(s: School) -> String {
        magic_or(s.as_str(), "overcome_percent")
    }
    pub fn overcome_bonus(s: School) -> String {
        magic_or(s.as_str(), "overcome_bonus")
    }
    pub fn shield_base(s: &str) -> String {
        magic_or(s, "shield_base")
    }
    pub fn shield_percent(s: School) -> String {
        magic_or(s.as_str(), "shield_percent")
    }
    pub fn damage_coefficient(s: School) -> String {
        magic_or(s.as_str(), "damage_coefficient")
    }

    pub fn final_attack_power(s: School) -> String {
        format!("final_{s}_attack_power")
    }
    pub fn final_critical_strike(s: School) -> String {
        format!("final_{s}_critical_strike")
    }
    pub fn final_critical_damage_power(s: School) -> String {
        format!("final_{s}_critical_damage_power")
    }
    pub fn final_overcome(s: School) -> String {
        format!("final_{s}_overcome")
    }
    pub fn final_damage_add_percent(s: School) -> String {
        format!("final_{s}_damage_add_percent")
    }
}

/// Rating multipliers applied on top of the level coefficient
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelParams {
    pub critical_strike: f64,
    pub critical_damage_power: f64,
    pub overcome: f64,
    pub surplus: f64,
    pub strain: f64,
    pub haste: f64,
    pub physics_shield: f64,
    pub magic_shield: f64,
}

impl Default for LevelParams {
    fn default() -> Self {
        Self {
            critical_strike: 9.530,
            critical_damage_power: 3.335,
            overcome: 9.530,
            surplus: 0.0386,
            strain: 9.189,
            haste: 11.695,
            physics_shield: 5.091,
            magic_shield: 5.091,
        }
    }
}

/// Level coefficient shared by every rating conversion
pub fn level_cof(level: i64) -> i64 {
    match level {
        l if l <= 15 => 50,
        l if l <= 90 => 4 * l - 10,
        l if l <= 95 => 85 * (l - 90) + 350,
        l if l <= 100 => 185 * (l - 95) + 775,
        l if l <= 110 => 205 * (l - 100) + 1700,
        l if l <= 130 => 450 * (l - 110) + 3750,
        _ => 0,
    }
}

impl LevelParams {
    fn cof(level: i64, param: f64) -> f64 {
        param * level_cof(level) as f64
    }

    pub fn critical_strike_cof(&self, level: i64) -> f64 {
        Self::cof(level, self.critical_strike)
    }
    pub fn critical_damage_power_cof(&self, level: i64) -> f64 {
        Self::cof(level, self.critical_damage_power)
    }
    pub fn overcome_cof(&self, level: i64) -> f64 {
        Self::cof(level, self.overcome)
    }
    /// Surplus does not scale with level
    pub fn surplus_cof(&self) -> f64 {
        self.surplus
    }
    pub fn strain_cof(&self, level: i64) -> f64 {
        Self::cof(level, self.strain)
    }
    pub fn haste_cof(&self, level: i64) -> f64 {
        Self::cof(level, self.haste)
    }
    pub fn shield_cof(&self, level: i64, school: School) -> f64 {
        if school.is_magic() {
            Self::cof(level, self.magic_shield)
        } else {
            Self::cof(level, self.physics_shield)
        }
    }
}

#[inline(always)]
fn ratio(value: f64, cof: f64) -> f64 {
    if cof == 0.0 {
        0.0
    } else {
        value / cof
    }
}

/// Sum of the per-school field and, for magic schools, the shared magic field
fn school_sum(m: &AttributeModel, school: School, field: fn(&str) -> String) -> i64 {
    let own = m.get(&field(school.as_str()));
    if school.is_magic() {
        own + m.get(&field("magic"))
    } else {
        own
    }
}

pub const CRITICAL_DAMAGE_POWER_CAP: i64 = 1280;
pub const SHIELD_CAP: i64 = 768;
pub const HASTE_CAP: i64 = 256;

/// Final shield of `m` against damage of `school`, after `ignore` (1024ths) from the attacker
pub fn shield(m: &AttributeModel, school: School, ignore: i64, params: &LevelParams) -> i64 {
    let base = school_sum(m, school, name::shield_base);
    let percent = m.get(&name::shield_percent(school));
    let additional = if school.is_magic() {
        0
    } else {
        m.get(PHYSICS_SHIELD_ADDITIONAL)
    };
    let total = base + base * percent / 1024 + additional;
    let shield = total * (1024 - ignore) / 1024;
    let cof = params.shield_cof(m.level, school);
    let denom = shield as f64 + cof;
    if denom <= 0.0 {
        return 0;
    }
    ((shield as f64 * 1024.0 / denom) as i64).min(SHIELD_CAP)
}

/// Declare a full stat set and install every final formula.
pub fn standard_model(level: i64, is_npc: bool, params: LevelParams) -> AttributeModel {
    let mut m = AttributeModel::new(level, is_npc);

    for primary in [SPUNK, STRENGTH, AGILITY, SPIRIT, VITALITY] {
        m.declare(primary, StatKind::Tracked);
    }
    for s in School::ALL.iter().map(|s| s.as_str()).chain(["magic"]) {
        m.declare(name::attack_power_base(s), StatKind::Tracked)
            .declare(name::attack_power_percent(s), StatKind::Additive)
            .declare(name::critical_strike(s), StatKind::Tracked)
            .declare(name::overcome_base(s), StatKind::Tracked)
            .declare(name::shield_base(s), StatKind::Tracked)
            .declare(name::critical_damage_power_rate(s), StatKind::Additive);
    }
    for s in School::ALL {
        m.declare(name::attack_power_bonus(s), StatKind::Derived)
            .declare(name::critical_strike_bonus(s), StatKind::Derived)
            .declare(name::overcome_bonus(s), StatKind::Derived)
            .declare(name::critical_strike_rate(s), StatKind::Additive)
            .declare(name::overcome_percent(s), StatKind::Additive)
            .declare(name::shield_percent(s), StatKind::Additive)
            .declare(name::damage_coefficient(s), StatKind::Additive);
    }
    for tracked in [
        ALL_CRITICAL_STRIKE,
        ALL_CRITICAL_DAMAGE_POWER,
        "physics_critical_damage_power_base",
        "magic_critical_damage_power_base",
        SURPLUS,
        STRAIN,
        HASTE,
        WEAPON_DAMAGE,
        WEAPON_DAMAGE_RAND,
    ] {
        m.declare(tracked, StatKind::Tracked);
    }
    for additive in [
        STRAIN_PERCENT,
        STRAIN_RATE,
        HASTE_PERCENT,
        UNLIMITED_HASTE_PERCENT,
        PHYSICS_SHIELD_ADDITIONAL,
        ALL_DAMAGE_ADD_PERCENT,
        ALL_MAGIC_DAMAGE_ADD_PERCENT,
        DST_MOVE_STATE_DAMAGE_ADD,
        ALL_SHIELD_IGNORE_PERCENT,
        DST_NPC_DAMAGE_COEFFICIENT,
    ] {
        m.declare(additive, StatKind::Additive);
    }
    install_formulas(&mut m, params);
    m
}

fn install_formulas(m: &mut AttributeModel, p: LevelParams) {
    for s in School::ALL {
        let bonus = name::attack_power_bonus(s);
        m.define(name::final_attack_power(s), move |m| {
            let base = school_sum(m, s, name::attack_power_base);
            let percent = school_sum(m, s, name::attack_power_percent);
            base + base * percent / 1024 + m.get(&bonus)
        });

        let bonus = name::critical_strike_bonus(s);
        let rate = name::critical_strike_rate(s);
        m.define(name::final_critical_strike(s), move |m| {
            let rating =
                school_sum(m, s, name::critical_strike) + m.get(ALL_CRITICAL_STRIKE) + m.get(&bonus);
            (ratio(rating as f64, p.critical_strike_cof(m.level)) * 10000.0) as i64 + m.get(&rate)
        });

        m.define(name::final_critical_damage_power(s), move |m| {
            let group = if s.is_magic() { "magic" } else { "physics" };
            let rating = m.get(ALL_CRITICAL_DAMAGE_POWER) + m.get(&name::critical_damage_power(group));
            let rate = school_sum(m, s, name::critical_damage_power_rate);
            let value = ratio(rating as f64 * 1024.0, p.critical_damage_power_cof(m.level)) as i64 + rate;
            value.min(CRITICAL_DAMAGE_POWER_CAP)
        });

        let percent = name::overcome_percent(s);
        let bonus = name::overcome_bonus(s);
        m.define(name::final_overcome(s), move |m| {
            let base = school_sum(m, s, name::overcome_base);
            let total = base + base * m.get(&percent) / 1024 + m.get(&bonus);
            ratio(total as f64 * 1024.0, p.overcome_cof(m.level)) as i64
        });

        m.define(name::final_damage_add_percent(s), move |m| {
            let all = m.get(ALL_DAMAGE_ADD_PERCENT);
            if s.is_magic() {
                all + m.get(ALL_MAGIC_DAMAGE_ADD_PERCENT)
            } else {
                all
            }
        });
    }

    m.define(FINAL_STRAIN, move |m| {
        let base = m.get(STRAIN);
        let total = base + base * m.get(STRAIN_PERCENT) / 1024;
        (ratio(total as f64 * 1024.0, p.strain_cof(m.level)) + m.get(STRAIN_RATE) as f64) as i64
    });
    m.define(FINAL_HASTE, move |m| {
        let rating = ratio(m.get(HASTE) as f64 * 1024.0, p.haste_cof(m.level)) as i64;
        (rating + m.get(HASTE_PERCENT)).min(HASTE_CAP) + m.get(UNLIMITED_HASTE_PERCENT)
    });
    m.define(FINAL_SURPLUS, |m| m.get(SURPLUS));
}

/// Rating conversion: `to` gains `from * ratio / 1024`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub from: String,
    pub to: String,
    pub ratio: i64,
}

/// Install derived bonus formulas for a set of conversions. Each target must
/// be a derived stat; conversions into the same target are summed.
pub fn install_conversions(m: &mut AttributeModel, conversions: &[Conversion]) -> Result<()> {
    let mut targets: Vec<&str> = conversions.iter().map(|c| c.to.as_str()).collect();
    targets.sort_unstable();
    targets.dedup();

    for target in targets {
        let sources: Vec<(String, i64)> = conversions
            .iter()
            .filter(|c| c.to == target)
            .map(|c| (c.from.clone(), c.ratio))
            .collect();
        for (from, _) in &sources {
            if m.kind(from).is_none() {
                return Err(SimError::UnknownStat(from.clone()));
            }
        }
        m.set_formula(target, move |m| {
            sources.iter().map(|(from, r)| m.get(from) * r / 1024).sum()
        })?;
    }
    Ok(())
}
