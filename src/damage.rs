//! Two-phase damage computation and the running damage ledger
//!
//! The source phase reads the attacker (plus the target's level and npc flag)
//! and yields non-critical and critical ranges with a critical chance. The
//! mitigation phase reads only the target and produces the expected value.

use crate::attribute::AttributeModel;
use crate::data::{DamageSpec, SkillRow};
use crate::scheduler::{Tick, TICKS_PER_SECOND};
use crate::stats::{self, name, LevelParams, School};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Basis-point scale of critical chance
pub const CHANCE_SCALE: i64 = 10000;
/// Baseline critical multiplier before critical damage power
pub const CRITICAL_BASE: f64 = 1.75;

/// Arguments of one source computation, as returned by a behavior's cast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceArgs {
    pub skill_id: u32,
    pub level: u32,
    pub name: String,
    /// School of attack power, overcome and the target's shield
    pub school: School,
    /// School of critical strike and critical damage power
    pub kind_school: School,
    pub damage_base: f64,
    pub damage_rand: f64,
    pub channel_interval: f64,
    pub weapon_damage_percent: i64,
    pub surplus: bool,
    pub channel_interval_cof: f64,
}

impl SourceArgs {
    pub fn from_spec(skill: &SkillRow, level: u32, spec: &DamageSpec) -> Self {
        Self {
            skill_id: skill.id,
            level,
            name: skill.name.clone(),
            school: spec.school,
            kind_school: skill.kind_school,
            damage_base: spec.damage_base,
            damage_rand: spec.damage_rand,
            channel_interval: spec.channel_interval,
            weapon_damage_percent: spec.weapon_damage_percent,
            surplus: spec.surplus,
            channel_interval_cof: 1.0,
        }
    }
}

/// Identifies a source figure; mitigation records refer back to it.
///
/// `ordinal` counts earlier sources with the same tick, skill and level in the
/// same run, so a skill that deals damage twice in one tick keeps both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub tick: Tick,
    pub skill_id: u32,
    pub level: u32,
    #[serde(default)]
    pub ordinal: u32,
}

impl SourceKey {
    pub fn first(tick: Tick, skill_id: u32, level: u32) -> Self {
        Self {
            tick,
            skill_id,
            level,
            ordinal: 0,
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.tick, self.skill_id, self.level)?;
        if self.ordinal > 0 {
            write!(f, "#{}", self.ordinal)?;
        }
        Ok(())
    }
}

/// Hands out source keys in call order. A run and its replay walk the same
/// sequence of source calls, so both derive identical keys.
#[derive(Debug, Clone, Default)]
pub struct SourceKeys {
    tick: Tick,
    seen: HashMap<(u32, u32), u32>,
}

impl SourceKeys {
    pub fn next(&mut self, tick: Tick, skill_id: u32, level: u32) -> SourceKey {
        if tick != self.tick {
            self.tick = tick;
            self.seen.clear();
        }
        let slot = self.seen.entry((skill_id, level)).or_insert(0);
        let key = SourceKey {
            tick,
            skill_id,
            level,
            ordinal: *slot,
        };
        *slot += 1;
        key
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageRange {
    pub min: i64,
    pub max: i64,
}

impl DamageRange {
    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) as f64 / 2.0
    }

    fn scaled(self, cof: f64, denom: f64) -> Self {
        Self {
            min: (self.min as f64 * cof / denom) as i64,
            max: (self.max as f64 * cof / denom) as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageFigure {
    pub key: SourceKey,
    pub name: String,
    pub school: School,
    pub non_critical: DamageRange,
    pub critical: DamageRange,
    /// Basis points, at most 10000
    pub critical_chance: i64,
    /// Zero until mitigated
    pub expected: i64,
    /// Attacker's shield ignore, carried so mitigation stays target-only
    pub shield_ignore: i64,
}

/// Basis-point blend of the two range midpoints
pub fn expected_damage(non_critical: DamageRange, critical: DamageRange, chance: i64) -> i64 {
    let chance = chance.clamp(0, CHANCE_SCALE) as f64;
    ((non_critical.midpoint() * (CHANCE_SCALE as f64 - chance) + critical.midpoint() * chance)
        / CHANCE_SCALE as f64) as i64
}

/// `1 + 0.05 * diff`, tripled when the attacker outlevels the target
pub fn level_multiplier(attacker_level: i64, target_level: i64) -> f64 {
    let diff = (attacker_level - target_level) as f64;
    let factor = if attacker_level > target_level { 3.0 } else { 1.0 };
    1.0 + diff * 0.05 * factor
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DamagePipeline {
    pub params: LevelParams,
}

impl DamagePipeline {
    pub fn new(params: LevelParams) -> Self {
        Self { params }
    }

    pub fn source(
        &self,
        attacker: &AttributeModel,
        target: &AttributeModel,
        args: &SourceArgs,
        key: SourceKey,
    ) -> DamageFigure {
        let school = args.school;
        let raw_ap = if args.surplus {
            (attacker.get(stats::SURPLUS) as f64 * self.params.surplus_cof() * args.channel_interval)
                as i64
        } else {
            (attacker.get(&name::final_attack_power(school)) as f64
                * args.channel_interval.trunc()
                * args.channel_interval_cof
                / 16.0
                / school.attack_divisor()) as i64
        };

        let weapon = attacker.get(stats::WEAPON_DAMAGE);
        let weapon_rand = attacker.get(stats::WEAPON_DAMAGE_RAND);
        let raw = DamageRange {
            min: args.damage_base as i64 + raw_ap + weapon * args.weapon_damage_percent / 1024,
            max: (args.damage_base + args.damage_rand) as i64
                + raw_ap
                + (weapon + weapon_rand) * args.weapon_damage_percent / 1024,
        };

        let vs_npc = |v: i64| if target.is_npc { v } else { 0 };
        let multipliers = [
            1024 + attacker.get(&name::final_overcome(school)),
            1024 + attacker.get(&name::final_damage_add_percent(school)),
            1024 + attacker.get(stats::DST_MOVE_STATE_DAMAGE_ADD),
            1024 + vs_npc(attacker.get(stats::FINAL_STRAIN)),
            1024 + vs_npc(attacker.get(stats::DST_NPC_DAMAGE_COEFFICIENT)),
        ];
        let cof = multipliers
            .iter()
            .fold(level_multiplier(attacker.level, target.level), |acc, m| acc * *m as f64);
        let non_critical = raw.scaled(cof, 1024f64.powi(multipliers.len() as i32));

        let power = attacker.get(&name::final_critical_damage_power(args.kind_school));
        let critical_of = |v: i64| (v as f64 * CRITICAL_BASE) as i64 + v * power / 1024;
        let critical = DamageRange {
            min: critical_of(non_critical.min),
            max: critical_of(non_critical.max),
        };

        DamageFigure {
            key,
            name: args.name.clone(),
            school,
            non_critical,
            critical,
            critical_chance: attacker
                .get(&name::final_critical_strike(args.kind_school))
                .min(CHANCE_SCALE),
            expected: 0,
            shield_ignore: attacker.get(stats::ALL_SHIELD_IGNORE_PERCENT),
        }
    }

    pub fn mitigate(&self, target: &AttributeModel, source: &DamageFigure) -> DamageFigure {
        let shield = stats::shield(target, source.school, source.shield_ignore, &self.params);
        let coefficient = target.get(&name::damage_coefficient(source.school));
        let cof = (1024 - shield) as f64 * (1024 + coefficient) as f64;
        let denom = 1024.0 * 1024.0;

        let mut figure = source.clone();
        figure.non_critical = source.non_critical.scaled(cof, denom);
        figure.critical = source.critical.scaled(cof, denom);
        figure.expected = expected_damage(figure.non_critical, figure.critical, figure.critical_chance);
        figure
    }
}

/// Observer receiving every mitigated figure as it lands
pub trait LedgerSink: Send {
    fn publish(&mut self, tick: Tick, expected: i64);
}

impl<F: FnMut(Tick, i64) + Send> LedgerSink for F {
    fn publish(&mut self, tick: Tick, expected: i64) {
        self(tick, expected)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub tick: Tick,
    pub figure: DamageFigure,
}

/// Per (skill, level) damage statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionBreakdown {
    pub skill_id: u32,
    pub level: u32,
    pub name: String,
    pub min: i64,
    pub max: i64,
    pub mean_critical_chance: f64,
    pub total: i64,
    pub count: u32,
    pub hits: u32,
    pub criticals: u32,
    pub share: f64,
}

#[derive(Default)]
pub struct DamageLedger {
    entries: Vec<LedgerEntry>,
    sink: Option<Box<dyn LedgerSink>>,
}

impl fmt::Debug for DamageLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DamageLedger")
            .field("entries", &self.entries.len())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl DamageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Box<dyn LedgerSink>) -> Self {
        Self {
            entries: Vec::new(),
            sink: Some(sink),
        }
    }

    pub fn record(&mut self, tick: Tick, figure: DamageFigure) {
        if let Some(sink) = self.sink.as_mut() {
            sink.publish(tick, figure.expected);
        }
        self.entries.push(LedgerEntry { tick, figure });
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> i64 {
        self.entries.iter().map(|e| e.figure.expected).sum()
    }

    pub fn last_tick(&self) -> Tick {
        self.entries.last().map_or(0, |e| e.tick)
    }

    /// Expected damage per second over `elapsed` ticks
    pub fn dps(&self, elapsed: Tick) -> f64 {
        if elapsed <= 0 {
            return 0.0;
        }
        self.total() as f64 * TICKS_PER_SECOND as f64 / elapsed as f64
    }

    pub fn breakdown(&self) -> Vec<ActionBreakdown> {
        struct Acc {
            name: String,
            min: i64,
            max: i64,
            chance_sum: i64,
            total: i64,
            count: u32,
        }

        let mut groups: BTreeMap<(u32, u32), Acc> = BTreeMap::new();
        for entry in &self.entries {
            let f = &entry.figure;
            let acc = groups.entry((f.key.skill_id, f.key.level)).or_insert(Acc {
                name: f.name.clone(),
                min: f.non_critical.min,
                max: f.critical.max,
                chance_sum: 0,
                total: 0,
                count: 0,
            });
            acc.min = acc.min.min(f.non_critical.min);
            acc.max = acc.max.max(f.critical.max);
            acc.chance_sum += f.critical_chance;
            acc.total += f.expected;
            acc.count += 1;
        }

        let sum = self.total();
        groups
            .into_iter()
            .map(|((skill_id, level), acc)| {
                let mean = acc.chance_sum as f64 / acc.count as f64;
                let scale = CHANCE_SCALE as f64;
                let hits = (acc.count as f64 * (scale - mean) / scale + 0.5) as u32;
                ActionBreakdown {
                    skill_id,
                    level,
                    name: acc.name,
                    min: acc.min,
                    max: acc.max,
                    mean_critical_chance: mean,
                    total: acc.total,
                    count: acc.count,
                    hits,
                    criticals: acc.count - hits.min(acc.count),
                    share: if sum == 0 { 0.0 } else { acc.total as f64 / sum as f64 },
                }
            })
            .collect()
    }
}
