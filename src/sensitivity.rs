//! Marginal DPS per stat category
//!
//! One recorded log is replayed against a baseline model pair and against one
//! perturbed pair per category. Replays are independent and run on a rayon
//! pool; each builds its own models.

use crate::attribute::{AttributeModel, StatKind};
use crate::damage::DamagePipeline;
use crate::error::{Result, SimError};
use crate::replay::{replay, ReplayLog};
use crate::stats::{self, name, School};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// A named bundle of stat additions applied on top of the baseline build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perturbation {
    pub name: String,
    pub changes: BTreeMap<String, i64>,
}

impl Perturbation {
    pub fn new(name: impl Into<String>, changes: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self {
            name: name.into(),
            changes: changes.into_iter().collect(),
        }
    }

    /// Largest single stat change. A category that touches several stats
    /// (attack power of every school) counts as one step of this size.
    pub fn step_size(&self) -> i64 {
        self.changes.values().copied().max().unwrap_or(0)
    }
}

pub fn default_perturbations() -> Vec<Perturbation> {
    let attack = School::ALL.iter().map(|s| {
        let value = if s.is_magic() { 430 } else { 360 };
        (name::attack_power_base(s.as_str()), value)
    });
    vec![
        Perturbation::new("spunk", [(stats::SPUNK.to_string(), 179)]),
        Perturbation::new("attack", attack),
        Perturbation::new("critical", [(stats::ALL_CRITICAL_STRIKE.to_string(), 799)]),
        Perturbation::new(
            "critical_power",
            [(stats::ALL_CRITICAL_DAMAGE_POWER.to_string(), 799)],
        ),
        Perturbation::new(
            "overcome",
            [
                (name::overcome_base("physics"), 799),
                (name::overcome_base("magic"), 799),
            ],
        ),
        Perturbation::new("strain", [(stats::STRAIN.to_string(), 799)]),
        Perturbation::new("surplus", [(stats::SURPLUS.to_string(), 799)]),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityEntry {
    pub name: String,
    pub dps: f64,
    /// `dps - baseline_dps`
    pub gain: f64,
    /// `gain / step_size`, 0 for an empty perturbation
    pub per_step: f64,
    /// Gain relative to the reference category's gain
    pub normalized: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityReport {
    pub baseline_dps: f64,
    pub reference: String,
    pub entries: Vec<SensitivityEntry>,
}

impl SensitivityReport {
    pub fn get(&self, name: &str) -> Option<&SensitivityEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Perturbed stats must be tracked: an additive stat would be overwritten by
/// the first imported record.
fn validate(probe: &AttributeModel, perturbations: &[Perturbation], reference: &str) -> Result<()> {
    if !perturbations.iter().any(|p| p.name == reference) {
        return Err(SimError::InvalidConfig(format!(
            "reference category `{reference}` is not among the perturbations"
        )));
    }
    for p in perturbations {
        for stat in p.changes.keys() {
            match probe.kind(stat) {
                Some(StatKind::Tracked) => {}
                Some(kind) => {
                    return Err(SimError::InvalidConfig(format!(
                        "category `{}` perturbs {kind:?} stat `{stat}`; only tracked stats replay",
                        p.name
                    )))
                }
                None => return Err(SimError::UnknownStat(stat.clone())),
            }
        }
    }
    Ok(())
}

fn replay_dps<F>(
    log: &ReplayLog,
    build: &F,
    pipeline: &DamagePipeline,
    perturbation: Option<&Perturbation>,
) -> Result<f64>
where
    F: Fn() -> Result<(AttributeModel, AttributeModel)>,
{
    let (mut attacker, mut target) = build()?;
    attacker.set_recording(false);
    target.set_recording(false);
    if let Some(p) = perturbation {
        for (stat, value) in &p.changes {
            attacker.add(stat, *value)?;
        }
    }
    let dps = replay(log, &mut attacker, &mut target, pipeline)?.dps();
    debug!(category = perturbation.map_or("baseline", |p| p.name.as_str()), dps, "replay done");
    Ok(dps)
}

/// Replay `log` once unperturbed and once per perturbation, concurrently.
///
/// `build` must return a fresh (player, target) model pair on every call.
/// `workers` defaults to the number of CPUs.
pub fn analyze<F>(
    log: &ReplayLog,
    build: F,
    pipeline: &DamagePipeline,
    perturbations: &[Perturbation],
    reference: &str,
    workers: Option<usize>,
) -> Result<SensitivityReport>
where
    F: Fn() -> Result<(AttributeModel, AttributeModel)> + Sync,
{
    let (probe, _) = build()?;
    validate(&probe, perturbations, reference)?;

    let threads = workers.unwrap_or_else(num_cpus::get).max(1);
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| SimError::InvalidConfig(format!("cannot build worker pool: {e}")))?;

    let jobs: Vec<Option<&Perturbation>> = std::iter::once(None)
        .chain(perturbations.iter().map(Some))
        .collect();
    let results: Vec<f64> = pool.install(|| {
        jobs.par_iter()
            .map(|p| replay_dps(log, &build, pipeline, *p))
            .collect::<Result<Vec<f64>>>()
    })?;

    let baseline_dps = results[0];
    let dps: BTreeMap<&str, f64> = perturbations
        .iter()
        .zip(&results[1..])
        .map(|(p, d)| (p.name.as_str(), *d))
        .collect();
    let reference_gain = dps.get(reference).copied().unwrap_or(baseline_dps) - baseline_dps;
    if reference_gain == 0.0 {
        warn!(reference, "reference category does not change dps, normalized values are 0");
    }

    let entries = perturbations
        .iter()
        .zip(&results[1..])
        .map(|(p, d)| {
            let gain = d - baseline_dps;
            let step = p.step_size();
            SensitivityEntry {
                name: p.name.clone(),
                dps: *d,
                gain,
                per_step: if step == 0 { 0.0 } else { gain / step as f64 },
                normalized: if reference_gain == 0.0 { 0.0 } else { gain / reference_gain },
            }
        })
        .collect();

    info!(baseline_dps, categories = perturbations.len(), threads, "sensitivity analysis finished");
    Ok(SensitivityReport {
        baseline_dps,
        reference: reference.to_string(),
        entries,
    })
}
