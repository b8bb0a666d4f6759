//! Fight summaries for the command line

use crate::damage::{ActionBreakdown, DamageLedger, CHANCE_SCALE};
use crate::scheduler::{Tick, TICKS_PER_SECOND};
use crate::sensitivity::SensitivityReport;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FightReport {
    pub duration_ticks: Tick,
    pub duration_seconds: f64,
    pub total: i64,
    pub dps: f64,
    pub hits: usize,
    /// Sorted by share, largest first
    pub breakdown: Vec<ActionBreakdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<SensitivityReport>,
}

impl FightReport {
    pub fn new(ledger: &DamageLedger, elapsed: Tick) -> Self {
        let mut breakdown = ledger.breakdown();
        breakdown.sort_by(|a, b| b.share.total_cmp(&a.share).then(a.skill_id.cmp(&b.skill_id)));
        Self {
            duration_ticks: elapsed,
            duration_seconds: elapsed as f64 / TICKS_PER_SECOND as f64,
            total: ledger.total(),
            dps: ledger.dps(elapsed),
            hits: ledger.len(),
            breakdown,
            sensitivity: None,
        }
    }

    pub fn with_sensitivity(mut self, report: SensitivityReport) -> Self {
        self.sensitivity = Some(report);
        self
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Fight Results ===");
        let _ = writeln!(
            out,
            "Duration: {:.2}s ({} ticks)",
            self.duration_seconds, self.duration_ticks
        );
        let _ = writeln!(out, "Total Damage: {}", self.total);
        let _ = writeln!(out, "DPS: {:.0}", self.dps);
        let _ = writeln!(out, "Hits: {}", self.hits);
        let _ = writeln!(out);
        let _ = writeln!(out, "--- Breakdown ---");
        let _ = writeln!(
            out,
            "{:<24} {:>6} {:>7} {:>7} {:>8} {:>8} {:>7} {:>12}",
            "action", "count", "hit", "crit", "crit%", "min", "max", "share"
        );
        for row in &self.breakdown {
            let label = format!("{} ({}#{})", row.name, row.skill_id, row.level);
            let _ = writeln!(
                out,
                "{:<24} {:>6} {:>7} {:>7} {:>7.2}% {:>8} {:>7} {:>11.2}%",
                label,
                row.count,
                row.hits,
                row.criticals,
                row.mean_critical_chance * 100.0 / CHANCE_SCALE as f64,
                row.min,
                row.max,
                row.share * 100.0
            );
        }

        if let Some(sens) = &self.sensitivity {
            let _ = writeln!(out);
            let _ = writeln!(out, "--- Stat Sensitivity (reference: {}) ---", sens.reference);
            let _ = writeln!(out, "Baseline DPS: {:.0}", sens.baseline_dps);
            for entry in &sens.entries {
                let _ = writeln!(
                    out,
                    "{:<16} {:>+10.1} dps {:>10.4}/step {:>8.3}",
                    entry.name, entry.gain, entry.per_step, entry.normalized
                );
            }
        }
        out
    }
}
