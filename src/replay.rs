//! Recorded damage logs and their replay
//!
//! A recorded run logs every source and mitigation computation together with
//! the attribute changes exported since the previous record. Replaying feeds
//! those changes into fresh models and redoes only the arithmetic, so a
//! perturbed model sees exactly the decisions the original run made.

use crate::attribute::{AttributeModel, StatChanges};
use crate::damage::{DamageFigure, DamageLedger, DamagePipeline, SourceArgs, SourceKey};
use crate::error::{Result, SimError};
use crate::scheduler::Tick;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// "RSLOG" + format version
pub const LOG_MAGIC: u64 = 0x5253_4C4F_4700_0002;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    Source {
        tick: Tick,
        attacker: StatChanges,
        target: StatChanges,
        key: SourceKey,
        args: SourceArgs,
    },
    Mitigation {
        tick: Tick,
        attacker: StatChanges,
        target: StatChanges,
        source: SourceKey,
    },
}

impl LogRecord {
    pub fn tick(&self) -> Tick {
        match self {
            LogRecord::Source { tick, .. } | LogRecord::Mitigation { tick, .. } => *tick,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayLog {
    records: Vec<LogRecord>,
    /// Tick the recorded run stopped at
    #[serde(default)]
    end_tick: Tick,
}

impl ReplayLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: LogRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_tick(&self) -> Tick {
        self.records.last().map_or(0, LogRecord::tick)
    }

    pub fn set_end_tick(&mut self, tick: Tick) {
        self.end_tick = tick;
    }

    /// Fight duration: where the recorded run stopped, never before its last record
    pub fn elapsed(&self) -> Tick {
        self.end_tick.max(self.last_tick())
    }
}

#[derive(Debug)]
pub struct ReplayOutcome {
    pub ledger: DamageLedger,
    pub elapsed: Tick,
}

impl ReplayOutcome {
    pub fn dps(&self) -> f64 {
        self.ledger.dps(self.elapsed)
    }
}

/// Recompute every logged figure against `attacker` and `target`.
///
/// Both models should be freshly built; their current values act as the
/// baseline the logged deltas are applied to.
pub fn replay(
    log: &ReplayLog,
    attacker: &mut AttributeModel,
    target: &mut AttributeModel,
    pipeline: &DamagePipeline,
) -> Result<ReplayOutcome> {
    let mut sources: HashMap<SourceKey, DamageFigure> = HashMap::new();
    let mut ledger = DamageLedger::new();

    for record in log.records() {
        match record {
            LogRecord::Source {
                attacker: a,
                target: t,
                key,
                args,
                ..
            } => {
                attacker.import_changes(a)?;
                target.import_changes(t)?;
                sources.insert(*key, pipeline.source(attacker, target, args, *key));
            }
            LogRecord::Mitigation {
                tick,
                attacker: a,
                target: t,
                source,
            } => {
                attacker.import_changes(a)?;
                target.import_changes(t)?;
                let figure = sources
                    .get(source)
                    .ok_or_else(|| SimError::MissingSource(source.to_string()))?;
                ledger.record(*tick, pipeline.mitigate(target, figure));
            }
        }
    }

    Ok(ReplayOutcome {
        ledger,
        elapsed: log.elapsed(),
    })
}

/// Lowercase hex SHA-256 of `input`'s canonical JSON
pub fn fingerprint<T: Serialize + ?Sized>(input: &T) -> Result<String> {
    let canonical = serde_json::to_vec(input)?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

fn checksum(magic: &[u8], len: &[u8], data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(magic);
    hasher.update(len);
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Binary log format:
/// - magic (8 bytes, LE)
/// - payload length (4 bytes, LE)
/// - bincode payload
/// - SHA-256 over the three fields above (32 bytes)
pub fn encode(log: &ReplayLog) -> Result<Vec<u8>> {
    let data = bincode::serialize(log)?;
    let len = u32::try_from(data.len())
        .map_err(|_| SimError::CorruptLog(format!("log payload of {} bytes is too large", data.len())))?;
    let magic = LOG_MAGIC.to_le_bytes();
    let len = len.to_le_bytes();

    let mut out = Vec::with_capacity(8 + 4 + data.len() + 32);
    out.extend_from_slice(&magic);
    out.extend_from_slice(&len);
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&magic, &len, &data));
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<ReplayLog> {
    if bytes.len() < 12 {
        return Err(SimError::CorruptLog("truncated header".into()));
    }
    let (magic, rest) = bytes.split_at(8);
    let (len, rest) = rest.split_at(4);

    let mut magic_bytes = [0u8; 8];
    magic_bytes.copy_from_slice(magic);
    let version = u64::from_le_bytes(magic_bytes);
    if version != LOG_MAGIC {
        return Err(SimError::CorruptLog(format!(
            "invalid log magic: expected 0x{LOG_MAGIC:016X}, got 0x{version:016X}"
        )));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(len);
    let data_len = u32::from_le_bytes(len_bytes) as usize;
    if rest.len() != data_len + 32 {
        return Err(SimError::CorruptLog(format!(
            "expected {} payload bytes, found {}",
            data_len + 32,
            rest.len()
        )));
    }

    let (data, stored) = rest.split_at(data_len);
    if stored != checksum(magic, len, data).as_slice() {
        return Err(SimError::CorruptLog("checksum verification failed".into()));
    }
    Ok(bincode::deserialize(data)?)
}

/// Directory of recorded logs keyed by fight fingerprint
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.log"))
    }

    pub fn save(&self, fingerprint: &str, log: &ReplayLog) -> Result<PathBuf> {
        let path = self.path_for(fingerprint);
        fs::write(&path, encode(log)?)?;
        debug!(path = %path.display(), records = log.len(), "log saved");
        Ok(path)
    }

    /// `None` when nothing was stored for this fingerprint
    pub fn load(&self, fingerprint: &str) -> Result<Option<ReplayLog>> {
        let path = self.path_for(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        let log = decode(&fs::read(&path)?)?;
        debug!(path = %path.display(), records = log.len(), "log loaded");
        Ok(Some(log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FightConfig;
    use crate::damage::SourceKeys;
    use crate::stats::{standard_model, LevelParams, School};

    fn args() -> SourceArgs {
        SourceArgs {
            skill_id: 5,
            level: 1,
            name: "bolt".into(),
            school: School::Solar,
            kind_school: School::Solar,
            damage_base: 0.0,
            damage_rand: 0.0,
            channel_interval: 192.0,
            weapon_damage_percent: 0,
            surplus: false,
            channel_interval_cof: 1.0,
        }
    }

    /// Build a model with the given attack power outside of recording
    fn attacker(ap: i64) -> AttributeModel {
        let mut m = standard_model(120, false, LevelParams::default());
        m.set("solar_attack_power_base", ap).unwrap();
        m
    }

    fn target() -> AttributeModel {
        standard_model(120, false, LevelParams::default())
    }

    fn record_one(pipeline: &DamagePipeline) -> (ReplayLog, DamageFigure) {
        let mut a = attacker(100);
        let mut t = target();
        a.set_recording(true);
        t.set_recording(true);

        let mut log = ReplayLog::new();
        let key = SourceKeys::default().next(64, 5, 1);
        log.push(LogRecord::Source {
            tick: 64,
            attacker: a.export_changes(),
            target: t.export_changes(),
            key,
            args: args(),
        });
        let source = pipeline.source(&a, &t, &args(), key);
        log.push(LogRecord::Mitigation {
            tick: 64,
            attacker: a.export_changes(),
            target: t.export_changes(),
            source: key,
        });
        (log, pipeline.mitigate(&t, &source))
    }

    #[test]
    fn test_replay_reproduces_and_scales_with_attack_power() {
        let pipeline = DamagePipeline::new(LevelParams::default());
        let (log, original) = record_one(&pipeline);

        let same = replay(&log, &mut attacker(100), &mut target(), &pipeline).unwrap();
        assert_eq!(same.ledger.total(), original.expected);
        assert_eq!(same.elapsed, 64);

        let boosted = replay(&log, &mut attacker(150), &mut target(), &pipeline).unwrap();
        let before = &same.ledger.entries()[0].figure;
        let after = &boosted.ledger.entries()[0].figure;
        assert_eq!(after.critical_chance, before.critical_chance);
        let ratio = after.expected as f64 / before.expected as f64;
        assert!((ratio - 1.5).abs() < 0.02, "ratio {ratio}");
    }

    #[test]
    fn test_elapsed_is_the_recorded_end_tick() {
        let pipeline = DamagePipeline::new(LevelParams::default());
        let (mut log, _) = record_one(&pipeline);

        // A DOT source computed at 128 whose ticks were cut off by the end of the run
        let mut keys = SourceKeys::default();
        log.push(LogRecord::Source {
            tick: 128,
            attacker: Default::default(),
            target: Default::default(),
            key: keys.next(128, 5, 1),
            args: args(),
        });
        log.set_end_tick(256);

        let replayed = replay(&log, &mut attacker(100), &mut target(), &pipeline).unwrap();
        assert_eq!(replayed.elapsed, 256);
        assert_eq!(replayed.ledger.len(), 1);

        let bytes = encode(&log).unwrap();
        assert_eq!(decode(&bytes).unwrap().elapsed(), 256);
    }

    #[test]
    fn test_mitigation_without_source_fails() {
        let pipeline = DamagePipeline::new(LevelParams::default());
        let (log, _) = record_one(&pipeline);
        let mut orphan = ReplayLog::new();
        orphan.push(log.records()[1].clone());

        let err = replay(&orphan, &mut attacker(100), &mut target(), &pipeline).unwrap_err();
        assert!(matches!(err, SimError::MissingSource(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::State);
    }

    #[test]
    fn test_codec_detects_corruption() {
        let pipeline = DamagePipeline::new(LevelParams::default());
        let (log, _) = record_one(&pipeline);
        let bytes = encode(&log).unwrap();
        assert_eq!(decode(&bytes).unwrap(), log);

        let mut flipped = bytes.clone();
        flipped[14] ^= 0xFF;
        assert!(matches!(decode(&flipped), Err(SimError::CorruptLog(_))));

        let mut wrong_magic = bytes.clone();
        wrong_magic[0] ^= 1;
        assert!(matches!(decode(&wrong_magic), Err(SimError::CorruptLog(_))));

        assert!(matches!(decode(&bytes[..20]), Err(SimError::CorruptLog(_))));
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let fight: FightConfig = serde_yaml::from_str("gcd: 1\nsequence: [main]").unwrap();
        let a = fingerprint(&fight).unwrap();
        assert_eq!(a, fingerprint(&fight.clone()).unwrap());
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let mut other = fight;
        other.ping_ms = 50;
        assert_ne!(a, fingerprint(&other).unwrap());
    }
}
