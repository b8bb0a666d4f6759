//! Integration test: recorded fights and their replays
//!
//! Runs the demo scenario end to end, then checks that replaying the recorded
//! log reproduces the fight and that logs survive the on-disk cache.

use rotation_sim::config::Scenario;
use rotation_sim::error::{ErrorKind, SimError};
use rotation_sim::replay::{replay, LogStore, ReplayLog};
use rotation_sim::scheduler::Tick;
use rotation_sim::simulation::SimOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

fn demo() -> Scenario {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/demo.yaml");
    Scenario::from_file(path).expect("demo scenario loads")
}

fn recorded() -> SimOptions {
    SimOptions {
        record: true,
        seed: Some(1),
    }
}

// =============================================================================
// Full runs
// =============================================================================

#[test]
fn test_demo_fight_runs_to_completion() {
    let scenario = demo();
    let mut sim = scenario.build_simulation(SimOptions::default()).unwrap();
    sim.run(scenario.rotation().unwrap()).unwrap();

    assert!(sim.rotation().unwrap().is_finished());
    let ledger = sim.ledger();
    assert!(ledger.total() > 0);

    let names: Vec<&str> = ledger.entries().iter().map(|e| e.figure.name.as_str()).collect();
    for expected in ["moon slash", "sun flare", "corona burn", "moonburst", "afterglow"] {
        assert!(names.contains(&expected), "no `{expected}` hit in {names:?}");
    }

    let ticks: Vec<Tick> = ledger.entries().iter().map(|e| e.tick).collect();
    assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_recording_does_not_change_the_fight() {
    let scenario = demo();
    let plain = scenario.run(SimOptions { record: false, seed: Some(1) }).unwrap();
    let logged = scenario.run(recorded()).unwrap();

    assert!(plain.log.is_none());
    assert_eq!(plain.ledger.entries(), logged.ledger.entries());
    assert!(!logged.log.unwrap().is_empty());
}

#[test]
fn test_sink_sees_every_hit() {
    let scenario = demo();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut sim = scenario
        .build_simulation(SimOptions::default())
        .unwrap()
        .with_sink(Box::new(move |tick: Tick, expected: i64| {
            sink.lock().unwrap().push((tick, expected));
        }));
    sim.run(scenario.rotation().unwrap()).unwrap();

    let expected: Vec<(Tick, i64)> = sim
        .ledger()
        .entries()
        .iter()
        .map(|e| (e.tick, e.figure.expected))
        .collect();
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[test]
fn test_seeded_procs_are_reproducible() {
    let mut scenario = demo();
    scenario.fight.procs_enabled = true;
    let a = scenario.run(SimOptions { record: false, seed: Some(9) }).unwrap();
    let b = scenario.run(SimOptions { record: false, seed: Some(9) }).unwrap();
    assert_eq!(a.ledger.entries(), b.ledger.entries());
}

// =============================================================================
// Replay
// =============================================================================

#[test]
fn test_replay_reproduces_every_hit() {
    let scenario = demo();
    let outcome = scenario.run(recorded()).unwrap();
    let log = outcome.log.as_ref().unwrap();

    let (mut player, mut target) = scenario.build_models().unwrap();
    let replayed = replay(log, &mut player, &mut target, &scenario.pipeline()).unwrap();

    assert_eq!(replayed.ledger.len(), outcome.ledger.len());
    for (a, b) in outcome.ledger.entries().iter().zip(replayed.ledger.entries()) {
        assert_eq!(a.tick, b.tick);
        assert_eq!(a.figure.key, b.figure.key);
        assert_eq!(a.figure.expected, b.figure.expected, "hit {}", a.figure.key);
    }
    assert_eq!(replayed.ledger.total(), outcome.ledger.total());
    assert_eq!(replayed.elapsed, outcome.elapsed());
    assert_eq!(replayed.dps(), outcome.dps());
}

#[test]
fn test_replay_with_more_attack_power_deals_more() {
    let scenario = demo();
    let log = scenario.run(recorded()).unwrap().log.unwrap();
    let pipeline = scenario.pipeline();

    let (mut player, mut target) = scenario.build_models().unwrap();
    let base = replay(&log, &mut player, &mut target, &pipeline).unwrap();

    let (mut player, mut target) = scenario.build_models().unwrap();
    player.add("magic_attack_power_base", 2000).unwrap();
    let boosted = replay(&log, &mut player, &mut target, &pipeline).unwrap();

    assert_eq!(boosted.ledger.len(), base.ledger.len());
    assert!(boosted.ledger.total() > base.ledger.total());
}

// =============================================================================
// Log cache
// =============================================================================

#[test]
fn test_log_store_caches_by_fingerprint() {
    let scenario = demo();
    let dir = tempfile::tempdir().unwrap();
    let store = LogStore::new(dir.path().join("logs")).unwrap();
    let fp = scenario.fingerprint().unwrap();

    assert!(store.load(&fp).unwrap().is_none());
    let first = scenario.recorded_log(Some(&store), Some(1)).unwrap();
    assert!(store.path_for(&fp).exists());

    let cached = scenario.recorded_log(Some(&store), Some(2)).unwrap();
    assert_eq!(cached, first);
}

#[test]
fn test_edited_scenario_does_not_reuse_a_cached_log() {
    let scenario = demo();
    let dir = tempfile::tempdir().unwrap();
    let store = LogStore::new(dir.path()).unwrap();
    scenario.recorded_log(Some(&store), Some(1)).unwrap();

    let mut edited = scenario.clone();
    let flare = edited.data.skills.iter_mut().find(|s| s.id == 3962).unwrap();
    flare.damage[0].damage_base = 4000.0;
    assert_ne!(edited.fingerprint().unwrap(), scenario.fingerprint().unwrap());

    let cached = edited.recorded_log(Some(&store), Some(1)).unwrap();
    let fresh = edited.recorded_log(None, Some(1)).unwrap();
    assert_eq!(cached, fresh);

    let dps = |s: &Scenario, log: &ReplayLog| {
        let (mut player, mut target) = s.build_models().unwrap();
        replay(log, &mut player, &mut target, &s.pipeline()).unwrap().dps()
    };
    let original = scenario.recorded_log(Some(&store), Some(1)).unwrap();
    assert!(dps(&edited, &cached) > dps(&scenario, &original));
}

#[test]
fn test_corrupt_cache_is_reported() {
    let scenario = demo();
    let dir = tempfile::tempdir().unwrap();
    let store = LogStore::new(dir.path()).unwrap();
    scenario.recorded_log(Some(&store), Some(1)).unwrap();

    let path = store.path_for(&scenario.fingerprint().unwrap());
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x55;
    std::fs::write(&path, bytes).unwrap();

    let err = scenario.recorded_log(Some(&store), Some(1)).unwrap_err();
    assert!(matches!(err, SimError::CorruptLog(_)));
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_random_fights_bypass_the_cache() {
    let mut scenario = demo();
    scenario.fight.procs_enabled = true;
    let dir = tempfile::tempdir().unwrap();
    let store = LogStore::new(dir.path()).unwrap();

    scenario.recorded_log(Some(&store), Some(3)).unwrap();
    assert!(!store.path_for(&scenario.fingerprint().unwrap()).exists());
}
