//! Integration test: stat sensitivity over the demo fight

use rotation_sim::config::Scenario;
use rotation_sim::error::SimError;
use rotation_sim::report::FightReport;
use rotation_sim::sensitivity::{analyze, Perturbation};
use std::path::PathBuf;

fn demo() -> Scenario {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/demo.yaml");
    Scenario::from_file(path).expect("demo scenario loads")
}

#[test]
fn test_default_categories_against_attack() {
    let scenario = demo();
    let log = scenario.recorded_log(None, Some(1)).unwrap();
    let report = analyze(
        &log,
        || scenario.build_models(),
        &scenario.pipeline(),
        &scenario.sensitivity,
        &scenario.reference,
        Some(2),
    )
    .unwrap();

    assert!(report.baseline_dps > 0.0);
    assert_eq!(report.entries.len(), scenario.sensitivity.len());

    let attack = report.get("attack").unwrap();
    assert!(attack.gain > 0.0);
    assert!((attack.normalized - 1.0).abs() < 1e-9);

    for name in ["critical_power", "overcome"] {
        let entry = report.get(name).unwrap();
        assert!(entry.gain > 0.0, "{name} gained {}", entry.gain);
        assert!(entry.per_step > 0.0);
    }
    for name in ["spunk", "critical", "strain", "surplus"] {
        assert!(report.get(name).unwrap().gain >= 0.0, "{name} lost dps");
    }

    let text = FightReport::new(&log_ledger(&scenario, &log), 1024)
        .with_sensitivity(report)
        .render_text();
    assert!(text.contains("reference: attack"));
}

fn log_ledger(
    scenario: &Scenario,
    log: &rotation_sim::replay::ReplayLog,
) -> rotation_sim::damage::DamageLedger {
    let (mut player, mut target) = scenario.build_models().unwrap();
    rotation_sim::replay::replay(log, &mut player, &mut target, &scenario.pipeline())
        .unwrap()
        .ledger
}

#[test]
fn test_worker_count_does_not_change_results() {
    let scenario = demo();
    let log = scenario.recorded_log(None, Some(1)).unwrap();
    let run = |workers| {
        analyze(
            &log,
            || scenario.build_models(),
            &scenario.pipeline(),
            &scenario.sensitivity,
            "attack",
            Some(workers),
        )
        .unwrap()
    };
    assert_eq!(run(1), run(4));
}

#[test]
fn test_additive_perturbation_rejected() {
    let scenario = demo();
    let log = scenario.recorded_log(None, Some(1)).unwrap();
    let bad = [Perturbation::new(
        "percent",
        [("lunar_attack_power_percent".to_string(), 100)],
    )];
    let err = analyze(&log, || scenario.build_models(), &scenario.pipeline(), &bad, "percent", None)
        .unwrap_err();
    assert!(matches!(err, SimError::InvalidConfig(_)));
}
