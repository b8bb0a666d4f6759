//! CLI entry point for the rotation simulator

use clap::{Parser, ValueEnum};
use rotation_sim::{
    config::Scenario,
    replay::{replay, LogStore},
    report::FightReport,
    sensitivity::analyze,
    simulation::SimOptions,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "rotation-sim")]
#[command(version)]
#[command(about = "Tick-ordered combat rotation simulator with stat sensitivity", long_about = None)]
struct Args {
    /// Path to the scenario file (YAML or JSON)
    #[arg(short, long)]
    scenario: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Directory caching recorded logs by scenario fingerprint
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Replay the recorded fight once per stat category
    #[arg(long, default_value = "false")]
    sensitivity: bool,

    /// Replay workers (defaults to the number of CPUs)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Proc RNG seed (overrides the fight's seed)
    #[arg(long)]
    seed: Option<u64>,

    /// Show timing information
    #[arg(short, long, default_value = "false")]
    timing: bool,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args, scenario: &Scenario) -> rotation_sim::Result<FightReport> {
    if !args.sensitivity {
        let outcome = scenario.run(SimOptions {
            record: false,
            seed: args.seed,
        })?;
        return Ok(FightReport::new(&outcome.ledger, outcome.elapsed()));
    }

    let store = args.cache_dir.as_ref().map(LogStore::new).transpose()?;
    let log = scenario.recorded_log(store.as_ref(), args.seed)?;
    let pipeline = scenario.pipeline();

    // The unperturbed replay reproduces the recorded fight
    let (mut player, mut target) = scenario.build_models()?;
    let baseline = replay(&log, &mut player, &mut target, &pipeline)?;
    let sensitivity = analyze(
        &log,
        || scenario.build_models(),
        &pipeline,
        &scenario.sensitivity,
        &scenario.reference,
        args.workers,
    )?;
    Ok(FightReport::new(&baseline.ledger, baseline.elapsed).with_sensitivity(sensitivity))
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // Load scenario
    let scenario = match Scenario::from_file(&args.scenario) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading scenario: {}", e);
            std::process::exit(1);
        }
    };

    let start = Instant::now();
    let report = match run(&args, &scenario) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error ({:?}): {}", e.kind(), e);
            std::process::exit(1);
        }
    };
    let elapsed = start.elapsed();

    match args.output {
        OutputFormat::Text => {
            print!("{}", report.render_text());
            if args.timing {
                println!();
                println!("--- Performance ---");
                println!("Total time: {:.3}s", elapsed.as_secs_f64());
            }
        }
        OutputFormat::Json => {
            let mut output = serde_json::json!({ "report": report });
            if args.timing {
                output["elapsed_seconds"] = serde_json::json!(elapsed.as_secs_f64());
            }
            match serde_json::to_string_pretty(&output) {
                Ok(s) => println!("{}", s),
                Err(e) => {
                    eprintln!("Error encoding report: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
