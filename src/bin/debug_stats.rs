//! Debug script to print final player and target stats of a scenario

use rotation_sim::attribute::AttributeModel;
use rotation_sim::config::Scenario;
use std::env;

fn print_model(title: &str, model: &AttributeModel) {
    println!("\n=== {} (level {}, npc: {}) ===", title, model.level, model.is_npc);
    for (name, value) in model.derived_values() {
        println!("  {:<40} {:>10}", name, value);
    }
    let nonzero: Vec<_> = model.snapshot().into_iter().filter(|(_, v)| *v != 0).collect();
    if !nonzero.is_empty() {
        println!("  --- set stats ---");
        for (name, value) in nonzero {
            println!("  {:<40} {:>10}", name, value);
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("usage: debug-stats <scenario.yaml>");
        std::process::exit(2);
    };

    let scenario = match Scenario::from_file(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading scenario: {}", e);
            std::process::exit(1);
        }
    };

    match scenario.build_models() {
        Ok((player, target)) => {
            print_model("PLAYER", &player);
            print_model("TARGET", &target);
        }
        Err(e) => {
            eprintln!("Error building models: {}", e);
            std::process::exit(1);
        }
    }
}
