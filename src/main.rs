//! collateral-engine CLI
//!
//! Run margin-call allocations from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Allocate collateral for the margin call in a scenario file
//! collateral-engine allocate --input scenario.json
//!
//! # Output as JSON, with a custom baseline
//! collateral-engine allocate --input scenario.json --config engine.json --format json
//!
//! # Show the baseline policy table
//! collateral-engine baseline
//!
//! # Generate a random scenario for testing
//! collateral-engine generate --holdings 50 --rqv 2500000
//! ```

use collateral_engine::core::currency::CurrencyCode;
use collateral_engine::engine::{AllocationEngine, EngineConfig};
use collateral_engine::simulation::scenario::{generate_random_scenario, Scenario, ScenarioConfig};
use rust_decimal::Decimal;
use std::fs;
use std::process;

fn print_usage() {
    eprintln!(
        r#"collateral-engine: securities-collateral allocation for margin calls

USAGE:
    collateral-engine <COMMAND> [OPTIONS]

COMMANDS:
    allocate    Run start_allocation against a scenario file
    baseline    Print the baseline policy table
    generate    Generate a random scenario (for testing)
    help        Show this message

OPTIONS (allocate):
    --input <FILE>      Path to JSON scenario file
    --config <FILE>     Path to JSON engine config (default: built-in)
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (baseline):
    --config <FILE>     Path to JSON engine config (default: built-in)
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (generate):
    --holdings <N>      Number of lots (default: 20)
    --rqv <AMOUNT>      Required qualifying value (default: 1000000)
    --currencies <LIST> Comma-separated currency codes (default: USD)
    --output <FILE>     Write to file instead of stdout

ENVIRONMENT:
    RUST_LOG            Log filter (default: info)

EXAMPLES:
    collateral-engine allocate --input scenario.json
    collateral-engine allocate --input scenario.json --format json
    collateral-engine baseline --format json
    collateral-engine generate --holdings 50 --rqv 2500000
    collateral-engine generate --currencies USD,EUR,GBP --output test.json"#
    );
}

fn required_value(args: &[String], i: usize, flag: &str, what: &str) -> String {
    args.get(i).cloned().unwrap_or_else(|| {
        eprintln!("{} requires {}", flag, what);
        process::exit(1);
    })
}

fn load_config(path: Option<&str>) -> EngineConfig {
    match path {
        Some(path) => EngineConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            process::exit(1);
        }),
        None => EngineConfig::default(),
    }
}

fn cmd_allocate(args: &[String]) {
    let mut input_path = None;
    let mut config_path = None;
    let mut format = "text".to_string();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => {
                i += 1;
                input_path = Some(required_value(args, i, "--input", "a file path"));
            }
            "--config" => {
                i += 1;
                config_path = Some(required_value(args, i, "--config", "a file path"));
            }
            "--format" => {
                i += 1;
                format = required_value(args, i, "--format", "'text' or 'json'");
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let path = input_path.unwrap_or_else(|| {
        eprintln!("Error: --input <FILE> is required");
        process::exit(1);
    });

    let config = load_config(config_path.as_deref());
    let scenario = Scenario::load(&path).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        process::exit(1);
    });
    let harness = scenario.harness().unwrap_or_else(|e| {
        eprintln!("Error loading scenario: {}", e);
        process::exit(1);
    });

    let engine = AllocationEngine::new(config);
    let report = engine
        .start_allocation(&harness.services(), &scenario.request())
        .unwrap_or_else(|e| {
            eprintln!("Allocation failed: {}", e);
            if e.is_retryable() {
                eprintln!("(retryable)");
            }
            process::exit(2);
        });

    if format == "json" {
        let json = serde_json::to_string_pretty(&report).unwrap_or_else(|e| {
            eprintln!("Error serializing report: {}", e);
            process::exit(1);
        });
        println!("{}", json);
    } else {
        println!("{}", report);
    }
}

fn cmd_baseline(args: &[String]) {
    let mut config_path = None;
    let mut format = "text".to_string();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(required_value(args, i, "--config", "a file path"));
            }
            "--format" => {
                i += 1;
                format = required_value(args, i, "--format", "'text' or 'json'");
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let config = load_config(config_path.as_deref());
    if format == "json" {
        let json = serde_json::to_string_pretty(&config.baseline).unwrap_or_else(|e| {
            eprintln!("Error serializing baseline: {}", e);
            process::exit(1);
        });
        println!("{}", json);
    } else {
        print!("{}", config.baseline);
    }
}

fn cmd_generate(args: &[String]) {
    let mut config = ScenarioConfig::default();
    let mut output_path: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--holdings" => {
                i += 1;
                config.holding_count = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| {
                        eprintln!("--holdings requires a number");
                        process::exit(1);
                    });
            }
            "--rqv" => {
                i += 1;
                config.rqv = args
                    .get(i)
                    .and_then(|s| s.parse::<Decimal>().ok())
                    .filter(|v| *v >= Decimal::ZERO)
                    .unwrap_or_else(|| {
                        eprintln!("--rqv requires a non-negative amount");
                        process::exit(1);
                    });
            }
            "--currencies" => {
                i += 1;
                let list = required_value(args, i, "--currencies", "a comma-separated list");
                config.currencies = list
                    .split(',')
                    .map(|s| CurrencyCode::new(s.trim()))
                    .collect();
            }
            "--output" => {
                i += 1;
                output_path = Some(required_value(args, i, "--output", "a file path"));
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let scenario = generate_random_scenario(&config);
    let json = serde_json::to_string_pretty(&scenario).unwrap_or_else(|e| {
        eprintln!("Error serializing scenario: {}", e);
        process::exit(1);
    });

    if let Some(path) = output_path {
        fs::write(&path, &json).unwrap_or_else(|e| {
            eprintln!("Error writing to '{}': {}", path, e);
            process::exit(1);
        });
        eprintln!(
            "Generated {} lots, RQV {} {} → {}",
            config.holding_count, scenario.transaction.rqv, scenario.transaction.currency, path
        );
    } else {
        println!("{}", json);
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "allocate" => cmd_allocate(rest),
        "baseline" => cmd_baseline(rest),
        "generate" => cmd_generate(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
