//! SEST DST Simulator CLI
//!
//! Run deterministic fault scenarios against the demo services.

use clap::Parser;
use sest_sim::scenarios::ScenarioId;
use sest_sim::{results_json, ScenarioResult, ScenarioRunner, MIN_LOSS_ATTEMPTS};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// SEST Deterministic Simulation Testing CLI
#[derive(Parser, Debug)]
#[command(name = "sest-sim")]
#[command(about = "Run deterministic fault scenarios for SEST", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run by name or code (basic_flow, sest-004, ..., all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Send attempts in the message loss scenario
    #[arg(
        long,
        default_value = "64",
        value_parser = clap::value_parser!(u64).range(MIN_LOSS_ATTEMPTS as u64..)
    )]
    loss_attempts: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

/// Picks the log filter: `RUST_LOG` wins, then `--json` (warnings only),
/// then `--verbose`.
fn log_directive(rust_log: Option<String>, verbose: bool, json: bool) -> String {
    match rust_log {
        Some(directive) if !directive.trim().is_empty() => directive,
        _ if json => "warn".to_string(),
        _ if verbose => "debug".to_string(),
        _ => "info".to_string(),
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let directive = log_directive(std::env::var("RUST_LOG").ok(), args.verbose, args.json);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("Invalid log filter {:?}: {}", directive, e);
        EnvFilter::new("info")
    });
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("SEST DST Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
            eprintln!("Available scenarios: {}, all", names.join(", "));
            std::process::exit(1);
        })]
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let mut all_results: Vec<ScenarioResult> = Vec::new();

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed).with_loss_attempts(args.loss_attempts as usize);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} {} (seed={}) PASSED t={} sent={} lost={}",
                        scenario.code(),
                        scenario.name(),
                        seed,
                        result.final_time,
                        result.metrics.events_sent,
                        result.metrics.events_lost
                    );
                } else {
                    error!(
                        "✗ {} {} (seed={}) FAILED: {}",
                        scenario.code(),
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        match serde_json::to_string_pretty(&results_json(&all_results)) {
            Ok(summary) => println!("{}", summary),
            Err(e) => {
                eprintln!("Failed to encode results: {}", e);
                std::process::exit(2);
            }
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directive_precedence() {
        assert_eq!(log_directive(None, false, false), "info");
        assert_eq!(log_directive(None, true, false), "debug");
        assert_eq!(log_directive(None, true, true), "warn");
        assert_eq!(
            log_directive(Some("sest_core=trace".into()), true, true),
            "sest_core=trace"
        );
        assert_eq!(log_directive(Some("  ".into()), false, false), "info");
    }

    #[test]
    fn test_loss_attempts_below_minimum_rejected() {
        assert!(Args::try_parse_from(["sest-sim", "--loss-attempts", "1"]).is_err());

        let args = Args::try_parse_from(["sest-sim", "--loss-attempts", "32"]).unwrap();
        assert_eq!(args.loss_attempts, 32);
    }
}
