//! Churn Simulator CLI
//!
//! Run churn scenarios on a virtual clock, or dry-run an arbitrary
//! configuration and compare it against the analytic model.

use churn_core::{ChurnConfig, ChurnReport, TrialPolicy};
use churn_sim::scenarios::ScenarioId;
use churn_sim::{ChurnExport, ScenarioResult, ScenarioRunner};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Churn process simulation CLI
#[derive(Parser, Debug)]
#[command(name = "churn-sim")]
#[command(about = "Run deterministic churn simulations", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (steady_state, frozen, failing_kill_hook, ..., all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Epochs per run
    #[arg(short, long, default_value = "20000")]
    epochs: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the run (series, actions, report) to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Ad-hoc run: group size, anchor included
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Ad-hoc run: target failures per minute across the group
    #[arg(long, default_value = "5.0")]
    failure_rate: f64,

    /// Ad-hoc run: target mean reconnection time in minutes
    #[arg(long, default_value = "0.333333")]
    reconnect_min: f64,

    /// Ad-hoc run: epoch length in seconds
    #[arg(long, default_value = "1.0")]
    epoch_secs: f64,

    /// Ad-hoc run: nodes online at start (default: steady-state expectation)
    #[arg(long)]
    initial_online: Option<usize>,

    /// Ad-hoc run: cap per-epoch probabilities at 1 instead of rejecting
    #[arg(long)]
    clamp: bool,

    /// Ad-hoc run: availability threshold (default: majority of the group)
    #[arg(short, long)]
    threshold: Option<usize>,

    /// Ad-hoc run: load the configuration from a JSON file
    #[arg(short, long)]
    config: Option<String>,
}

impl Args {
    fn is_adhoc(&self) -> bool {
        self.nodes.is_some() || self.config.is_some()
    }

    fn adhoc_config(&self) -> Result<ChurnConfig, String> {
        let mut config = match (&self.config, self.nodes) {
            (Some(path), _) => ChurnConfig::load(path).map_err(|e| e.to_string())?,
            (None, Some(nodes)) => ChurnConfig::new(nodes, self.failure_rate, self.reconnect_min)
                .with_epoch_duration(self.epoch_secs),
            (None, None) => return Err("ad-hoc mode needs --nodes or --config".to_string()),
        };
        if let Some(initial) = self.initial_online {
            config = config.with_initial_online(initial);
        }
        if self.clamp {
            config = config.with_trial_policy(TrialPolicy::Clamp);
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn print_report(report: &ChurnReport) {
    info!("lambda_f: {:.6}/s, lambda_r: {:.6}/s, epochs: {}", report.lambda_f, report.lambda_r, report.epochs);
    info!(
        "nodes online:        expected {:>8.3}  observed {:>8.3}",
        report.theoretical_node_online, report.actual_node_online
    );
    info!(
        "time >= {:<3}         expected {:>8.3}  observed {:>8.3}",
        report.threshold, report.theoretical_time_above_thresh, report.actual_time_above_thresh
    );
    info!(
        "failures/min:        expected {:>8.3}  observed {:>8.3}",
        report.theoretical_fail_per_min, report.actual_fail_per_min
    );
    info!("reconnections/min:                      observed {:>8.3}", report.actual_rec_per_min);
    if report.has_hook_errors() {
        warn!(
            "hook errors: {} failed kills, {} failed starts",
            report.failed_failures, report.failed_reconnections
        );
    }
}

async fn run_adhoc(args: &Args, seed: u64) -> i32 {
    let config = match args.adhoc_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };
    let threshold = args.threshold.unwrap_or(config.nodes / 2 + 1);

    let runner = ScenarioRunner::new(seed).with_epochs(args.epochs);
    let run = match runner.run_config(config, threshold, false).await {
        Ok(run) => run,
        Err(e) => {
            error!("✗ ad-hoc run failed: {}", e);
            return 1;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&run.report) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize report: {}", e),
        }
    } else {
        print_report(&run.report);
    }

    if let Some(path) = &args.export {
        let mut export = ChurnExport::from_run("adhoc", seed, &run);
        export.finalize(true);
        match export.write_to_file(path) {
            Ok(()) => info!("Exported {} epochs to {}", export.epochs.len(), path),
            Err(e) => error!("Failed to write export: {}", e),
        }
    }
    0
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    if args.is_adhoc() {
        std::process::exit(run_adhoc(&args, base_seed).await);
    }

    if !args.json {
        info!("Churn Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<_> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(1);
            }
        }
    };

    if args.export.is_some() && (scenarios.len() > 1 || args.seeds > 1) {
        eprintln!("Error: --export only supports a single scenario and seed");
        std::process::exit(1);
    }

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed).with_epochs(args.epochs);

        for scenario in &scenarios {
            let result = runner.run(*scenario).await;

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                    if args.verbose {
                        if let Some(report) = result.report() {
                            print_report(report);
                        }
                    }
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if let (Some(path), Some(run)) = (&args.export, &result.run) {
                let mut export = ChurnExport::from_run(scenario.name(), seed, run);
                export.finalize(result.passed);
                match export.write_to_file(path) {
                    Ok(()) => info!("Exported {} epochs to {}", export.epochs.len(), path),
                    Err(e) => error!("Failed to write export: {}", e),
                }
            }

            if !result.passed {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "epochs": r.epochs,
                    "failure_reason": r.failure_reason,
                    "report": r.report(),
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize summary: {}", e),
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            // List failed seeds
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
