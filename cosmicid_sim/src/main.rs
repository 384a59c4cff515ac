//! Cosmic-ID Simulator CLI
//!
//! Runs the cosmic-removal analysis over synthetic events, a recorded
//! JSON-lines file, or the named scenarios.

use std::path::PathBuf;

use clap::Parser;
use cosmicid_core::{CosmicIdConfig, CosmicRemovalAnalyzer};
use cosmicid_env::{EventSource, JsonLinesSource};
use cosmicid_sim::scenarios::ScenarioId;
use cosmicid_sim::{run_parallel, run_source, EventMix, OracleSource, RunExport, RunSummary, ScenarioRunner};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Cosmic-ray removal analysis over simulated or recorded events
#[derive(Parser, Debug)]
#[command(name = "cosmicid-sim")]
#[command(about = "Run cosmic-ray track removal over synthetic or recorded events", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of synthetic events
    #[arg(short = 'n', long, default_value = "100")]
    events: u32,

    /// Scenario to run (contained_beam, stopping_cosmic, crt_tagged, cathode_stitch, mixed, all)
    #[arg(short = 'S', long)]
    scenario: Option<String>,

    /// JSON-lines event file to analyse instead of synthetic events
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// JSON configuration file (missing fields take defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads
    #[arg(short, long, default_value = "1")]
    workers: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the run report to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose {
        "debug"
    } else if args.json {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    if !args.json {
        info!("Cosmic-ID Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut config = match &args.config {
        Some(path) => CosmicIdConfig::from_json_file(path).unwrap_or_else(|e| {
            error!("Cannot load {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => CosmicIdConfig::default(),
    };
    config.verbose |= args.verbose;

    // Determine base seed
    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    if let Some(scenario) = &args.scenario {
        run_scenarios(&args, scenario, seed, config);
        return;
    }

    let analyzer = CosmicRemovalAnalyzer::new(config.clone()).unwrap_or_else(|e| {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    });

    let mut source: Box<dyn EventSource> = match &args.input {
        Some(path) => match JsonLinesSource::open(path) {
            Ok(source) => Box::new(source),
            Err(e) => {
                error!("Cannot open {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Box::new(
            OracleSource::new(seed, args.events, EventMix::default())
                .with_detector(config.active_volume, config.drift_velocity),
        ),
    };
    let name = source.name().to_string();

    let summary = if args.workers > 1 {
        let mut events = Vec::new();
        let mut unreadable = 0;
        while let Some(next) = source.next_event() {
            match next {
                Ok(event) => events.push(event),
                Err(e) => {
                    error!("{}: {}", name, e);
                    unreadable += 1;
                }
            }
        }
        match run_parallel(&analyzer, &events, args.workers) {
            Ok(mut summary) => {
                summary.report.events_skipped += unreadable;
                summary
            }
            Err(e) => {
                error!("Run failed: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        run_source(&analyzer, source.as_mut())
    };

    print_summary(&args, &name, &summary);

    if let Some(path) = &args.export {
        let export = RunExport::new(&name, seed, config, &summary);
        match export.write_to_file(path) {
            Ok(()) => info!("Exported report to {}", path),
            Err(e) => error!("Failed to write export: {:?}", e),
        }
    }
}

fn print_summary(args: &Args, name: &str, summary: &RunSummary) {
    let report = &summary.report;
    if args.json {
        let json = serde_json::json!({
            "source": name,
            "report": report,
            "beam_efficiency": report.beam_efficiency(),
            "cosmic_rejection": report.cosmic_rejection(),
            "rejections": summary
                .rejections
                .iter()
                .map(|(cut, count)| (cut.name().to_string(), *count))
                .collect::<std::collections::BTreeMap<_, _>>(),
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Cannot render report: {}", e),
        }
        return;
    }

    println!("{}", report);
    for (cut, count) in &summary.rejections {
        info!("  rejected by {:<20} {}", cut.name(), count);
    }
    if let Some(efficiency) = report.beam_efficiency() {
        info!("Beam efficiency:  {:.1}%", efficiency * 100.0);
    }
    if let Some(rejection) = report.cosmic_rejection() {
        info!("Cosmic rejection: {:.1}%", rejection * 100.0);
    }
}

fn run_scenarios(args: &Args, scenario: &str, seed: u64, config: CosmicIdConfig) {
    let scenarios: Vec<ScenarioId> = if scenario == "all" {
        ScenarioId::all()
    } else {
        vec![scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: contained_beam, stopping_cosmic, crt_tagged, cathode_stitch, mixed, all");
            std::process::exit(1);
        })]
    };

    let mut runner = ScenarioRunner::new(seed).with_workers(args.workers);
    if args.config.is_some() {
        runner = runner.with_config(config.clone());
    }

    let mut results = Vec::new();
    for id in scenarios {
        match runner.run(id) {
            Ok(result) => {
                if !args.json {
                    if result.passed {
                        info!("✓ {} (seed={}) PASSED", id.name(), seed);
                    } else {
                        error!(
                            "✗ {} (seed={}) FAILED: {}",
                            id.name(),
                            seed,
                            result.failure_reason.as_deref().unwrap_or("unknown")
                        );
                    }
                }
                results.push(result);
            }
            Err(e) => {
                error!("✗ {} could not run: {}", id.name(), e);
                std::process::exit(1);
            }
        }
    }

    let total = results.len();
    let failed = results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "events": r.events,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Cannot render results: {}", e),
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed, total);
        }
    }

    if let Some(path) = &args.export {
        let export = RunExport::from_scenarios(seed, config, results);
        if let Err(e) = export.write_to_file(path) {
            error!("Failed to write export: {:?}", e);
        } else {
            info!("Exported scenario results to {}", path);
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
}
