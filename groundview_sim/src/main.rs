//! GroundView scenario CLI.
//!
//! Replays seeded synthetic sensor streams through the tracking pipeline
//! and checks the resulting world state. Any failure reproduces from its
//! seed number.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

mod runner;
mod scenarios;

use runner::ScenarioRunner;
use scenarios::ScenarioId;

#[derive(Parser, Debug)]
#[command(name = "groundview_sim", about = "Run synthetic tracking scenarios")]
struct Args {
    /// Scenario name (crossing, convoy, dropout) or "all".
    #[arg(long, default_value = "all")]
    scenario: String,

    /// Seed for report generation.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Scenario duration in seconds.
    #[arg(long, default_value_t = 20.0)]
    duration_secs: f64,

    /// Track TTL in milliseconds. Explicit: the tracker has no default.
    #[arg(long, default_value_t = 2000)]
    ttl_ms: i64,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let scenarios = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match ScenarioId::from_name(&args.scenario) {
            Some(scenario) => vec![scenario],
            None => anyhow::bail!("unknown scenario: {}", args.scenario),
        }
    };

    let runner = ScenarioRunner::new(args.seed)
        .with_duration(args.duration_secs)
        .with_ttl_ms(args.ttl_ms);

    let mut failures = 0usize;
    for scenario in scenarios {
        let result = runner.run(scenario);
        if result.passed {
            info!(
                scenario = scenario.name(),
                reports = result.total_reports,
                cohorts = result.cohorts,
                born = result.tracks_born,
                expired = result.tracks_expired,
                stale = result.stale_dropped,
                tracks = result.final_track_count,
                "scenario passed"
            );
        } else {
            error!(
                scenario = scenario.name(),
                seed = result.seed,
                reason = result.failure_reason.as_deref().unwrap_or("unknown"),
                "scenario failed"
            );
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} scenario(s) failed");
    }
    Ok(())
}
