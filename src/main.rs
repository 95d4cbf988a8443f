//! CLI entry point for the harvester tool.

use std::io::{self, BufRead, IsTerminal};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::api::FilterCriteria;
use harvester_core::config::{EngineConfig, load_config};
use harvester_core::engine::{Engine, RunSummary};
use indicatif::{HumanBytes, HumanDuration};
use tracing::{debug, info, warn};

mod cli;
mod progress;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    // Defaults < config file < flags
    let mut config = EngineConfig {
        handle_signals: true,
        ..EngineConfig::default()
    };
    let mut criteria = FilterCriteria::default();
    if let Some(file) = load_config(args.config.as_deref()).context("loading config file")? {
        file.apply_to(&mut config);
        file.apply_criteria(&mut criteria);
    }
    let overrides = args.overrides();
    overrides.apply_to(&mut config);
    overrides.apply_criteria(&mut criteria);

    info!(
        output = %config.output_root.display(),
        workers = config.workers,
        run_target = %config.target,
        sort = %criteria.sort,
        period = %criteria.period,
        "Harvester starting"
    );

    let engine = Arc::new(
        Engine::open(config)
            .await
            .context("opening download history")?,
    );

    if io::stdin().is_terminal() {
        spawn_pause_toggle(Arc::clone(&engine));
    }

    let handle = engine.start(criteria).await.context("starting run")?;
    progress::watch(&handle, io::stderr().is_terminal() && !args.quiet).await;
    let summary = handle.wait().await?;

    report(&summary);
    if let Some(error) = &summary.source_error {
        warn!(%error, "pagination ended early");
    }
    Ok(())
}

/// Toggles pause on each `p` line from stdin.
///
/// Runs on a plain thread: a blocking stdin read must not hold up runtime
/// shutdown at exit.
fn spawn_pause_toggle(engine: Arc<Engine>) {
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("p") {
                let paused = engine.toggle_pause();
                eprintln!("{}", if paused { "Paused" } else { "Resumed" });
            }
        }
    });
}

fn report(summary: &RunSummary) {
    println!("{}", summary_line(summary));
}

fn summary_line(summary: &RunSummary) -> String {
    let headline = if summary.interrupted {
        "Interrupted"
    } else {
        "Done"
    };
    format!(
        "{headline}: {} downloaded, {} skipped, {} filtered, {} failed ({} retries, {} pages); {} in {} at {}/s",
        summary.downloaded,
        summary.skipped,
        summary.filtered,
        summary.failed,
        summary.retried,
        summary.pages,
        HumanBytes(summary.bytes),
        HumanDuration(summary.elapsed),
        HumanBytes(summary.bytes_per_sec()),
    )
}
