//! Progress UI (spinner) for acquisition runs.

use std::time::Duration;

use harvester_core::engine::{EngineStatus, Phase, RunHandle};
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};

/// Shows a spinner until `handle` finishes. No-op when `enabled` is false.
pub(crate) async fn watch(handle: &RunHandle, enabled: bool) {
    if !enabled {
        return;
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));

    while !handle.is_finished() {
        spinner.set_message(status_line(&handle.status()));
        tokio::time::sleep(Duration::from_millis(120)).await;
    }

    spinner.finish_and_clear();
}

fn status_line(status: &EngineStatus) -> String {
    let progress = match status.total_target.count() {
        Some(target) => format!("{}/{target}", status.downloaded + status.failed),
        None => format!("{}", status.downloaded + status.failed),
    };
    let state = match status.phase {
        Phase::Paused => " (paused, p+Enter to resume)",
        Phase::Stopping => " (stopping)",
        _ => "",
    };
    let eta = status
        .eta()
        .map(|eta| format!(", ETA {}", HumanDuration(eta)))
        .unwrap_or_default();
    format!(
        "[{progress}] {} downloaded, {} skipped, {} filtered, {} failed, {} active | {} at {}/s{eta}{state}",
        status.downloaded,
        status.skipped,
        status.filtered,
        status.failed,
        status.in_flight,
        HumanBytes(status.bytes),
        HumanBytes(status.bytes_per_sec()),
    )
}
