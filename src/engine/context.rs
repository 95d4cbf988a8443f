//! Per-run shared state: phase, counters and in-flight claims.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashSet;
use serde::Serialize;

use super::control::{PauseController, Shutdown};
use crate::config::Target;

/// Lifecycle phase reported by [`EngineStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No run has started.
    Idle,
    /// Dispatching work.
    Running,
    /// Running, but not starting new transfers.
    Paused,
    /// Stop requested; draining in-flight transfers.
    Stopping,
    /// Run finished.
    Done,
}

impl Phase {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Done => "done",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Stopping,
            4 => Self::Done,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub phase: Phase,
    pub downloaded: u64,
    pub skipped: u64,
    pub filtered: u64,
    pub failed: u64,
    pub retried: u64,
    pub pages: u64,
    pub in_flight: u64,
    pub total_target: Target,
    /// Bytes of stored media.
    pub bytes: u64,
    pub elapsed: Duration,
}

impl EngineStatus {
    /// Status before any run.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            downloaded: 0,
            skipped: 0,
            filtered: 0,
            failed: 0,
            retried: 0,
            pages: 0,
            in_flight: 0,
            total_target: Target::Unbounded,
            bytes: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Average throughput since the run started.
    #[must_use]
    pub fn bytes_per_sec(&self) -> u64 {
        throughput(self.bytes, self.elapsed)
    }

    /// Estimated time to reach a bounded target at the pace so far.
    ///
    /// `None` when unbounded, already reached, or before the first outcome.
    #[must_use]
    pub fn eta(&self) -> Option<Duration> {
        let done = self.downloaded + self.failed;
        let remaining = self.total_target.count()?.saturating_sub(done);
        if remaining == 0 || done == 0 {
            return None;
        }
        let millis = self.elapsed.as_millis() * u128::from(remaining) / u128::from(done);
        Some(Duration::from_millis(
            u64::try_from(millis).unwrap_or(u64::MAX),
        ))
    }
}

fn throughput(bytes: u64, elapsed: Duration) -> u64 {
    let millis = elapsed.as_millis();
    if millis == 0 {
        return 0;
    }
    u64::try_from(u128::from(bytes) * 1000 / millis).unwrap_or(u64::MAX)
}

/// Final counts of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Items stored.
    pub downloaded: u64,
    /// Items already in the ledger, already in flight, or already on disk.
    pub skipped: u64,
    /// Items rejected by the type allow-list.
    pub filtered: u64,
    /// Items whose retries ran out or could not be written.
    pub failed: u64,
    /// Extra fetch attempts.
    pub retried: u64,
    /// Pages fetched.
    pub pages: u64,
    /// Bytes of stored media.
    pub bytes: u64,
    /// Wall time of the run.
    pub elapsed: Duration,
    /// The run was stopped before the source or target was exhausted.
    pub interrupted: bool,
    /// Terminal pagination error, if pagination ended with one.
    pub source_error: Option<String>,
}

impl RunSummary {
    /// Average throughput over the run.
    #[must_use]
    pub fn bytes_per_sec(&self) -> u64 {
        throughput(self.bytes, self.elapsed)
    }
}

/// Terminal result of one work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitOutcome {
    /// Stored.
    Downloaded,
    /// Destination existed already.
    AlreadyStored,
    /// Found in the ledger by the worker.
    AlreadySeen,
    /// Type not allowed.
    Filtered,
    /// Retries exhausted or write failed.
    Failed,
}

const PHASE_RUNNING: u8 = 1;
const PHASE_DONE: u8 = 4;

/// State shared by the coordinator and every worker of one run.
#[derive(Debug)]
pub(crate) struct RunContext {
    phase: AtomicU8,
    downloaded: AtomicU64,
    skipped: AtomicU64,
    filtered: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    pages: AtomicU64,
    bytes: AtomicU64,
    started: Instant,
    finished_after_ms: AtomicU64,
    in_flight: DashSet<String>,
    target: Target,
    pub(crate) shutdown: Shutdown,
}

impl RunContext {
    pub(crate) fn new(target: Target, shutdown: Shutdown) -> Self {
        Self {
            phase: AtomicU8::new(PHASE_RUNNING),
            downloaded: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            pages: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            started: Instant::now(),
            finished_after_ms: AtomicU64::new(0),
            in_flight: DashSet::new(),
            target,
            shutdown,
        }
    }

    pub(crate) fn target(&self) -> Target {
        self.target
    }

    /// Success + failed outcomes, the quantity the target counts.
    pub(crate) fn outcomes(&self) -> u64 {
        self.downloaded.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst)
    }

    /// Outcomes still missing, or `None` when unbounded.
    pub(crate) fn remaining(&self) -> Option<u64> {
        self.target.count().map(|n| n.saturating_sub(self.outcomes()))
    }

    pub(crate) fn target_reached(&self) -> bool {
        self.remaining() == Some(0)
    }

    /// True when another dispatch could overshoot the target.
    pub(crate) fn slots_full(&self) -> bool {
        self.remaining()
            .is_some_and(|remaining| self.in_flight_count() >= remaining)
    }

    pub(crate) fn in_flight_count(&self) -> u64 {
        self.in_flight.len() as u64
    }

    pub(crate) fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    /// Claims `id`; false if it is already in flight.
    pub(crate) fn claim(&self, id: &str) -> bool {
        self.in_flight.insert(id.to_string())
    }

    /// Counts `outcome`, then releases the claim on `id`.
    pub(crate) fn complete(&self, id: &str, outcome: UnitOutcome) {
        let counter = match outcome {
            UnitOutcome::Downloaded => &self.downloaded,
            UnitOutcome::AlreadyStored | UnitOutcome::AlreadySeen => &self.skipped,
            UnitOutcome::Filtered => &self.filtered,
            UnitOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        // Counted before release so outcomes + in-flight never undercounts.
        self.in_flight.remove(id);
    }

    /// Drops every claim without counting, after in-flight units were aborted.
    pub(crate) fn release_all(&self) {
        self.in_flight.clear();
    }

    pub(crate) fn add_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn add_retries(&self, retries: u32) {
        self.retried.fetch_add(u64::from(retries), Ordering::SeqCst);
    }

    /// Folds in page-fetch retries counted by the paginator.
    pub(crate) fn add_page_retries(&self, retries: u64) {
        self.retried.fetch_add(retries, Ordering::SeqCst);
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn add_page(&self) {
        self.pages.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn finish(&self) {
        let millis = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.finished_after_ms.store(millis, Ordering::SeqCst);
        self.phase.store(PHASE_DONE, Ordering::SeqCst);
    }

    /// Time since start, frozen once the run is done.
    pub(crate) fn elapsed(&self) -> Duration {
        if self.is_done() {
            Duration::from_millis(self.finished_after_ms.load(Ordering::SeqCst))
        } else {
            self.started.elapsed()
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.phase.load(Ordering::SeqCst) == PHASE_DONE
    }

    pub(crate) fn snapshot(&self, pause: &PauseController) -> EngineStatus {
        let phase = match Phase::from_u8(self.phase.load(Ordering::SeqCst)) {
            Phase::Running if self.shutdown.is_stopping() => Phase::Stopping,
            Phase::Running if pause.is_paused() => Phase::Paused,
            phase => phase,
        };
        EngineStatus {
            phase,
            downloaded: self.downloaded.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            filtered: self.filtered.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            pages: self.pages.load(Ordering::SeqCst),
            in_flight: self.in_flight_count(),
            total_target: self.target,
            bytes: self.bytes.load(Ordering::SeqCst),
            elapsed: self.elapsed(),
        }
    }

    pub(crate) fn summary(&self, interrupted: bool, source_error: Option<String>) -> RunSummary {
        RunSummary {
            downloaded: self.downloaded.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            filtered: self.filtered.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            pages: self.pages.load(Ordering::SeqCst),
            bytes: self.bytes.load(Ordering::SeqCst),
            elapsed: self.elapsed(),
            interrupted,
            source_error,
        }
    }
}
