//! Acquisition engine: the in-process control surface.
//!
//! [`Engine`] owns the collaborators of a run (page source, media source,
//! catalog, ledger and storage layout) and exposes `start`, `stop`,
//! `pause`/`resume` and `status`. Each [`Engine::start`] reconciles the
//! catalog against the disk, then spawns one coordinator task that
//! paginates and feeds a bounded worker pool.
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::api::FilterCriteria;
//! use harvester_core::config::{EngineConfig, Target};
//! use harvester_core::engine::Engine;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig {
//!     target: Target::Count(10),
//!     ..EngineConfig::default()
//! };
//! let engine = Engine::open(config).await?;
//! let handle = engine.start(FilterCriteria::default()).await?;
//! let summary = handle.wait().await?;
//! println!("downloaded {}", summary.downloaded);
//! # Ok(())
//! # }
//! ```

mod context;
mod control;
mod coordinator;
mod task;

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub use context::{EngineStatus, Phase, RunSummary};
pub use control::{PauseController, Shutdown};

use crate::api::{ApiClient, ApiError, FilterCriteria, PageSource, Paginator};
use crate::catalog::{Catalog, CatalogError, RecordRepository};
use crate::config::{ConfigError, EngineConfig};
use crate::db::{Database, DbError};
use crate::download::{DownloadError, HttpClient, MediaSource};
use crate::ledger::{Ledger, LedgerError};
use crate::storage::{StorageError, StorageLayout};
use context::RunContext;
use coordinator::Coordinator;
use task::Pipeline;

/// Errors that prevent a run from starting or completing.
///
/// Per-item failures never surface here; they are recorded and counted.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("persistence unavailable: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    /// `start` was called while a run is still active.
    #[error("a run is already in progress")]
    AlreadyRunning,

    /// The coordinator task panicked or was cancelled.
    #[error("run task failed: {message}")]
    TaskFailed { message: String },
}

/// The acquisition engine.
pub struct Engine {
    config: Arc<EngineConfig>,
    pages: Arc<dyn PageSource>,
    media: Arc<dyn MediaSource>,
    records: Arc<dyn RecordRepository>,
    ledger: Arc<Ledger>,
    layout: StorageLayout,
    pause: PauseController,
    current: Mutex<Option<Arc<RunContext>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("output_root", &self.layout.root())
            .field("ledger_entries", &self.ledger.len())
            .field("paused", &self.pause.is_paused())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Opens the engine against the configured database, ledger and API.
    ///
    /// # Errors
    ///
    /// Fails before any fetch if the configuration is invalid or the database
    /// or ledger cannot be opened.
    #[instrument(skip_all, fields(output_root = %config.output_root.display()))]
    pub async fn open(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let db = Database::new(&config.database_path()).await?;
        let ledger = Ledger::open(&config.ledger_path()).await?;
        let pages = ApiClient::new(&config.api_base, config.api_key.clone(), &config.http)?;
        let media = HttpClient::new(&config.http)?;

        Self::with_components(
            config,
            Arc::new(pages),
            Arc::new(media),
            Arc::new(Catalog::new(db)),
            Arc::new(ledger),
        )
        .await
    }

    /// Builds an engine from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the output root
    /// cannot be created.
    pub async fn with_components(
        config: EngineConfig,
        pages: Arc<dyn PageSource>,
        media: Arc<dyn MediaSource>,
        records: Arc<dyn RecordRepository>,
        ledger: Arc<Ledger>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let layout = StorageLayout::new(&config.output_root, config.organize_by_category);
        layout.prepare().await?;

        Ok(Self {
            config: Arc::new(config),
            pages,
            media,
            records,
            ledger,
            layout,
            pause: PauseController::new(),
            current: Mutex::new(None),
        })
    }

    /// Marks `success` records whose file is gone as `file_deleted`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Catalog`] if the catalog cannot be read or updated.
    pub async fn reconcile(&self) -> Result<usize, EngineError> {
        let updated = self.records.reconcile().await?;
        if updated > 0 {
            info!(updated, "catalog reconciled with disk");
        }
        Ok(updated)
    }

    /// Starts a run for `criteria` and returns its handle.
    ///
    /// Reconciliation runs first; the engine starts unpaused.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRunning`] while another run is active,
    /// or the reconciliation error.
    #[instrument(skip_all, fields(run_target = %self.config.target))]
    pub async fn start(&self, criteria: FilterCriteria) -> Result<RunHandle, EngineError> {
        if self.active_run().is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        self.reconcile().await?;
        self.pause.resume();

        let shutdown = Shutdown::new();
        let ctx = Arc::new(RunContext::new(self.config.target, shutdown.clone()));
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if current.as_ref().is_some_and(|run| !run.is_done()) {
                return Err(EngineError::AlreadyRunning);
            }
            *current = Some(Arc::clone(&ctx));
        }

        let done = CancellationToken::new();
        if self.config.handle_signals {
            // Detached; ends with the run or after a forced stop.
            drop(shutdown.install_signal_handler(done.clone()));
        }

        let coordinator = Coordinator {
            ctx: Arc::clone(&ctx),
            paginator: Paginator::new(
                Arc::clone(&self.pages),
                criteria,
                self.config.page_size,
                self.config.page_delay,
                self.config.retry_policy(),
            ),
            filter: self.config.client_filter.clone(),
            ledger: Arc::clone(&self.ledger),
            pipeline: Arc::new(Pipeline {
                media: Arc::clone(&self.media),
                records: Arc::clone(&self.records),
                ledger: Arc::clone(&self.ledger),
                layout: self.layout.clone(),
                config: Arc::clone(&self.config),
                retry: self.config.retry_policy(),
            }),
            pause: self.pause.clone(),
            workers: self.config.workers,
        };

        let task = tokio::spawn(async move {
            let summary = coordinator.run().await;
            done.cancel();
            summary
        });

        Ok(RunHandle {
            task,
            ctx,
            pause: self.pause.clone(),
        })
    }

    /// Requests a graceful stop of the active run, if any.
    pub fn stop(&self) {
        if let Some(run) = self.active_run() {
            run.shutdown.stop();
        }
    }

    /// Stops new transfers from starting.
    pub fn pause(&self) {
        self.pause.pause();
    }

    /// Lets new transfers start again.
    pub fn resume(&self) {
        self.pause.resume();
    }

    /// Flips pause; returns true if now paused.
    pub fn toggle_pause(&self) -> bool {
        self.pause.toggle()
    }

    /// Snapshot of the latest run, or an idle status before the first.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(run) => run.snapshot(&self.pause),
            None => EngineStatus::idle(),
        }
    }

    /// The dedup ledger.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn active_run(&self) -> Option<Arc<RunContext>> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.as_ref().filter(|run| !run.is_done()).cloned()
    }
}

/// Handle to one spawned run.
#[derive(Debug)]
pub struct RunHandle {
    task: JoinHandle<RunSummary>,
    ctx: Arc<RunContext>,
    pause: PauseController,
}

impl RunHandle {
    /// Waits for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TaskFailed`] if the run task panicked.
    pub async fn wait(self) -> Result<RunSummary, EngineError> {
        self.task.await.map_err(|e| {
            warn!(error = %e, "run task ended abnormally");
            EngineError::TaskFailed {
                message: e.to_string(),
            }
        })
    }

    /// Requests a graceful stop: in-flight transfers finish, nothing new starts.
    pub fn stop(&self) {
        self.ctx.shutdown.stop();
    }

    /// Abandons in-flight transfers.
    pub fn force_stop(&self) {
        self.ctx.shutdown.force();
    }

    /// Snapshot of this run.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        self.ctx.snapshot(&self.pause)
    }

    /// The run's shutdown, for hosts that drive cancellation themselves.
    #[must_use]
    pub fn shutdown(&self) -> Shutdown {
        self.ctx.shutdown.clone()
    }

    /// True once the run finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
