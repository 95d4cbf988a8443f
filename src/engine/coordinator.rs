//! Run loop: paginate, filter, dispatch into the worker pool, drain.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::context::{RunContext, RunSummary};
use super::control::PauseController;
use super::task::Pipeline;
use crate::api::{ClientFilter, ItemDescriptor, Paginator};
use crate::ledger::Ledger;

/// Why dispatching ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Exit {
    Exhausted,
    TargetReached,
    Stopped,
    SourceError(String),
}

pub(crate) struct Coordinator {
    pub ctx: Arc<RunContext>,
    pub paginator: Paginator,
    pub filter: ClientFilter,
    pub ledger: Arc<Ledger>,
    pub pipeline: Arc<Pipeline>,
    pub pause: PauseController,
    pub workers: usize,
}

impl Coordinator {
    /// Drives the run to completion and returns its summary.
    ///
    /// Pause and stop are honored before each dequeue and before each page
    /// fetch. A unit already dispatched runs to a terminal outcome, retries
    /// included, unless the stop is forced.
    #[instrument(skip_all, fields(workers = self.workers, run_target = %self.ctx.target()))]
    pub(crate) async fn run(mut self) -> RunSummary {
        info!("run started");
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<()> = JoinSet::new();

        let exit = self.dispatch(&semaphore, &mut tasks).await;
        debug!(exit = ?exit, in_flight = tasks.len(), "dispatch finished, draining");

        let forced = self.drain(&mut tasks).await;
        self.ctx.add_page_retries(self.paginator.retries());
        self.ctx.finish();

        // A stop that arrives while draining still cut the run short.
        let interrupted = forced || self.ctx.shutdown.is_stopping();
        let source_error = match exit {
            Exit::SourceError(message) => Some(message),
            _ => None,
        };
        let summary = self.ctx.summary(interrupted, source_error);
        info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            filtered = summary.filtered,
            failed = summary.failed,
            retried = summary.retried,
            pages = summary.pages,
            bytes = summary.bytes,
            elapsed_ms = u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
            interrupted,
            "run finished"
        );
        summary
    }

    async fn dispatch(&mut self, semaphore: &Arc<Semaphore>, tasks: &mut JoinSet<()>) -> Exit {
        let shutdown = self.ctx.shutdown.clone();
        let mut buffer: VecDeque<ItemDescriptor> = VecDeque::new();

        loop {
            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }

            if shutdown.is_stopping() {
                return Exit::Stopped;
            }
            if self.ctx.target_reached() {
                return Exit::TargetReached;
            }

            if self.pause.is_paused() {
                debug!("paused, waiting");
                tokio::select! {
                    () = self.pause.resumed() => continue,
                    () = shutdown.stopping() => return Exit::Stopped,
                }
            }

            let Some(item) = buffer.pop_front() else {
                if self.paginator.is_exhausted() {
                    return Exit::Exhausted;
                }
                let wanted = self.ctx.remaining();
                let page = tokio::select! {
                    page = self.paginator.next_page(wanted) => page,
                    () = shutdown.stopping() => return Exit::Stopped,
                };
                match page {
                    Ok(Some(page)) => {
                        self.ctx.add_page();
                        let total = page.items.len();
                        buffer.extend(page.items.into_iter().filter(|item| self.filter.accepts(item)));
                        debug!(
                            page = self.paginator.pages_fetched(),
                            total,
                            accepted = buffer.len(),
                            malformed = page.malformed,
                            "page queued"
                        );
                    }
                    Ok(None) => return Exit::Exhausted,
                    Err(e) => {
                        error!(error = %e, "pagination failed");
                        return Exit::SourceError(e.to_string());
                    }
                }
                continue;
            };

            if self.ledger.seen(&item.id) || self.ctx.is_in_flight(&item.id) {
                debug!(item_id = %item.id, "skipping known item");
                self.ctx.add_skipped();
                continue;
            }

            // Never hold more units than outcomes still needed.
            while self.ctx.slots_full() {
                tokio::select! {
                    joined = tasks.join_next() => match joined {
                        Some(joined) => log_join(joined),
                        None => break,
                    },
                    () = shutdown.stopping() => return Exit::Stopped,
                }
            }
            if self.ctx.target_reached() {
                return Exit::TargetReached;
            }

            let permit = tokio::select! {
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("worker semaphore closed");
                        return Exit::Stopped;
                    }
                },
                () = shutdown.stopping() => return Exit::Stopped,
            };

            // Pause may have arrived while waiting for a worker.
            if self.pause.is_paused() {
                buffer.push_front(item);
                drop(permit);
                continue;
            }

            if !self.ctx.claim(&item.id) {
                continue;
            }
            let ctx = Arc::clone(&self.ctx);
            let pipeline = Arc::clone(&self.pipeline);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = pipeline.process(&item, &ctx).await;
                ctx.complete(&item.id, outcome);
            });
        }
    }

    /// Waits for dispatched units. Returns true if a forced stop abandoned them.
    async fn drain(&self, tasks: &mut JoinSet<()>) -> bool {
        let shutdown = self.ctx.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                () = shutdown.forced() => {
                    warn!(abandoned = tasks.len(), "forced stop, abandoning in-flight transfers");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    self.ctx.release_all();
                    return true;
                }
                joined = tasks.join_next() => match joined {
                    Some(joined) => log_join(joined),
                    None => return false,
                },
            }
        }
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined
        && e.is_panic()
    {
        error!(error = %e, "work unit panicked");
    }
}
