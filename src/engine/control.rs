//! Pause/resume and shutdown signalling.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared pause flag.
///
/// While paused the coordinator starts no new transfers; transfers already
/// running finish normally. Clones share the flag.
#[derive(Debug, Clone)]
pub struct PauseController {
    state: Arc<watch::Sender<bool>>,
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseController {
    /// Creates a controller in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(watch::Sender::new(false)),
        }
    }

    /// True while paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.state.borrow()
    }

    /// Stops new transfers from starting.
    pub fn pause(&self) {
        if !self.state.send_replace(true) {
            info!("paused");
        }
    }

    /// Lets new transfers start again.
    pub fn resume(&self) {
        if self.state.send_replace(false) {
            info!("resumed");
        }
    }

    /// Flips the state; returns true if now paused.
    pub fn toggle(&self) -> bool {
        let mut now_paused = false;
        self.state.send_modify(|paused| {
            *paused = !*paused;
            now_paused = *paused;
        });
        info!(paused = now_paused, "pause toggled");
        now_paused
    }

    /// Waits until the controller is not paused.
    pub async fn resumed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

/// Two-stage cancellation for one run.
///
/// [`Shutdown::stop`] asks the run to finish in-flight transfers and exit;
/// [`Shutdown::force`] abandons them. Hosts that own signal handling drive
/// these directly; standalone runs can call
/// [`Shutdown::install_signal_handler`].
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    graceful: CancellationToken,
    forced: CancellationToken,
}

impl Shutdown {
    /// Creates an untriggered shutdown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a graceful stop.
    pub fn stop(&self) {
        if !self.graceful.is_cancelled() {
            info!("stop requested, draining in-flight transfers");
        }
        self.graceful.cancel();
    }

    /// Requests an immediate stop.
    pub fn force(&self) {
        warn!("forced stop requested");
        self.graceful.cancel();
        self.forced.cancel();
    }

    /// True once any stop was requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.graceful.is_cancelled()
    }

    /// True once a forced stop was requested.
    #[must_use]
    pub fn is_forced(&self) -> bool {
        self.forced.is_cancelled()
    }

    /// Resolves when a stop is requested.
    pub async fn stopping(&self) {
        self.graceful.cancelled().await;
    }

    /// Resolves when a forced stop is requested.
    pub async fn forced(&self) {
        self.forced.cancelled().await;
    }

    /// Token cancelled on any stop, for hosts that cancel through their own tokens.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.graceful.clone()
    }

    /// Maps Ctrl+C onto this shutdown: first press stops, second forces.
    ///
    /// The task ends after a forced stop or when `done` is cancelled.
    pub fn install_signal_handler(&self, done: CancellationToken) -> JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = done.cancelled() => break,
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!(error = %e, "cannot listen for Ctrl+C");
                            break;
                        }
                        if shutdown.is_stopping() {
                            shutdown.force();
                            break;
                        }
                        shutdown.stop();
                    }
                }
            }
            debug!("signal handler finished");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_pause_toggle_and_clones_share_state() {
        let pause = PauseController::new();
        let other = pause.clone();
        assert!(!pause.is_paused());
        assert!(pause.toggle());
        assert!(other.is_paused());
        other.resume();
        assert!(!pause.is_paused());
        assert!(pause.toggle());
        assert!(!pause.toggle());
    }

    #[tokio::test]
    async fn test_resumed_waits_for_resume() {
        let pause = PauseController::new();
        pause.pause();

        let waiter = {
            let pause = pause.clone();
            tokio::spawn(async move { pause.resumed().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pause.resume();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_resumed_returns_immediately_when_running() {
        let pause = PauseController::new();
        tokio_test::block_on(pause.resumed());

        pause.pause();
        let mut waiting = tokio_test::task::spawn(pause.resumed());
        tokio_test::assert_pending!(waiting.poll());
        pause.resume();
        assert!(waiting.is_woken());
        tokio_test::assert_ready!(waiting.poll());
    }

    #[tokio::test]
    async fn test_shutdown_stages() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_stopping());

        shutdown.stop();
        assert!(shutdown.is_stopping());
        assert!(!shutdown.is_forced());
        shutdown.stopping().await;
        assert!(shutdown.token().is_cancelled());

        shutdown.force();
        assert!(shutdown.is_forced());
        shutdown.forced().await;
    }

    #[tokio::test]
    async fn test_signal_handler_exits_when_done() {
        let shutdown = Shutdown::new();
        let done = CancellationToken::new();
        let handle = shutdown.install_signal_handler(done.clone());
        done.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!shutdown.is_stopping());
    }
}
