//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long in-flight tasks get to finish once shutdown starts.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared shutdown signal for the listener and background tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not been triggered.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A clone of the shutdown token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been triggered.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown, then wait up to `timeout` for `handles` to finish.
    /// Tasks still running afterwards are aborted. Returns `true` when every
    /// task finished in time.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.shutdown();
        info!(task_count = handles.len(), ?timeout, "draining tasks");

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_ok()
        {
            return true;
        }
        warn!(?timeout, "drain timed out, aborting remaining tasks");
        for abort in aborts {
            abort.abort();
        }
        false
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve on Ctrl-C, or on SIGTERM where supported.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                let _ = sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        assert!(!ShutdownCoordinator::new().is_shutting_down());
    }

    #[test]
    fn shutdown_cancels_every_token() {
        let coord = ShutdownCoordinator::default();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move { token.cancelled().await });

        assert!(coord.drain(vec![handle], Duration::from_secs(1)).await);
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_and_aborts() {
        let coord = ShutdownCoordinator::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let stuck = tokio::spawn(async move {
            let _guard = tx;
            std::future::pending::<()>().await;
        });

        assert!(!coord.drain(vec![stuck], DEFAULT_DRAIN_TIMEOUT).await);
        // Aborting the task drops its guard.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn drain_with_no_tasks() {
        let coord = ShutdownCoordinator::new();
        assert!(coord.drain(Vec::new(), Duration::from_millis(10)).await);
    }
}
