//! Graceful shutdown.
//!
//! Long-running tasks (dispatchers, the reply listener) are spawned on the
//! coordinator's [`TaskTracker`] and watch its [`CancellationToken`]. On a
//! termination signal the token is cancelled, tracked tasks get up to the
//! drain timeout to finish their current message, in-flight calls get the
//! remainder, and the transport is closed last.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::bus::Transport;
use crate::config::ShutdownSettings;
use crate::rpc::registry::deadline_after;
use crate::rpc::RpcClient;

/// Outcome of [`ShutdownCoordinator::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every tracked task and in-flight call finished within the timeout.
    pub drained: bool,
    /// Calls failed with `ShuttingDown` because no reply came in time.
    pub abandoned_requests: usize,
}

pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            drain_timeout,
        }
    }

    pub fn from_settings(settings: &ShutdownSettings) -> Self {
        Self::new(settings.drain_timeout())
    }

    /// Token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a task that shutdown waits for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Resolve on Ctrl+C or SIGTERM.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!(signal = "ctrl_c", "Shutdown signal received"),
            _ = terminate => info!(signal = "sigterm", "Shutdown signal received"),
            _ = self.token.cancelled() => {}
        }
    }

    /// Stop everything in order: cancel, drain tracked tasks, drain the RPC
    /// client, close the transport.
    pub async fn shutdown(
        &self,
        rpc: Option<&RpcClient>,
        transport: &dyn Transport,
    ) -> ShutdownReport {
        let deadline = deadline_after(Instant::now(), self.drain_timeout);
        info!(drain_timeout_ms = %self.drain_timeout.as_millis(), "Shutting down");

        self.token.cancel();
        if let Some(rpc) = rpc {
            rpc.stop_accepting();
        }

        self.tracker.close();
        let tasks_drained = tokio::time::timeout_at(deadline, self.tracker.wait())
            .await
            .is_ok();
        if !tasks_drained {
            warn!(
                remaining = self.tracker.len(),
                "Tasks still running after drain timeout"
            );
        }

        let abandoned_requests = match rpc {
            Some(rpc) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                rpc.shutdown(remaining).await
            }
            None => 0,
        };
        if abandoned_requests > 0 {
            warn!(abandoned_requests, "In-flight requests abandoned");
        }

        if let Err(e) = transport.close().await {
            warn!(error = %e, "Failed to close transport");
        }

        let report = ShutdownReport {
            drained: tasks_drained && abandoned_requests == 0,
            abandoned_requests,
        };
        info!(drained = report.drained, "Shutdown complete");
        report
    }
}
