use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::executor::ProcessRegistry;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. All subsystems monitor this token and drain gracefully.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        token_clone.cancel();
    });

    token
}

/// Drives orderly teardown once the shutdown token fires.
///
/// New calls stop being accepted by the gRPC server's graceful shutdown and
/// the health loop observes the same token; what remains is in-flight
/// executions. Each one owns its child process, so the coordinator signals
/// them through the process registry and bounds the wait for drain.
pub struct ShutdownCoordinator {
    registry: Arc<ProcessRegistry>,
    tracker: TaskTracker,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<ProcessRegistry>, grace: Duration) -> Self {
        Self {
            registry,
            tracker: TaskTracker::new(),
            grace,
        }
    }

    /// Tracker every in-flight execution task is spawned on.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Signal every live child process and wait up to the grace period for
    /// in-flight executions to finish. Stragglers are logged and left to the
    /// kill-on-drop backstop when the runtime tears down; they do not change
    /// the exit code.
    pub async fn drain(&self) {
        self.tracker.close();
        self.registry.terminate_all();

        tokio::select! {
            _ = self.tracker.wait() => {
                tracing::info!("All in-flight executions drained");
            }
            _ = tokio::time::sleep(self.grace) => {
                tracing::warn!(
                    remaining = self.registry.len(),
                    grace_secs = self.grace.as_secs(),
                    "Grace period expired with executions still in flight, force-terminating"
                );
            }
        }
    }
}
