use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::HealthConfig;
use crate::error::{GatewayError, Result};
use crate::executor::CommandExecutor;
use crate::probe::MediaProbe;

/// Marker ffmpeg prints when a conversion aborts; its presence in trial
/// transcode output fails the check even when the process exits zero.
const CONVERSION_FAILED_MARKER: &str = "Conversion failed";

/// Where the check loop currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Idle,
    Probing,
    Passed,
    Failed,
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckState::Idle => "idle",
            CheckState::Probing => "probing",
            CheckState::Passed => "passed",
            CheckState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Process-wide health flag published by the check loop and read by the
/// liveness endpoint. Reads may momentarily trail the latest run.
pub struct HealthState {
    healthy: AtomicBool,
    check_state: Mutex<CheckState>,
    last_check: Mutex<Option<DateTime<Utc>>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(false),
            check_state: Mutex::new(CheckState::Idle),
            last_check: Mutex::new(None),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn check_state(&self) -> CheckState {
        *self
            .check_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        *self
            .last_check
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin_probe(&self) {
        *self
            .check_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = CheckState::Probing;
    }

    /// Record the outcome of a completed check run. Called by the check
    /// loop; nothing else writes the flag.
    pub fn publish(&self, state: CheckState) {
        self.healthy
            .store(state == CheckState::Passed, Ordering::Relaxed);
        *self
            .check_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
        *self
            .last_check
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Utc::now());
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically exercises the real transcode pipeline against a fixture
/// file and publishes the result to [`HealthState`].
///
/// A failed run flips the flag and is logged, but never stops the loop;
/// only cancellation does.
pub struct HealthMonitor {
    config: HealthConfig,
    transcoder_path: PathBuf,
    executor: Arc<CommandExecutor>,
    probe: Arc<dyn MediaProbe>,
    state: Arc<HealthState>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        binary_path_prefix: PathBuf,
        executor: Arc<CommandExecutor>,
        probe: Arc<dyn MediaProbe>,
        state: Arc<HealthState>,
    ) -> Self {
        Self {
            config,
            transcoder_path: binary_path_prefix.join("ffmpeg"),
            executor,
            probe,
            state,
        }
    }

    pub fn state(&self) -> Arc<HealthState> {
        self.state.clone()
    }

    /// Run checks until cancelled: an immediate first run, then one per
    /// configured interval.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("Running initial health check");

        loop {
            self.state.begin_probe();
            match self.run_once(&cancel).await {
                Ok(state) => self.state.publish(state),
                Err(GatewayError::Cancelled) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Health check run errored");
                    self.state.publish(CheckState::Failed);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        tracing::info!("Health check loop stopped");
    }

    /// One four-stage check run, short-circuiting on the first failed stage.
    /// Cancellation between stages surfaces as `GatewayError::Cancelled`.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<CheckState> {
        // Stage 1: the fixture itself must still look like video.
        ensure_live(cancel)?;
        let fixture = self.probe.probe(&self.config.fixture_path, cancel).await?;
        if !fixture.has_video {
            tracing::error!(
                path = %self.config.fixture_path.display(),
                "Fixture probe reported no video stream"
            );
            return Ok(CheckState::Failed);
        }

        // Stage 2: best-effort cleanup of the previous run's artifact.
        ensure_live(cancel)?;
        if let Err(e) = tokio::fs::remove_file(&self.config.output_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.config.output_path.display(),
                    error = %e,
                    "Failed to remove stale health check output"
                );
            }
        }

        // Stage 3: real trial transcode of the fixture.
        ensure_live(cancel)?;
        let command_line = format!(
            "{} -i {} {}",
            self.transcoder_path.display(),
            self.config.fixture_path.display(),
            self.config.output_path.display()
        );
        let run = self.executor.run_captured(&command_line, cancel).await?;
        if run.stdout.contains(CONVERSION_FAILED_MARKER)
            || run.stderr.contains(CONVERSION_FAILED_MARKER)
        {
            tracing::error!(exit_code = run.exit_code, "Trial transcode failed");
            return Ok(CheckState::Failed);
        }

        // Stage 4: the artifact must parse as media.
        ensure_live(cancel)?;
        let artifact = self.probe.probe(&self.config.output_path, cancel).await?;
        if !artifact.valid {
            tracing::error!(
                path = %self.config.output_path.display(),
                "Trial transcode output is not valid media"
            );
            return Ok(CheckState::Failed);
        }

        tracing::debug!("Health check passed");
        Ok(CheckState::Passed)
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(GatewayError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_state_starts_idle_and_unhealthy() {
        let state = HealthState::new();
        assert!(!state.is_healthy());
        assert_eq!(state.check_state(), CheckState::Idle);
        assert!(state.last_check().is_none());
    }

    #[test]
    fn publish_updates_flag_state_and_timestamp() {
        let state = HealthState::new();

        state.publish(CheckState::Passed);
        assert!(state.is_healthy());
        assert_eq!(state.check_state(), CheckState::Passed);
        assert!(state.last_check().is_some());

        state.publish(CheckState::Failed);
        assert!(!state.is_healthy());
        assert_eq!(state.check_state(), CheckState::Failed);
    }
}
