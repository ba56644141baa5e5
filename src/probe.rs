use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::executor::CommandExecutor;

/// What the metadata probe learned about a file.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// The probe produced a usable report at all.
    pub valid: bool,
    /// The report contains evidence of a video stream.
    pub has_video: bool,
    /// Raw probe output, kept for logging.
    pub raw: String,
}

/// External media-metadata probe.
///
/// The health check treats this as an opaque collaborator returning
/// pass/fail plus raw text; tests substitute a stub.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path, cancel: &CancellationToken) -> Result<ProbeReport>;
}

/// Probe backed by the `mediainfo` binary, run through the same shell
/// execution primitive as everything else the gateway spawns.
pub struct MediaInfoProbe {
    executor: Arc<CommandExecutor>,
}

impl MediaInfoProbe {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl MediaProbe for MediaInfoProbe {
    async fn probe(&self, path: &Path, cancel: &CancellationToken) -> Result<ProbeReport> {
        let command_line = format!("mediainfo {}", path.display());
        let run = self.executor.run_captured(&command_line, cancel).await?;

        Ok(ProbeReport {
            valid: run.exit_code == 0 && !run.stdout.trim().is_empty(),
            has_video: run.stdout.contains("Video"),
            raw: run.stdout,
        })
    }
}
