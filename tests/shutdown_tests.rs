
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ffmpeg_gateway::executor::CommandExecutor;
use ffmpeg_gateway::metrics::WorkerMetrics;
use ffmpeg_gateway::shutdown::ShutdownCoordinator;
use ffmpeg_gateway::validator::ValidatedCommand;
use test_harness::{wait_for, TEST_FIXTURE};

fn test_executor() -> Arc<CommandExecutor> {
    let metrics = Arc::new(WorkerMetrics::new().unwrap());
    Arc::new(CommandExecutor::new(metrics, Path::new(TEST_FIXTURE)))
}

#[tokio::test]
async fn test_drain_returns_once_tracked_work_finishes() {
    let executor = test_executor();
    let coordinator = ShutdownCoordinator::new(executor.registry(), Duration::from_secs(10));

    coordinator.tracker().spawn(async {
        tokio::time::sleep(Duration::from_millis(50)).await;
    });

    let start = tokio::time::Instant::now();
    coordinator.drain().await;
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "drain should return as soon as tracked work finishes"
    );
}

#[tokio::test]
async fn test_drain_is_bounded_by_the_grace_period() {
    let executor = test_executor();
    let coordinator = ShutdownCoordinator::new(executor.registry(), Duration::from_millis(200));

    // A task that never observes cancellation
    coordinator.tracker().spawn(async {
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let start = tokio::time::Instant::now();
    coordinator.drain().await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(
        elapsed < Duration::from_secs(2),
        "drain must not wait out stragglers beyond the grace period"
    );
}

#[tokio::test]
async fn test_drain_terminates_in_flight_executions() {
    let executor = test_executor();
    let registry = executor.registry();
    let coordinator = ShutdownCoordinator::new(registry.clone(), Duration::from_secs(10));

    let (tx, mut rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let exec = executor.clone();
    coordinator.tracker().spawn(async move {
        exec.execute_streaming(
            ValidatedCommand {
                command_line: "sleep 30".to_string(),
                binary: "ffprobe".to_string(),
            },
            tx,
            cancel,
        )
        .await;
    });

    let r = registry.clone();
    assert!(
        wait_for(
            || async { r.len() == 1 },
            Duration::from_secs(2),
            Duration::from_millis(10),
        )
        .await
    );

    // Drain signals the execution through the registry; the owning task
    // kills its child and finishes well inside the grace period.
    let start = tokio::time::Instant::now();
    coordinator.drain().await;
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "drain should not wait out the 30s sleep"
    );
    assert!(registry.is_empty());

    // The stream ended without a terminal chunk
    let mut saw_exit = false;
    while let Some(item) = rx.recv().await {
        if let Ok(chunk) = item {
            if chunk.stream == ffmpeg_gateway::proto::StreamSource::ExitCode as i32 {
                saw_exit = true;
            }
        }
    }
    assert!(!saw_exit);
}
