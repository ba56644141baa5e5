use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::grpc::GrpcServer;
use crate::health::{HealthMonitor, HealthState};
use crate::metrics::WorkerMetrics;
use crate::monitor::{run_monitor, MonitorState};
use crate::probe::MediaInfoProbe;
use crate::shutdown::ShutdownCoordinator;
use crate::tls::TlsIdentity;
use crate::validator::CommandValidator;

/// Main node that wires all gateway components together.
pub struct GatewayNode {
    config: GatewayConfig,
    tls_identity: Option<TlsIdentity>,
}

impl GatewayNode {
    pub fn new(config: GatewayConfig, tls_identity: Option<TlsIdentity>) -> Self {
        Self {
            config,
            tls_identity,
        }
    }

    /// Run the gateway until the shutdown token fires.
    ///
    /// Starts each concurrent unit:
    /// 1. Spawns the health-check loop
    /// 2. Spawns the liveness/metrics HTTP server
    /// 3. Runs the gRPC server in the foreground (blocking)
    /// 4. On shutdown, signals in-flight executions and bounds the drain
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics registry or the gRPC server fails to
    /// start, or the server hits a fatal transport error. The health loop
    /// and monitor server run as spawned tasks and log their own errors.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let metrics = Arc::new(WorkerMetrics::new()?);
        let health_state = Arc::new(HealthState::new());
        let executor = Arc::new(CommandExecutor::new(
            metrics.clone(),
            &self.config.health.fixture_path,
        ));
        let coordinator =
            ShutdownCoordinator::new(executor.registry(), self.config.shutdown_grace);

        // Spawn health check loop
        let health_monitor = HealthMonitor::new(
            self.config.health.clone(),
            self.config.binary_path_prefix.clone(),
            executor.clone(),
            Arc::new(MediaInfoProbe::new(executor.clone())),
            health_state.clone(),
        );
        let health_cancel = shutdown.child_token();
        tokio::spawn(async move {
            health_monitor.run(health_cancel).await;
        });

        // Spawn liveness/metrics HTTP server
        let monitor_state = MonitorState {
            health: health_state,
            metrics,
        };
        tokio::spawn(run_monitor(
            self.config.monitor_addr,
            monitor_state,
            shutdown.child_token(),
        ));

        // Run gRPC server (blocks until shutdown or fatal error)
        let validator = CommandValidator::new(
            self.config.allowed_binaries.clone(),
            self.config.binary_path_prefix.clone(),
        );
        let server = GrpcServer::new(
            self.config.listen_addr,
            self.config.auth_token.clone(),
            validator,
            executor,
            self.tls_identity,
            shutdown.clone(),
            coordinator.tracker(),
        );
        server.run().await?;

        // Intake has stopped; tear down what is still in flight.
        coordinator.drain().await;
        Ok(())
    }
}
