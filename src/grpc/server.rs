use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::Server;

use crate::auth::AuthInterceptor;
use crate::executor::CommandExecutor;
use crate::grpc::command_service::CommandService;
use crate::proto::ffmpeg_service_server::FfmpegServiceServer;
use crate::tls::TlsIdentity;
use crate::validator::CommandValidator;

pub struct GrpcServer {
    addr: SocketAddr,
    auth_token: String,
    validator: CommandValidator,
    executor: Arc<CommandExecutor>,
    tls_identity: Option<TlsIdentity>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl GrpcServer {
    pub fn new(
        addr: SocketAddr,
        auth_token: String,
        validator: CommandValidator,
        executor: Arc<CommandExecutor>,
        tls_identity: Option<TlsIdentity>,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            addr,
            auth_token,
            validator,
            executor,
            tls_identity,
            shutdown,
            tracker,
        }
    }

    /// Serve until the shutdown token fires; new calls stop being accepted
    /// at that point while streams already in flight keep their tasks.
    pub async fn run(self) -> Result<(), tonic::transport::Error> {
        let service = CommandService::new(
            self.validator,
            self.executor,
            self.shutdown.clone(),
            self.tracker,
        );
        let auth = AuthInterceptor::new(self.auth_token);

        let mut builder = Server::builder();
        if let Some(ref tls_identity) = self.tls_identity {
            builder = builder.tls_config(tls_identity.server_tls_config())?;
        }

        tracing::info!(
            addr = %self.addr,
            tls_enabled = self.tls_identity.is_some(),
            "Starting gRPC server"
        );

        builder
            .add_service(FfmpegServiceServer::with_interceptor(service, auth))
            .serve_with_shutdown(self.addr, self.shutdown.cancelled_owned())
            .await
    }
}
