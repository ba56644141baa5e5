use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::{Request, Response, Status};

use crate::executor::CommandExecutor;
use crate::proto::ffmpeg_service_server::FfmpegService;
use crate::proto::{CommandRequest, CommandResponse, StreamSource};
use crate::validator::CommandValidator;

type CommandStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<CommandResponse, Status>> + Send>>;

/// gRPC service executing allow-listed commands for remote callers.
///
/// Authentication has already happened in the interceptor by the time
/// `execute_command` runs. Each accepted call gets its own execution task,
/// child token, and response channel; nothing is shared between calls except
/// the executor's registry and metrics.
pub struct CommandService {
    validator: CommandValidator,
    executor: Arc<CommandExecutor>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl CommandService {
    pub fn new(
        validator: CommandValidator,
        executor: Arc<CommandExecutor>,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            validator,
            executor,
            shutdown,
            tracker,
        }
    }
}

#[tonic::async_trait]
impl FfmpegService for CommandService {
    type ExecuteCommandStream = CommandStream;

    async fn execute_command(
        &self,
        request: Request<CommandRequest>,
    ) -> Result<Response<Self::ExecuteCommandStream>, Status> {
        let req = request.into_inner();
        tracing::info!(command = %req.command, "Received command");

        let (tx, rx) = mpsc::channel(32);

        match self.validator.validate(&req.command) {
            Err(rejection) => {
                tracing::warn!(command = %req.command, reason = %rejection, "Command rejected");
                // Domain-level rejection: one explanatory chunk, then the
                // stream ends without an exit-status chunk.
                let _ = tx
                    .send(Ok(CommandResponse {
                        output: rejection.to_string(),
                        stream: StreamSource::Stdout as i32,
                        exit_code: 1,
                    }))
                    .await;
            }
            Ok(validated) => {
                let executor = self.executor.clone();
                let cancel = self.shutdown.child_token();
                self.tracker.spawn(async move {
                    executor.execute_streaming(validated, tx, cancel).await;
                });
            }
        }

        Ok(Response::new(
            Box::pin(ReceiverStream::new(rx)) as Self::ExecuteCommandStream
        ))
    }
}
