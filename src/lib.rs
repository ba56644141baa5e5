pub mod auth;
pub mod config;
pub mod error;
pub mod executor;
pub mod grpc;
pub mod health;
pub mod metrics;
pub mod monitor;
pub mod node;
pub mod probe;
pub mod shutdown;
pub mod tls;
pub mod validator;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("ffmpeg");
}
