pub mod command_service;
pub mod server;

pub use server::GrpcServer;
