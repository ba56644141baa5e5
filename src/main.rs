use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_stream::StreamExt;
use tonic::metadata::MetadataValue;
use tonic::transport::{Certificate, Channel, ClientTlsConfig};
use tonic::Request;
use tracing_subscriber::EnvFilter;

use ffmpeg_gateway::auth::AUTHORIZATION_KEY;
use ffmpeg_gateway::config::{GatewayConfig, HealthConfig, TlsConfig, DEFAULT_ALLOWED_BINARIES};
use ffmpeg_gateway::node::GatewayNode;
use ffmpeg_gateway::proto::ffmpeg_service_client::FfmpegServiceClient;
use ffmpeg_gateway::proto::{CommandRequest, StreamSource};
use ffmpeg_gateway::shutdown::install_shutdown_handler;
use ffmpeg_gateway::tls::TlsIdentity;

#[derive(Parser, Debug)]
#[command(name = "ffmpeg-gateway")]
#[command(version)]
#[command(about = "A gRPC command-execution gateway for media-processing workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a gateway server node
    Server(ServerArgs),

    /// Execute one command on a remote gateway and stream its output
    Exec {
        #[command(flatten)]
        client: ClientArgs,

        /// The command to execute (e.g., "ffprobe -version")
        command: String,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on for gRPC
    #[arg(long, default_value = "50051")]
    port: u16,

    /// Port for the liveness/metrics HTTP server
    #[arg(long, default_value = "8080")]
    monitor_port: u16,

    /// Bearer token callers must present on every call
    #[arg(long, env = "VALID_TOKEN", default_value = "my_secret_token", hide_env_values = true)]
    token: String,

    /// Absolute prefix under which allow-listed binaries are resolved
    #[arg(long, env = "BINARY_PATH_PREFIX", default_value = "/usr/lib/jellyfin-ffmpeg/")]
    binary_path_prefix: PathBuf,

    // === TLS Options ===
    /// Enable TLS for the gRPC listener
    #[arg(long, env = "USE_SSL")]
    use_ssl: bool,

    /// Path to the server certificate (PEM format)
    #[arg(long, env = "SSL_CERT_PATH", default_value = "server.crt")]
    ssl_cert_path: PathBuf,

    /// Path to the server private key (PEM format)
    #[arg(long, env = "SSL_KEY_PATH", default_value = "server.key")]
    ssl_key_path: PathBuf,

    // === Health Check Options ===
    /// Seconds between health check runs
    #[arg(long, env = "HEALTHCHECK_INTERVAL", default_value = "60")]
    healthcheck_interval: u64,

    /// Fixture media file the health check transcodes
    #[arg(long, env = "HEALTHCHECK_FILE", default_value = "/app/healthcheck.mkv")]
    healthcheck_file: PathBuf,

    /// Scratch path the trial transcode writes to
    #[arg(long, env = "HEALTHCHECK_OUTPUT", default_value = "/tmp/healthcheck_output.mp4")]
    healthcheck_output: PathBuf,

    /// Seconds shutdown waits for in-flight executions to drain
    #[arg(long, default_value = "10")]
    shutdown_grace: u64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address (use https:// for TLS)
    #[arg(long, short = 'a', env = "GRPC_ADDR", default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Bearer token to present
    #[arg(long, env = "AUTH_TOKEN", default_value = "my_secret_token", hide_env_values = true)]
    token: String,

    /// Path to a trusted root certificate (PEM format) for TLS
    #[arg(long, env = "CERTIFICATE_PATH")]
    ca_cert: Option<PathBuf>,
}

// =============================================================================
// Helper Functions
// =============================================================================

async fn create_client_channel(args: &ClientArgs) -> Result<Channel, Box<dyn std::error::Error>> {
    let endpoint = Channel::from_shared(args.addr.clone())?;

    let has_tls = args.ca_cert.is_some() || args.addr.starts_with("https://");

    if has_tls {
        let mut tls_config = ClientTlsConfig::new();

        if let Some(ca_path) = &args.ca_cert {
            let ca_cert_data = tokio::fs::read(ca_path).await?;
            tls_config = tls_config.ca_certificate(Certificate::from_pem(ca_cert_data));
        }

        Ok(endpoint.tls_config(tls_config)?.connect().await?)
    } else {
        Ok(endpoint.connect().await?)
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let tls_config = TlsConfig {
        enabled: args.use_ssl,
        cert_path: Some(args.ssl_cert_path),
        key_path: Some(args.ssl_key_path),
    };

    let tls_identity = if tls_config.enabled {
        match TlsIdentity::load(&tls_config).await {
            Ok(identity) => {
                tracing::info!("TLS enabled for gRPC listener");
                Some(identity)
            }
            Err(e) => {
                return Err(format!("TLS certificate loading failed: {}", e).into());
            }
        }
    } else {
        None
    };

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let monitor_addr: SocketAddr = format!("0.0.0.0:{}", args.monitor_port).parse()?;

    let config = GatewayConfig {
        listen_addr,
        monitor_addr,
        auth_token: args.token,
        allowed_binaries: DEFAULT_ALLOWED_BINARIES
            .iter()
            .map(|b| b.to_string())
            .collect(),
        binary_path_prefix: args.binary_path_prefix,
        tls: tls_config,
        health: HealthConfig {
            interval: Duration::from_secs(args.healthcheck_interval),
            fixture_path: args.healthcheck_file,
            output_path: args.healthcheck_output,
        },
        shutdown_grace: Duration::from_secs(args.shutdown_grace),
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        monitor_addr = %config.monitor_addr,
        tls_enabled = tls_identity.is_some(),
        binary_path_prefix = %config.binary_path_prefix.display(),
        "Starting ffmpeg-gateway node"
    );

    let shutdown = install_shutdown_handler();
    let node = GatewayNode::new(config, tls_identity);
    node.run(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

// =============================================================================
// Client Command Handler
// =============================================================================

async fn handle_exec(
    client_args: &ClientArgs,
    command: String,
) -> Result<i32, Box<dyn std::error::Error>> {
    let channel = create_client_channel(client_args).await?;
    let mut client = FfmpegServiceClient::new(channel);

    let mut request = Request::new(CommandRequest { command });
    let token: MetadataValue<_> = client_args.token.parse()?;
    request.metadata_mut().insert(AUTHORIZATION_KEY, token);

    let mut stream = client.execute_command(request).await?.into_inner();

    let mut exit_code = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        match StreamSource::try_from(chunk.stream) {
            Ok(StreamSource::Stderr) => eprintln!("{}", chunk.output),
            Ok(StreamSource::ExitCode) => {
                exit_code = chunk.exit_code;
                if exit_code != 0 {
                    eprintln!("Exit code: {}", exit_code);
                }
            }
            _ => {
                println!("{}", chunk.output);
                // Rejection chunks carry their code inline
                if chunk.exit_code != 0 {
                    exit_code = chunk.exit_code;
                }
            }
        }
    }

    Ok(exit_code)
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Exec { client, command } => {
            let exit_code = handle_exec(&client, command).await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}
