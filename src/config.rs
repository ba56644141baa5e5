use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Binaries a caller is allowed to invoke, by base name.
pub const DEFAULT_ALLOWED_BINARIES: &[&str] = &["ffmpeg", "ffprobe", "mediainfo"];

/// The binary whose invocations count toward the in-flight transcode gauge.
pub const TRANSCODER_BINARY: &str = "ffmpeg";

/// TLS configuration for the gRPC listener.
///
/// When enabled, the server presents its certificate and private key and
/// clients verify it against a trusted root. Client certificates are not
/// requested.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Enable TLS. If false, all other TLS settings are ignored.
    pub enabled: bool,

    /// Path to the server certificate (PEM format).
    pub cert_path: Option<PathBuf>,

    /// Path to the server private key (PEM format).
    /// Must match the certificate.
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Check if TLS is properly configured with all required files.
    pub fn is_complete(&self) -> bool {
        self.enabled && self.cert_path.is_some() && self.key_path.is_some()
    }
}

/// Configuration for the periodic self-health-check.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Time between check runs. The first run starts immediately.
    pub interval: Duration,
    /// Known-good media file used as the trial-transcode input.
    pub fixture_path: PathBuf,
    /// Scratch path the trial transcode writes to.
    pub output_path: PathBuf,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            fixture_path: PathBuf::from("/app/healthcheck.mkv"),
            output_path: PathBuf::from("/tmp/healthcheck_output.mp4"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the gRPC server listens on.
    pub listen_addr: SocketAddr,
    /// Address the liveness/metrics HTTP server listens on.
    pub monitor_addr: SocketAddr,
    /// Bearer token each call must present under the `authorization` key.
    pub auth_token: String,
    /// Allow-listed binary base names.
    pub allowed_binaries: Vec<String>,
    /// Absolute prefix under which allow-listed binaries are resolved.
    pub binary_path_prefix: PathBuf,
    pub tls: TlsConfig,
    pub health: HealthConfig,
    /// How long shutdown waits for in-flight executions to drain.
    pub shutdown_grace: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:50051"
                .parse()
                .expect("default listen address is valid"),
            monitor_addr: "0.0.0.0:8080"
                .parse()
                .expect("default monitor address is valid"),
            auth_token: "my_secret_token".to_string(),
            allowed_binaries: DEFAULT_ALLOWED_BINARIES
                .iter()
                .map(|b| b.to_string())
                .collect(),
            binary_path_prefix: PathBuf::from("/usr/lib/jellyfin-ffmpeg/"),
            tls: TlsConfig::default(),
            health: HealthConfig::default(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}
