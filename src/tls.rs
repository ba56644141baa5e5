//! TLS utilities for loading the server certificate and private key.

use std::path::PathBuf;

use tokio::fs;
use tonic::transport::{Identity, ServerTlsConfig};

use crate::config::TlsConfig;

/// Error type for TLS configuration issues.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Server certificate path not configured")]
    MissingCert,

    #[error("Private key path not configured")]
    MissingKey,

    #[error("Server certificate not found: {0}")]
    CertNotFound(PathBuf),

    #[error("Private key not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),
}

/// Loaded TLS materials ready for use with tonic.
///
/// Callers verify the presented certificate against their trusted roots;
/// client certificates are not requested.
#[derive(Clone)]
pub struct TlsIdentity {
    identity: Identity,
}

impl TlsIdentity {
    /// Load the certificate and private key from the paths in the config.
    ///
    /// # Errors
    ///
    /// Returns an error if either path is not configured or either file
    /// does not exist or cannot be read.
    pub async fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let cert_path = config.cert_path.as_ref().ok_or(TlsError::MissingCert)?;
        let key_path = config.key_path.as_ref().ok_or(TlsError::MissingKey)?;

        // Validate paths exist before reading
        if !cert_path.exists() {
            return Err(TlsError::CertNotFound(cert_path.clone()));
        }
        if !key_path.exists() {
            return Err(TlsError::KeyNotFound(key_path.clone()));
        }

        let cert_pem = fs::read(cert_path).await?;
        let key_pem = fs::read(key_path).await?;

        Ok(Self {
            identity: Identity::from_pem(cert_pem, key_pem),
        })
    }

    /// Create the server TLS config presenting this identity.
    pub fn server_tls_config(&self) -> ServerTlsConfig {
        ServerTlsConfig::new().identity(self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_config_is_complete() {
        let mut config = TlsConfig::default();
        assert!(!config.is_complete());

        config.enabled = true;
        assert!(!config.is_complete());

        config.cert_path = Some(PathBuf::from("/tmp/server.crt"));
        assert!(!config.is_complete());

        config.key_path = Some(PathBuf::from("/tmp/server.key"));
        assert!(config.is_complete());
    }

    #[tokio::test]
    async fn test_load_missing_paths() {
        let config = TlsConfig {
            enabled: true,
            cert_path: None,
            key_path: None,
        };

        let result = TlsIdentity::load(&config).await;
        assert!(matches!(result, Err(TlsError::MissingCert)));
    }

    #[tokio::test]
    async fn test_load_nonexistent_files() {
        let config = TlsConfig {
            enabled: true,
            cert_path: Some(PathBuf::from("/nonexistent/server.crt")),
            key_path: Some(PathBuf::from("/nonexistent/server.key")),
        };

        let result = TlsIdentity::load(&config).await;
        assert!(matches!(result, Err(TlsError::CertNotFound(_))));
    }
}
