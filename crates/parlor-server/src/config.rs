//! Server runtime configuration.

use std::path::PathBuf;

use parlor_core::{Environment, ExportToken, LogKey, RelayConfig};

use crate::error::ServerError;

/// Server configuration for the production runtime.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<PathBuf>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<PathBuf>,
    /// Base64 256-bit audit log key. Generated per process when absent.
    pub log_key: Option<String>,
    /// Shared secret gating audit export. Export is open when absent.
    pub export_token: Option<String>,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Outbound frames buffered per connection before dropping
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            log_key: None,
            export_token: None,
            max_connections: 10_000,
            outbound_queue: 256,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_address", &self.bind_address)
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("log_key", &self.log_key.as_ref().map(|_| "<redacted>"))
            .field("export_token", &self.export_token.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("outbound_queue", &self.outbound_queue)
            .finish()
    }
}

impl ServerConfig {
    /// Resolve the audit log key.
    ///
    /// A configured key that does not decode to 32 bytes is a startup error.
    /// Without one an ephemeral key is generated and entries written under it
    /// cannot be decrypted after a restart.
    pub fn resolve_log_key<E: Environment>(&self, env: &E) -> Result<LogKey, ServerError> {
        match self.log_key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(encoded) => Ok(LogKey::from_base64(encoded)?),
            None => {
                tracing::warn!(
                    "Generated ephemeral log key; set SERVER_LOG_KEY_B64 to persist logs across restarts"
                );
                Ok(LogKey::generate(env))
            },
        }
    }

    /// Relay configuration derived from this config.
    pub fn relay_config(&self) -> RelayConfig {
        let export_token = ExportToken::new(self.export_token.as_deref());
        if !export_token.is_required() {
            tracing::warn!("LOG_EXPORT_TOKEN not set; audit export is unrestricted");
        }
        RelayConfig { export_token }
    }
}
