//! Parlor server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! parlor-server --bind 0.0.0.0:4433
//!
//! # Start with TLS certificate, persistent log key and gated export
//! SERVER_LOG_KEY_B64=... LOG_EXPORT_TOKEN=... \
//!     parlor-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem
//! ```

use std::path::PathBuf;

use clap::Parser;
use parlor_server::{Server, ServerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parlor envelope relay server
#[derive(Parser, Debug)]
#[command(name = "parlor-server")]
#[command(about = "End-to-end encrypted group chat relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<PathBuf>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Base64 256-bit audit log key
    #[arg(long, env = "SERVER_LOG_KEY_B64", hide_env_values = true)]
    log_key: Option<String>,

    /// Shared secret required to export the audit log
    #[arg(long, env = "LOG_EXPORT_TOKEN", hide_env_values = true)]
    export_token: Option<String>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Outbound frames buffered per connection before dropping
    #[arg(long, default_value = "256")]
    outbound_queue: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Parlor server starting");
    tracing::info!("Binding to {}", args.bind);

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
        tracing::warn!("This is NOT suitable for production use!");
    }

    let config = ServerConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        log_key: args.log_key,
        export_token: args.export_token,
        max_connections: args.max_connections,
        outbound_queue: args.outbound_queue,
    };

    let server = Server::bind(config)?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    let hub = server.hub();
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(
                participants = hub.list_participants().len(),
                audit_entries = hub.audit_log().len(),
                audit_failures = hub.audit_log().failed_appends(),
                "Shutting down"
            );
        },
    }

    Ok(())
}
