//! Parlor production server.
//!
//! This crate provides the production relay using:
//! - Quinn for QUIC transport
//! - Tokio for async runtime
//! - System time and cryptographic RNG
//!
//! ## Architecture
//!
//! ```text
//! parlor-server
//!   ├─ SystemEnv          (production Environment impl)
//!   ├─ QuinnTransport     (QUIC via Quinn)
//!   ├─ ConnectionTable    (bounded outbound queue per connection)
//!   └─ RelayHub           (registry, relay, presence, audit log)
//! ```
//!
//! ## Streams
//!
//! Clients send request frames on any number of bidirectional streams. The
//! server answers and broadcasts on a single unidirectional stream per
//! connection, written by that connection's writer task.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod connections;
mod error;
mod system_env;
mod transport;

use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
pub use codec::read_frame;
pub use config::ServerConfig;
pub use connections::ConnectionTable;
pub use error::ServerError;
use parlor_core::{ConnectionId, Environment, RelayEvent, RelayHub};
use parlor_proto::ClientRequest;
pub use system_env::SystemEnv;
use tokio::sync::{Semaphore, mpsc};
pub use transport::{
    ALPN, QuinnTransport, TlsIdentity, TransportError, load_identity, self_signed_identity,
    server_crypto,
};

/// Production Parlor server.
///
/// Wraps `RelayHub` with Quinn QUIC transport and system environment.
pub struct Server {
    /// Shared relay state
    hub: Arc<RelayHub<SystemEnv>>,
    /// Outbound queues
    connections: Arc<ConnectionTable>,
    /// QUIC endpoint
    transport: QuinnTransport,
    /// Connection slots
    slots: Arc<Semaphore>,
    /// Environment
    env: SystemEnv,
}

impl Server {
    /// Create and bind a new server.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The configured log key is malformed
    /// - Binding to the address fails
    /// - TLS configuration is invalid
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let log_key = config.resolve_log_key(&env)?;
        let hub = Arc::new(RelayHub::new(env.clone(), &log_key, config.relay_config()));

        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self {
            hub,
            connections: Arc::new(ConnectionTable::new(config.outbound_queue)),
            transport,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            env,
        })
    }

    /// Run the server, accepting connections and relaying requests.
    ///
    /// Returns once the endpoint is closed.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.transport.local_addr()?);

        while let Some(incoming) = self.transport.accept().await {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                tracing::warn!(remote = %incoming.remote_address(), "connection limit reached");
                incoming.refuse();
                continue;
            };

            let hub = Arc::clone(&self.hub);
            let connections = Arc::clone(&self.connections);
            let env = self.env.clone();

            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        if let Err(e) = handle_connection(conn, hub, connections, env).await {
                            tracing::error!("Connection error: {}", e);
                        }
                    },
                    Err(e) => tracing::debug!("Handshake failed: {}", e),
                }
                drop(permit);
            });
        }

        tracing::info!("Endpoint closed");
        Ok(())
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.transport.local_addr()?)
    }

    /// Shared relay state, for status queries.
    pub fn hub(&self) -> Arc<RelayHub<SystemEnv>> {
        Arc::clone(&self.hub)
    }

    /// Close the endpoint. `run` returns once pending accepts drain.
    pub fn shutdown(&self) {
        self.transport.close();
    }
}

/// Handle a single QUIC connection.
async fn handle_connection(
    conn: quinn::Connection,
    hub: Arc<RelayHub<SystemEnv>>,
    connections: Arc<ConnectionTable>,
    env: SystemEnv,
) -> Result<(), ServerError> {
    let conn_id = env.random_u64();
    tracing::debug!(conn_id, remote = %conn.remote_address(), "New connection");

    let outbound = connections.open(conn_id);
    hub.dispatch(RelayEvent::ConnectionOpened { conn_id }, &*connections);
    let writer = tokio::spawn(write_outbound(conn.clone(), conn_id, outbound));

    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                // Replies travel on the outbound uni stream
                drop(send);
                let hub = Arc::clone(&hub);
                let connections = Arc::clone(&connections);

                tokio::spawn(async move {
                    if let Err(e) = handle_stream(conn_id, recv, hub, connections).await {
                        tracing::debug!(conn_id, "Stream error: {}", e);
                    }
                });
            },
            Err(e) => {
                tracing::debug!(conn_id, "Connection closed: {}", e);
                break;
            },
        }
    }

    hub.dispatch(RelayEvent::ConnectionClosed { conn_id }, &*connections);
    connections.close(conn_id);
    writer.await.map_err(|e| ServerError::Internal(e.to_string()))?;

    Ok(())
}

/// Read request frames from one bidirectional stream.
async fn handle_stream(
    conn_id: ConnectionId,
    mut recv: quinn::RecvStream,
    hub: Arc<RelayHub<SystemEnv>>,
    connections: Arc<ConnectionTable>,
) -> Result<(), ServerError> {
    while let Some(frame) = read_frame(&mut recv).await? {
        match ClientRequest::from_frame(&frame) {
            Ok(request) => {
                hub.dispatch(RelayEvent::Request { conn_id, request }, &*connections);
            },
            Err(e) => {
                tracing::debug!(conn_id, "Undecodable request: {}", e);
                hub.dispatch(
                    RelayEvent::MalformedRequest { conn_id, detail: e.to_string() },
                    &*connections,
                );
            },
        }
    }

    Ok(())
}

/// Drain a connection's outbound queue onto one unidirectional stream.
async fn write_outbound(
    conn: quinn::Connection,
    conn_id: ConnectionId,
    mut outbound: mpsc::Receiver<Bytes>,
) {
    let mut send = match conn.open_uni().await {
        Ok(send) => send,
        Err(e) => {
            tracing::debug!(conn_id, "Failed to open outbound stream: {}", e);
            return;
        },
    };

    while let Some(frame) = outbound.recv().await {
        if let Err(e) = send.write_all(&frame).await {
            tracing::debug!(conn_id, "Outbound write failed: {}", e);
            return;
        }
    }

    let _ = send.finish();
}
