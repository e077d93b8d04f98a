//! QUIC transport.
//!
//! TLS 1.3 over QUIC with the `parlor/1` ALPN. Without a certificate the
//! endpoint falls back to a self-signed `localhost` certificate, which is
//! only suitable for development.

use std::{
    fs::File,
    io::BufReader,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use quinn::{Endpoint, Incoming, crypto::rustls::QuicServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// ALPN protocol identifier.
pub const ALPN: &[u8] = b"parlor/1";

/// Errors from endpoint setup and I/O.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Bind address does not parse
    #[error("invalid bind address {address:?}: {reason}")]
    InvalidAddress {
        /// The rejected address
        address: String,
        /// Parser message
        reason: String,
    },

    /// Certificate or key file unreadable or empty
    #[error("failed to load {path}: {reason}")]
    Pem {
        /// File that failed
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Only one of certificate and key was given
    #[error("certificate and key must be supplied together")]
    IncompleteTlsPair,

    /// Self-signed certificate generation failed
    #[error("self-signed certificate generation failed: {0}")]
    SelfSigned(#[from] rcgen::Error),

    /// TLS configuration rejected
    #[error("TLS configuration rejected: {0}")]
    Tls(#[from] rustls::Error),

    /// The TLS config has no QUIC-compatible cipher suite
    #[error("TLS configuration unusable for QUIC: {0}")]
    Quic(String),

    /// Socket error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Certificate chain and private key.
pub type TlsIdentity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// QUIC server endpoint.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Bind a QUIC endpoint.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(
        address: &str,
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
    ) -> Result<Self, TransportError> {
        let addr: SocketAddr = address.parse().map_err(|e: std::net::AddrParseError| {
            TransportError::InvalidAddress { address: address.to_string(), reason: e.to_string() }
        })?;

        let (certs, key) = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_identity(cert, key)?,
            (None, None) => self_signed_identity()?,
            _ => return Err(TransportError::IncompleteTlsPair),
        };

        let crypto = server_crypto(certs, key)?;
        let quic = QuicServerConfig::try_from(crypto).map_err(|e| TransportError::Quic(e.to_string()))?;
        let endpoint = Endpoint::server(quinn::ServerConfig::with_crypto(Arc::new(quic)), addr)?;

        Ok(Self { endpoint })
    }

    /// Wait for the next incoming connection. `None` once the endpoint is
    /// closed.
    pub async fn accept(&self) -> Option<Incoming> {
        self.endpoint.accept().await
    }

    /// Local socket address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Close every connection and stop accepting.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"server shutdown");
    }
}

/// Build the rustls server config: TLS 1.3 only, no client auth, `parlor/1`
/// ALPN.
pub fn server_crypto(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<rustls::ServerConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![ALPN.to_vec()];
    Ok(config)
}

/// Load a PEM certificate chain and private key.
pub fn load_identity(cert_path: &Path, key_path: &Path) -> Result<TlsIdentity, TransportError> {
    let pem_error =
        |path: &Path, reason: String| TransportError::Pem { path: path.to_path_buf(), reason };

    let mut reader = BufReader::new(
        File::open(cert_path).map_err(|e| pem_error(cert_path, e.to_string()))?,
    );
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| pem_error(cert_path, e.to_string()))?;
    if certs.is_empty() {
        return Err(pem_error(cert_path, "no certificates found".to_string()));
    }

    let mut reader =
        BufReader::new(File::open(key_path).map_err(|e| pem_error(key_path, e.to_string()))?);
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| pem_error(key_path, e.to_string()))?
        .ok_or_else(|| pem_error(key_path, "no private key found".to_string()))?;

    Ok((certs, key))
}

/// Generate a self-signed certificate for `localhost`.
pub fn self_signed_identity() -> Result<TlsIdentity, TransportError> {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
    Ok((vec![certified.cert.der().clone()], key.into()))
}
