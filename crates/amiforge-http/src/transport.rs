//! The transport seam.
//!
//! [`Transport`] sends one fully built request and returns the raw response
//! bytes. [`TlsTransport`] is the production implementation; tests swap in
//! scripted transports.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{HttpError, HttpResult};
use crate::response::{MAX_RESPONSE_BYTES, read_response};

/// The HTTPS port.
pub const HTTPS_PORT: u16 = 443;

/// Sends raw request bytes to a host and returns the raw response.
///
/// Uses `async_trait` so the client can hold an `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send `request` to `host:port` and read the response to EOF.
    async fn send(&self, host: &str, port: u16, request: Bytes) -> HttpResult<Bytes>;
}

/// TLS over TCP, trusting the bundled web PKI roots.
#[derive(Clone)]
pub struct TlsTransport {
    connector: TlsConnector,
    timeout: Duration,
}

impl fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsTransport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TlsTransport {
    /// Build a transport whose exchanges each finish within `timeout`.
    pub fn new(timeout: Duration) -> HttpResult<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| HttpError::Tls {
                    host: "*".to_owned(),
                    message: e.to_string(),
                })?
                .with_root_certificates(roots)
                .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            timeout,
        })
    }

    async fn exchange(&self, host: &str, port: u16, request: &[u8]) -> HttpResult<Bytes> {
        let io_error = |source: std::io::Error| HttpError::Transport {
            host: host.to_owned(),
            source,
        };

        let server_name = ServerName::try_from(host.to_owned()).map_err(|e| HttpError::Tls {
            host: host.to_owned(),
            message: e.to_string(),
        })?;

        let tcp = TcpStream::connect((host, port)).await.map_err(io_error)?;
        let mut tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(io_error)?;

        tls.write_all(request).await.map_err(io_error)?;
        tls.flush().await.map_err(io_error)?;

        read_response(&mut tls, host, MAX_RESPONSE_BYTES).await
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn send(&self, host: &str, port: u16, request: Bytes) -> HttpResult<Bytes> {
        debug!(host, port, request_bytes = request.len(), "sending request");

        let response = tokio::time::timeout(self.timeout, self.exchange(host, port, &request))
            .await
            .map_err(|_| HttpError::Timeout {
                host: host.to_owned(),
                timeout: self.timeout,
            })??;

        debug!(host, response_bytes = response.len(), "received response");
        Ok(response)
    }
}
