//! Network access to hosts: the bare connectivity probe and the two HTTP endpoints.
//!
//! Pollers only ever talk to hosts through [`HostTransport`], which keeps the
//! polling logic independent of TLS and HTTP details.

use core::net::{IpAddr, SocketAddr};
use std::sync::Once;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error as ThisError;
use tokio::net::TcpStream;
use tracing::debug;

use streamhost_common::{Endpoint, ServerInfo};

use crate::config::NetworkConfig;

static INIT_RUSTLS: Once = Once::new();

/// Errors returned by a single request to a host.
#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error("failed to set up HTTP client")]
    Setup(#[source] reqwest::Error),
    #[error("request to {addr} failed")]
    Request {
        addr: IpAddr,
        #[source]
        source: reqwest::Error,
    },
    #[error("{addr} answered with status {status}")]
    Status { addr: IpAddr, status: StatusCode },
    #[error("malformed server-info from {addr}")]
    Decode {
        addr: IpAddr,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything the pollers need from the network.
#[async_trait]
pub trait HostTransport: Send + Sync {
    /// Tries to open a TCP connection to the host's HTTPS port and closes it right away.
    ///
    /// Callers bound this with their own timeout.
    async fn probe(&self, addr: IpAddr) -> bool;

    /// Fetches identity and status of the host at `addr`.
    async fn server_info(&self, addr: IpAddr) -> Result<ServerInfo, TransportError>;

    /// Fetches the raw application catalog of the host at `addr`.
    async fn app_list(&self, addr: IpAddr) -> Result<String, TransportError>;
}

/// [`HostTransport`] speaking HTTPS to real hosts.
///
/// Hosts present self-signed certificates; trust is established by pairing, so
/// certificate validation is not done here.
#[derive(Debug, Clone)]
pub struct HttpsTransport {
    http: reqwest::Client,
    port: u16,
    scheme: &'static str,
    unique_id: String,
}

impl HttpsTransport {
    /// Builds the transport, identifying this client with `unique_id` on every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(network: &NetworkConfig, unique_id: String) -> Result<Self, TransportError> {
        INIT_RUSTLS.call_once(|| {
            // An embedding application may have installed its own provider already.
            drop(rustls::crypto::ring::default_provider().install_default());
        });

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(network.request_timeout())
            .timeout(network.request_timeout())
            .build()
            .map_err(TransportError::Setup)?;

        Ok(Self {
            http,
            port: network.https_port,
            scheme: if network.tls { "https" } else { "http" },
            unique_id,
        })
    }

    fn url(&self, addr: IpAddr, endpoint: Endpoint) -> String {
        format!(
            "{}://{}/{endpoint}?uniqueid={}",
            self.scheme,
            SocketAddr::new(addr, self.port),
            self.unique_id
        )
    }

    async fn get_text(&self, addr: IpAddr, endpoint: Endpoint) -> Result<String, TransportError> {
        let url = self.url(addr, endpoint);
        debug!(%url, "Requesting");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| TransportError::Request { addr, source })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status { addr, status });
        }
        resp.text()
            .await
            .map_err(|source| TransportError::Request { addr, source })
    }
}

#[async_trait]
impl HostTransport for HttpsTransport {
    async fn probe(&self, addr: IpAddr) -> bool {
        match TcpStream::connect(SocketAddr::new(addr, self.port)).await {
            Ok(_stream) => true,
            Err(e) => {
                debug!(%addr, "Fast poll failed: {e}");
                false
            }
        }
    }

    async fn server_info(&self, addr: IpAddr) -> Result<ServerInfo, TransportError> {
        let body = self.get_text(addr, Endpoint::ServerInfo).await?;
        serde_json::from_str(&body).map_err(|source| TransportError::Decode { addr, source })
    }

    async fn app_list(&self, addr: IpAddr) -> Result<String, TransportError> {
        self.get_text(addr, Endpoint::AppList).await
    }
}
