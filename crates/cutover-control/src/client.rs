//! mTLS client for peer control planes.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::handlers::PeerInfo;

const USER_AGENT: &str = concat!("cutover/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid peer address {0:?}")]
    InvalidPeer(String),

    #[error("failed to connect to {peer}: {source}")]
    Connect {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tls handshake with {peer} failed: {source}")]
    Tls {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),

    #[error("request to {peer} timed out after {timeout:?}")]
    Timeout { peer: String, timeout: Duration },

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected status {0}")]
    UnexpectedStatus(StatusCode),
}

impl ClientError {
    /// Whether the request may not have reached the peer's handler.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. }
                | ClientError::Tls { .. }
                | ClientError::Http(_)
                | ClientError::Timeout { .. }
        )
    }
}

/// Answer to `POST /migrate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateReply {
    /// 200: the peer swapped its broker.
    Migrated,
    /// 409: the peer had already been triggered.
    Conflict,
    /// Any other status.
    Rejected(StatusCode),
}

impl From<StatusCode> for MigrateReply {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::OK => MigrateReply::Migrated,
            StatusCode::CONFLICT => MigrateReply::Conflict,
            other => MigrateReply::Rejected(other),
        }
    }
}

/// Client for the `/info` and `/migrate` routes of peer nodes.
///
/// Peers are addressed as `host:port`; the host part is also the TLS
/// server name checked against the peer certificate.
#[derive(Clone)]
pub struct ControlClient {
    connector: TlsConnector,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(tls: Arc<ClientConfig>, timeout: Duration) -> Self {
        Self {
            connector: TlsConnector::from(tls),
            timeout,
        }
    }

    /// GET /info
    pub async fn info(&self, peer: &str) -> Result<PeerInfo, ClientError> {
        let (status, body) = self.send(peer, Method::GET, "/info").await?;
        if status != StatusCode::OK {
            return Err(ClientError::UnexpectedStatus(status));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// POST /migrate
    pub async fn migrate(&self, peer: &str) -> Result<MigrateReply, ClientError> {
        let (status, _) = self.send(peer, Method::POST, "/migrate").await?;
        Ok(MigrateReply::from(status))
    }

    async fn send(
        &self,
        peer: &str,
        method: Method,
        path: &str,
    ) -> Result<(StatusCode, Bytes), ClientError> {
        let server_name = server_name(peer)?;
        let uri = format!("https://{peer}{path}");

        let exchange = async {
            let stream = TcpStream::connect(peer)
                .await
                .map_err(|source| ClientError::Connect {
                    peer: peer.to_string(),
                    source,
                })?;
            let tls = self
                .connector
                .connect(server_name, stream)
                .await
                .map_err(|source| ClientError::Tls {
                    peer: peer.to_string(),
                    source,
                })?;

            let (mut sender, conn) = http1::handshake(TokioIo::new(tls)).await?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let mut builder = Request::builder()
                .method(method.clone())
                .uri(&uri)
                .header(header::HOST, peer)
                .header(header::USER_AGENT, USER_AGENT);
            if method == Method::POST {
                builder = builder.header(header::CONTENT_LENGTH, 0);
            }
            let req = builder.body(Empty::<Bytes>::new())?;

            let resp = sender.send_request(req).await?;
            let status = resp.status();
            let body = resp.into_body().collect().await?.to_bytes();
            debug!(%uri, %status, "control call completed");
            Ok((status, body))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                peer: peer.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

fn server_name(peer: &str) -> Result<ServerName<'static>, ClientError> {
    let invalid = || ClientError::InvalidPeer(peer.to_string());
    let (host, port) = peer.rsplit_once(':').ok_or_else(invalid)?;
    if port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(host)
        .map(|name| name.to_owned())
        .map_err(|_| invalid())
}
