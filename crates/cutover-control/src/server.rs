//! TLS accept loop for the control plane.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Control-plane listener. Every connection must complete an mTLS handshake
/// before any request reaches the router.
pub struct ControlServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
}

impl ControlServer {
    pub async fn bind(
        addr: SocketAddr,
        tls: Arc<ServerConfig>,
        router: Router,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(tls),
            router,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// In-flight connections keep running on their own tasks after the
    /// loop stops accepting.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(%addr, "control plane listening");

        tokio::pin!(shutdown);
        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => {
                    info!(%addr, "control plane shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let acceptor = self.acceptor.clone();
            let service = TowerToHyperService::new(self.router.clone());
            tokio::spawn(async move {
                let tls = match acceptor.accept(stream).await {
                    Ok(tls) => tls,
                    Err(e) => {
                        warn!(%peer, error = %e, "tls handshake rejected");
                        return;
                    }
                };
                debug!(%peer, "control connection established");

                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(tls), service)
                    .await
                {
                    debug!(%peer, error = %e, "control connection closed with error");
                }
            });
        }
    }
}
