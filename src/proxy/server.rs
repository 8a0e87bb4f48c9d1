//! Gateway server: bind, serve, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::policy::Policy;
use crate::proxy::router::{build_router, GatewayState};
use crate::proxy::shutdown::ShutdownManager;
use crate::proxy::upstream::{TimeoutConfig, UpstreamClient};

/// Process-level settings, parsed once at startup.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Address the gateway listens on.
    pub bind_addr: String,
    /// Upstream base URL, without a trailing slash.
    pub upstream_url: String,
}

pub struct ProxyServer {
    bind_addr: String,
    app: axum::Router,
    shutdown: Arc<ShutdownManager>,
    listener: Option<TcpListener>,
}

impl ProxyServer {
    pub fn new(settings: &ServerSettings, policy: Arc<Policy>) -> Self {
        let upstream = Arc::new(UpstreamClient::new(
            settings.upstream_url.clone(),
            TimeoutConfig::default(),
        ));
        let state = GatewayState::new(policy, upstream);
        Self {
            bind_addr: settings.bind_addr.clone(),
            app: build_router(state),
            shutdown: Arc::new(ShutdownManager::new()),
            listener: None,
        }
    }

    pub fn shutdown_handle(&self) -> Arc<ShutdownManager> {
        self.shutdown.clone()
    }

    /// Bind the listener ahead of `run()`. Returns the actual bound address,
    /// which is what callers want when binding port 0.
    pub async fn try_bind(&mut self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        let addr = listener.local_addr()?;
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Serve until shutdown is signaled, then drain in-flight connections.
    pub async fn run(mut self) -> std::io::Result<()> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => TcpListener::bind(&self.bind_addr).await?,
        };
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "gateway listening");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                shutdown.wait_for_shutdown().await;
            })
            .await?;

        tracing::info!("gateway stopped");
        Ok(())
    }
}
