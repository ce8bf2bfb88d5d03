//! HTTP surface for expert-availability
//!
//! Thin axum layer over the expert manager and the sync orchestrator. All
//! handlers live in [`router`]; this module owns binding and shutdown.

pub mod router;

pub use router::{build_router, AppState, ExpertBatchRequest, HealthResponse, LookupRequest};

use std::future::Future;
use std::net::{IpAddr, SocketAddr};

use axum::Router;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::database::Database;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    #[error("Server error: {0}")]
    Serve(String),
}

/// Serves the API until a shutdown future resolves
pub struct Server<D: Database + 'static> {
    config: ServerConfig,
    state: AppState<D>,
}

impl<D: Database + 'static> Server<D> {
    pub fn new(config: ServerConfig, state: AppState<D>) -> Self {
        Self { config, state }
    }

    /// Socket address from the configured host and port
    pub fn bind_addr(&self) -> Result<SocketAddr, ServerError> {
        let ip: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|_| ServerError::Bind(format!("invalid host {:?}", self.config.host)))?;
        Ok(SocketAddr::new(ip, self.config.port))
    }

    /// Router with request tracing and response compression
    pub fn app(state: AppState<D>) -> Router {
        build_router(state)
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new())
    }

    /// Bind and serve; in-flight requests finish before returning
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))?;
        let local = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        info!(addr = %local, "HTTP server listening");

        axum::serve(listener, Self::app(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
