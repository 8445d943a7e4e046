//! HTTP/WebSocket API layer.
//!
//! Thin handlers that delegate to the session registry. This module owns
//! router construction and server startup.

use std::sync::Arc;

use thiserror::Error;

use crate::config::Config;
use crate::session::SessionRegistry;

pub mod http;
pub mod media_ws;
pub mod transcript_ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// A thin wrapper over the registry and configuration; all business logic
/// lives behind the registry.
#[derive(Clone)]
pub struct AppState {
    /// Owns every live session.
    pub registry: Arc<SessionRegistry>,
    /// Application configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Creates the API state from bootstrapped services.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, config: Arc<Config>) -> Self {
        Self { registry, config }
    }
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let preferred_port = state.config.preferred_port;
    let (port, listener) = if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        (preferred_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(47600, 47610).await?
    };

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(listener, app).await?;
    Ok(())
}
