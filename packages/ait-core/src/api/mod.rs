//! HTTP API layer: router construction and server startup.
//!
//! Handlers are thin: validate the request, charge the rate limiter,
//! insert into session/conversation/cache state synchronously, then hand
//! the real work off to a worker pool and return `425` for the caller to
//! poll. All business logic lives in [`crate::session`], [`crate::queue`]
//! and [`crate::pipeline`].

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::state::AppState;

pub mod http;

/// Errors that can occur while starting the HTTP listener.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to {0}: {1}")]
    Bind(SocketAddr, std::io::Error),
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Binds `config.server.host:config.server.port` and serves the HTTP
/// surface until the listener is closed. `ConnectInfo<SocketAddr>` is
/// wired in at the `axum::serve` call site so handlers can recover the
/// peer address for rate limiting and direct-stream listener identity.
pub async fn start_server(state: Arc<AppState>) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], state.config.server.port)));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(addr, e))?;

    log::info!("ait-server listening on http://{addr}");

    let app = http::create_router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
