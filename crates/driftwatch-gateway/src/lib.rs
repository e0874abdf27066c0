// crates/driftwatch-gateway/src/lib.rs
// ============================================================================
// Module: Gateway
// Description: REST surface (POST start, GET poll) over the Orchestrator and
//              per-pair Pair Store instances.
// Purpose: Expose the comparison pipeline over HTTP.
// Dependencies: axum, tokio, tower, tower-http, driftwatch-core,
//               driftwatch-orchestrator, driftwatch-store-sqlite,
//               driftwatch-explain, tracing
// ============================================================================

//! ## Overview
//! [`serve`] binds an axum [`Router`](axum::Router) built by [`routes::router`]
//! and runs it to completion, following the teacher's HTTP transport shape
//! in `decision-gate-mcp`'s `serve_http` (bind, build state, `axum::serve`).

#![deny(missing_docs)]

/// Gateway configuration loading and validation.
pub mod config;
/// HTTP routes, request/response shapes, and per-pair store routing.
pub mod routes;

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

pub use config::GatewayConfig;
pub use routes::AppState;
pub use routes::GatewayError;

/// Errors that can prevent the Gateway from starting.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The bind address was invalid or already in use.
    #[error("gateway bind error: {0}")]
    Bind(String),
    /// The server failed while running.
    #[error("gateway server error: {0}")]
    Server(String),
    /// Gateway state could not be constructed.
    #[error("gateway state error: {0}")]
    State(#[from] GatewayError),
}

/// Builds Gateway state from `config` and serves the REST API until the
/// process is terminated.
///
/// # Errors
/// Returns [`ServeError`] when the bind address is invalid, state
/// construction fails, or the underlying server errors.
pub async fn serve(config: GatewayConfig) -> Result<(), ServeError> {
    let addr: std::net::SocketAddr =
        config.server.bind.parse().map_err(|_| ServeError::Bind(config.server.bind.clone()))?;
    let cors_permissive = config.server.cors_permissive;
    let state = Arc::new(AppState::new(&config)?);
    let app = routes::router(state, cors_permissive);

    info!(%addr, "driftwatch gateway listening");
    let listener =
        tokio::net::TcpListener::bind(addr).await.map_err(|err| ServeError::Bind(err.to_string()))?;
    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|err| ServeError::Server(err.to_string()))
}
