//! streamwire: a Streamable HTTP transport for JSON-RPC model-context
//! messages, with a session host and a small demo MCP server on top.

use axum::{
    routing::{any, get},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod storage;
pub mod transport;

use config::Config;
use mcp::{McpHandler, SessionHost};

/// Build the session host described by `config`, serving the demo handler.
pub fn create_host(config: &Config) -> SessionHost {
    SessionHost::new(
        config.transport_options(),
        Arc::new(McpHandler::new()),
        config.session_dir.clone(),
    )
}

/// Create the application router.
pub fn create_app(config: &Config) -> Router {
    create_app_with_host(create_host(config), &config.path)
}

/// Create the application router around an existing host.
pub fn create_app_with_host(host: SessionHost, path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(path, any(api::mcp::mcp_endpoint))
        .layer(Extension(host))
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}
