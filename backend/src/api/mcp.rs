//! MCP Streamable HTTP endpoint.
//!
//! Every method on the MCP route lands here and is routed to its session by
//! the [`SessionHost`]; the transport answers OPTIONS, GET, POST and DELETE
//! and rejects everything else with 405.

use axum::extract::Request;
use axum::response::Response;
use axum::Extension;
use tracing::debug;

use crate::mcp::session::describe;
use crate::mcp::SessionHost;

/// Any method on the MCP route.
pub async fn mcp_endpoint(Extension(host): Extension<SessionHost>, request: Request) -> Response {
    debug!(
        "MCP {} ({})",
        request.method(),
        describe(request.headers())
    );
    host.handle(request).await
}
