//! MCP (Model Context Protocol) Streamable HTTP support.
//!
//! The [`SessionHost`] maps `Mcp-Session-Id` values to live transports and
//! the demo [`McpHandler`] answers the requests delivered to them.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send JSON-RPC messages (JSON or SSE response)
//! - `GET /mcp` - Open the standalone SSE stream for server messages
//! - `DELETE /mcp` - Terminate the session
//! - `OPTIONS /mcp` - CORS preflight

pub mod handler;
pub mod session;

pub use handler::McpHandler;
pub use session::SessionHost;
