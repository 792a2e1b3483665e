//! Shared types for the streamwire Streamable HTTP transport.
//!
//! This crate contains the JSON-RPC message model and codec, the protocol
//! constants and the persisted session state shared between the transport
//! and application handlers.

/// Default port for the streamwire server.
pub const DEFAULT_PORT: u16 = 8080;

pub mod jsonrpc;
pub mod protocol;
pub mod session;

// Re-export commonly used types
pub use jsonrpc::{
    error_codes, parse_messages, CodecError, ErrorEnvelope, JsonRpcError, JsonRpcErrorResponse,
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use protocol::{
    is_supported_protocol_version, negotiate_protocol_version,
    DEFAULT_NEGOTIATED_PROTOCOL_VERSION, LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
pub use session::SessionState;
