//! Protocol version constants, header names and version negotiation.

/// Newest protocol version this implementation speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Version assumed when a client does not state one.
pub const DEFAULT_NEGOTIATED_PROTOCOL_VERSION: &str = "2025-03-26";

/// Every protocol version accepted in the `MCP-Protocol-Version` header.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[
    LATEST_PROTOCOL_VERSION,
    "2025-03-26",
    "2024-11-05",
    "2024-10-07",
];

/// Header carrying the session id (lowercase, as used on the wire by HTTP/2).
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header carrying the protocol version of every post-initialize request.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Method name of the handshake request.
pub const INITIALIZE_METHOD: &str = "initialize";

pub fn is_supported_protocol_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Pick the version to answer an initialize request with.
///
/// No requested version means the baseline version; a version we do not
/// support is answered with the latest one, leaving the client to decide
/// whether it can continue.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    match requested {
        None => DEFAULT_NEGOTIATED_PROTOCOL_VERSION,
        Some(version) => SUPPORTED_PROTOCOL_VERSIONS
            .iter()
            .copied()
            .find(|supported| *supported == version)
            .unwrap_or(LATEST_PROTOCOL_VERSION),
    }
}
