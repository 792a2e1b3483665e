//! Error types for the transport.
//!
//! [`HttpError`] covers every failure reported to the HTTP client as a
//! JSON-RPC error envelope. [`TransportError`] covers failures that have no
//! pending HTTP response to travel on: routing violations returned from
//! `send`, dropped SSE writers and storage failures.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use streamwire_types::{error_codes, CodecError, ErrorEnvelope, RequestId};

use crate::storage::StorageError;

/// Methods listed in the `Allow` header of a 405 response.
pub const ALLOWED_METHODS: &str = "GET, POST, DELETE, OPTIONS";

/// Client-facing error, rendered as `{jsonrpc, error: {code, message}, id: null}`.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Not Acceptable: {0}")]
    NotAcceptable(&'static str),

    #[error("Unsupported Media Type: Content-Type must be application/json")]
    UnsupportedMediaType,

    #[error("Payload Too Large: message exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid Request: {0}")]
    InvalidRequest(&'static str),

    #[error("Bad Request: Server not initialized")]
    NotInitialized,

    #[error("Bad Request: Mcp-Session-Id header is required")]
    MissingSessionId,

    #[error("Bad Request: Mcp-Session-Id header must be a single value")]
    AmbiguousSessionId,

    #[error("Bad Request: Unsupported protocol version: {version} (supported versions: {supported})")]
    UnsupportedProtocolVersion { version: String, supported: String },

    #[error("Session not found")]
    SessionNotFound,

    #[error("Conflict: {0}")]
    Conflict(&'static str),

    #[error("Method not allowed.")]
    MethodNotAllowed,

    #[error("Internal error: timed out waiting for responses")]
    ResponseTimeout,

    #[error("Transport closed")]
    TransportClosed,
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Parse(_)
            | Self::InvalidRequest(_)
            | Self::NotInitialized
            | Self::MissingSessionId
            | Self::AmbiguousSessionId
            | Self::UnsupportedProtocolVersion { .. } => StatusCode::BAD_REQUEST,
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::ResponseTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::TransportClosed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// JSON-RPC error code carried in the envelope.
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => error_codes::PARSE_ERROR,
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::SessionNotFound => error_codes::SESSION_NOT_FOUND,
            Self::ResponseTimeout => error_codes::INTERNAL_ERROR,
            _ => error_codes::TRANSPORT_ERROR,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::new(self.code(), self.to_string())
    }
}

impl From<CodecError> for HttpError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Json(_) => Self::Parse("Invalid JSON".to_string()),
            CodecError::InvalidMessage(reason) => {
                Self::Parse(format!("Invalid JSON-RPC message: {reason}"))
            }
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.envelope())).into_response();
        if matches!(self, Self::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        }
        response
    }
}

/// Failure outside any pending HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No connection established for request ID: {0}")]
    UnknownRequest(RequestId),

    #[error("Stream {stream_id} for request ID {request_id} is no longer open")]
    StreamClosed {
        request_id: RequestId,
        stream_id: String,
    },

    #[error("Client disconnected from stream {0}")]
    Disconnected(String),

    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code_mapping() {
        let cases = [
            (HttpError::NotAcceptable("x"), 406, -32000),
            (HttpError::UnsupportedMediaType, 415, -32000),
            (HttpError::Parse("Invalid JSON".into()), 400, -32700),
            (HttpError::InvalidRequest("x"), 400, -32600),
            (HttpError::NotInitialized, 400, -32000),
            (HttpError::MissingSessionId, 400, -32000),
            (HttpError::SessionNotFound, 404, -32001),
            (HttpError::Conflict("x"), 409, -32000),
            (HttpError::MethodNotAllowed, 405, -32000),
            (HttpError::ResponseTimeout, 504, -32603),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status().as_u16(), status, "{err}");
            assert_eq!(err.code(), code, "{err}");
        }
    }

    #[test]
    fn test_codec_errors_become_parse_errors() {
        let err = HttpError::from(streamwire_types::parse_messages(b"nope").unwrap_err());
        assert_eq!(err.to_string(), "Parse error: Invalid JSON");

        let err = HttpError::from(streamwire_types::parse_messages(b"{}").unwrap_err());
        assert!(err
            .to_string()
            .starts_with("Parse error: Invalid JSON-RPC message"));
    }

    #[test]
    fn test_method_not_allowed_sets_allow_header() {
        let response = HttpError::MethodNotAllowed.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get(header::ALLOW).unwrap(),
            ALLOWED_METHODS
        );
    }
}
