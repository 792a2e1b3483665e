//! Request header checks: content negotiation and protocol version.

use axum::http::{header, HeaderMap};
use streamwire_types::protocol::{
    is_supported_protocol_version, PROTOCOL_VERSION_HEADER, SUPPORTED_PROTOCOL_VERSIONS,
};

use crate::error::HttpError;

pub(crate) const EVENT_STREAM: &str = "text/event-stream";
pub(crate) const APPLICATION_JSON: &str = "application/json";

/// Whether any `Accept` header lists `mime` as a media range.
pub(crate) fn accepts(headers: &HeaderMap, mime: &str) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|range| range.split(';').next().unwrap_or("").trim())
        .any(|range| range.eq_ignore_ascii_case(mime))
}

pub(crate) fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(APPLICATION_JSON))
}

/// Declared body length, when the client sent one.
pub(crate) fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Accept a missing header or any supported version.
///
/// The header is not compared with the version negotiated at initialize.
pub(crate) fn validate_protocol_version(headers: &HeaderMap) -> Result<(), HttpError> {
    let Some(value) = headers.get(PROTOCOL_VERSION_HEADER) else {
        return Ok(());
    };
    let version = String::from_utf8_lossy(value.as_bytes()).into_owned();
    if is_supported_protocol_version(&version) {
        Ok(())
    } else {
        Err(HttpError::UnsupportedProtocolVersion {
            version,
            supported: SUPPORTED_PROTOCOL_VERSIONS.join(", "),
        })
    }
}
