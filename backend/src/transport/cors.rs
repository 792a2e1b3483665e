//! CORS headers for the transport route.
//!
//! Preflight responses advertise methods, headers and max-age; every other
//! response only carries the allowed origin and the exposed headers.

use axum::http::{header, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_ORIGIN: &str = "*";
const DEFAULT_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const DEFAULT_HEADERS: &str =
    "Content-Type, Accept, Authorization, mcp-session-id, MCP-Protocol-Version";
const DEFAULT_EXPOSE_HEADERS: &str = "mcp-session-id";
const DEFAULT_MAX_AGE: u64 = 86400;

/// Caller overrides, merged field by field over the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsOptions {
    /// `Access-Control-Allow-Origin` (default `*`)
    #[serde(default)]
    pub origin: Option<String>,
    /// `Access-Control-Allow-Methods` (default `GET, POST, DELETE, OPTIONS`)
    #[serde(default)]
    pub methods: Option<String>,
    /// `Access-Control-Allow-Headers`
    #[serde(default)]
    pub headers: Option<String>,
    /// `Access-Control-Expose-Headers` (default `mcp-session-id`)
    #[serde(default)]
    pub expose_headers: Option<String>,
    /// `Access-Control-Max-Age` in seconds (default 86400)
    #[serde(default)]
    pub max_age: Option<u64>,
}

/// Resolved header values, built once per transport.
#[derive(Debug, Clone)]
pub(crate) struct CorsPolicy {
    origin: HeaderValue,
    methods: HeaderValue,
    headers: HeaderValue,
    expose_headers: HeaderValue,
    max_age: HeaderValue,
}

impl CorsPolicy {
    pub(crate) fn new(options: &CorsOptions) -> Self {
        Self {
            origin: header_value("origin", options.origin.as_deref(), DEFAULT_ORIGIN),
            methods: header_value("methods", options.methods.as_deref(), DEFAULT_METHODS),
            headers: header_value("headers", options.headers.as_deref(), DEFAULT_HEADERS),
            expose_headers: header_value(
                "expose_headers",
                options.expose_headers.as_deref(),
                DEFAULT_EXPOSE_HEADERS,
            ),
            max_age: HeaderValue::from(options.max_age.unwrap_or(DEFAULT_MAX_AGE)),
        }
    }

    /// Headers for an OPTIONS preflight response.
    pub(crate) fn apply_preflight(&self, headers: &mut HeaderMap) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.origin.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.headers.clone());
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
    }

    /// Headers for any non-preflight response, errors included.
    pub(crate) fn apply_actual(&self, headers: &mut HeaderMap) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.origin.clone());
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            self.expose_headers.clone(),
        );
    }
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::new(&CorsOptions::default())
    }
}

fn header_value(field: &str, configured: Option<&str>, default: &'static str) -> HeaderValue {
    match configured {
        Some(value) => HeaderValue::from_str(value).unwrap_or_else(|_| {
            warn!("Ignoring invalid CORS {} value: {:?}", field, value);
            HeaderValue::from_static(default)
        }),
        None => HeaderValue::from_static(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_defaults() {
        let mut headers = HeaderMap::new();
        CorsPolicy::default().apply_preflight(&mut headers);

        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, DELETE, OPTIONS"
        );
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type, Accept, Authorization, mcp-session-id, MCP-Protocol-Version"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
        assert!(!headers.contains_key(header::ACCESS_CONTROL_EXPOSE_HEADERS));
    }

    #[test]
    fn test_actual_response_headers_only_origin_and_expose() {
        let mut headers = HeaderMap::new();
        CorsPolicy::default().apply_actual(&mut headers);

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            headers[header::ACCESS_CONTROL_EXPOSE_HEADERS],
            "mcp-session-id"
        );
    }

    #[test]
    fn test_overrides_merge_over_defaults() {
        let policy = CorsPolicy::new(&CorsOptions {
            origin: Some("https://app.example".to_string()),
            max_age: Some(60),
            expose_headers: Some("mcp-session-id, x-trace".to_string()),
            ..Default::default()
        });

        let mut preflight = HeaderMap::new();
        policy.apply_preflight(&mut preflight);
        assert_eq!(
            preflight[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example"
        );
        assert_eq!(preflight[header::ACCESS_CONTROL_MAX_AGE], "60");
        assert_eq!(
            preflight[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, DELETE, OPTIONS"
        );

        let mut actual = HeaderMap::new();
        policy.apply_actual(&mut actual);
        assert_eq!(
            actual[header::ACCESS_CONTROL_EXPOSE_HEADERS],
            "mcp-session-id, x-trace"
        );
    }

    #[test]
    fn test_invalid_override_falls_back() {
        let policy = CorsPolicy::new(&CorsOptions {
            origin: Some("bad\nvalue".to_string()),
            ..Default::default()
        });
        let mut headers = HeaderMap::new();
        policy.apply_actual(&mut headers);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
