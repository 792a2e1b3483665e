//! JSON-RPC 2.0 message model and codec.
//!
//! Inbound bodies are either a single message object or a batch array. Every
//! element is classified as a request, notification, response or error; a
//! body that fails classification is rejected as a whole.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The only JSON-RPC version accepted on the wire.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes used by the transport and application handlers.
pub mod error_codes {
    /// Invalid JSON or an invalid JSON-RPC message.
    pub const PARSE_ERROR: i64 = -32700;
    /// Structurally valid message that violates the protocol.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Transport-level failure (bad method, not initialized, conflict).
    pub const TRANSPORT_ERROR: i64 = -32000;
    /// Unknown session.
    pub const SESSION_NOT_FOUND: i64 = -32001;
}

/// Error raised while decoding a request body.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid JSON-RPC message: {0}")]
    InvalidMessage(String),
}

impl CodecError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidMessage(reason.into())
    }
}

/// A JSON-RPC request id.
///
/// Ids are strings or integers; `1` and `"1"` are different ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Convert a raw JSON value into an id, if it has a legal id shape.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Number),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

/// JSON-RPC request: expects a response carrying the same id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl JsonRpcRequest {
    pub fn new(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification: a request without an id, never answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Map<String, Value>>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Successful JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Failed JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: JsonRpcError,
}

impl JsonRpcErrorResponse {
    pub fn new(id: impl Into<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            error: JsonRpcError::new(code, message),
        }
    }
}

/// Any JSON-RPC message travelling in either direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
}

impl JsonRpcMessage {
    /// The request, if this message is one.
    pub fn as_request(&self) -> Option<&JsonRpcRequest> {
        match self {
            Self::Request(request) => Some(request),
            _ => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Id of a response or error; `None` for requests and notifications.
    pub fn response_id(&self) -> Option<&RequestId> {
        match self {
            Self::Response(response) => Some(&response.id),
            Self::Error(error) => Some(&error.id),
            _ => None,
        }
    }

    /// Method name of a request or notification.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            _ => None,
        }
    }

    pub fn is_initialize_request(&self) -> bool {
        matches!(self, Self::Request(r) if r.method == crate::protocol::INITIALIZE_METHOD)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        Self::Request(request)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        Self::Notification(notification)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Response(response)
    }
}

impl From<JsonRpcErrorResponse> for JsonRpcMessage {
    fn from(error: JsonRpcErrorResponse) -> Self {
        Self::Error(error)
    }
}

impl TryFrom<Value> for JsonRpcMessage {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, CodecError> {
        let Value::Object(mut object) = value else {
            return Err(CodecError::invalid("message must be a JSON object"));
        };

        match object.remove("jsonrpc") {
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            _ => return Err(CodecError::invalid("jsonrpc must be \"2.0\"")),
        }

        let id = match object.remove("id") {
            None => None,
            Some(raw) => Some(
                RequestId::from_value(&raw)
                    .ok_or_else(|| CodecError::invalid("id must be a string or an integer"))?,
            ),
        };

        if let Some(method) = object.remove("method") {
            let Value::String(method) = method else {
                return Err(CodecError::invalid("method must be a string"));
            };
            let params = match object.remove("params") {
                None => None,
                Some(Value::Object(params)) => Some(params),
                Some(_) => return Err(CodecError::invalid("params must be an object")),
            };
            let jsonrpc = JSONRPC_VERSION.to_string();
            return Ok(match id {
                Some(id) => Self::Request(JsonRpcRequest {
                    jsonrpc,
                    id,
                    method,
                    params,
                }),
                None => Self::Notification(JsonRpcNotification {
                    jsonrpc,
                    method,
                    params,
                }),
            });
        }

        let Some(id) = id else {
            return Err(CodecError::invalid("response is missing an id"));
        };

        match (object.remove("result"), object.remove("error")) {
            (Some(result), None) => Ok(Self::Response(JsonRpcResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                result,
            })),
            (None, Some(error)) => {
                let error: JsonRpcError = serde_json::from_value(error)
                    .map_err(|e| CodecError::invalid(format!("malformed error object: {e}")))?;
                Ok(Self::Error(JsonRpcErrorResponse {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id,
                    error,
                }))
            }
            (Some(_), Some(_)) => Err(CodecError::invalid(
                "message carries both result and error",
            )),
            (None, None) => Err(CodecError::invalid(
                "message has no method, result or error",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}

/// Decode a request body into its messages.
///
/// A single object yields one message; an array yields the batch in order.
pub fn parse_messages(body: &[u8]) -> Result<Vec<JsonRpcMessage>, CodecError> {
    let value: Value = serde_json::from_slice(body)?;
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(CodecError::invalid("batch must not be empty"));
            }
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    JsonRpcMessage::try_from(item).map_err(|e| match e {
                        CodecError::InvalidMessage(reason) => {
                            CodecError::invalid(format!("batch element {index}: {reason}"))
                        }
                        other => other,
                    })
                })
                .collect()
        }
        other => Ok(vec![JsonRpcMessage::try_from(other)?]),
    }
}

/// Error body produced by the transport itself, always with a null id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub jsonrpc: &'static str,
    pub error: JsonRpcError,
    pub id: Option<RequestId>,
}

impl ErrorEnvelope {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            error: JsonRpcError::new(code, message),
            id: None,
        }
    }
}
