//! Demo MCP request handler.
//!
//! Answers the handshake, `ping` and a single `echo` tool. Every request is
//! processed on its own task and answered through the transport it came in on.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use streamwire_types::error_codes;
use streamwire_types::protocol::{negotiate_protocol_version, INITIALIZE_METHOD};
use streamwire_types::{
    JsonRpcError, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse,
};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::{StreamableHttpTransport, TransportHandler};

/// Server name reported in `serverInfo`.
pub const SERVER_NAME: &str = "streamwire";

/// Name of the only tool this server offers.
pub const ECHO_TOOL: &str = "echo";

/// Tool call parameters from MCP.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// MCP request handler.
#[derive(Debug, Default)]
pub struct McpHandler;

impl McpHandler {
    pub fn new() -> Self {
        Self
    }

    /// Build the reply to one request.
    pub fn handle_request(request: &JsonRpcRequest) -> JsonRpcMessage {
        debug!("MCP: Handling method: {}", request.method);
        let params = request.params.as_ref();

        let result = match request.method.as_str() {
            INITIALIZE_METHOD => Ok(Self::handle_initialize(params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(Self::handle_list_tools()),
            "tools/call" => Self::handle_call_tool(params),
            other => Err(JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(request.id.clone(), value).into(),
            Err(error) => JsonRpcErrorResponse {
                jsonrpc: request.jsonrpc.clone(),
                id: request.id.clone(),
                error,
            }
            .into(),
        }
    }

    fn handle_initialize(params: Option<&Map<String, Value>>) -> Value {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);

        json!({
            "protocolVersion": negotiate_protocol_version(requested),
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    fn handle_list_tools() -> Value {
        json!({
            "tools": [
                {
                    "name": ECHO_TOOL,
                    "description": "Echo the given text back",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "text": {
                                "type": "string",
                                "description": "Text to echo"
                            }
                        },
                        "required": ["text"]
                    }
                }
            ]
        })
    }

    fn handle_call_tool(params: Option<&Map<String, Value>>) -> Result<Value, JsonRpcError> {
        let params: ToolCallParams = params
            .cloned()
            .map(Value::Object)
            .and_then(|value| serde_json::from_value(value).ok())
            .ok_or_else(|| {
                JsonRpcError::new(error_codes::INVALID_PARAMS, "Invalid tool call parameters")
            })?;

        if params.name != ECHO_TOOL {
            return Err(JsonRpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            ));
        }

        let text = params
            .arguments
            .as_ref()
            .and_then(|args| args.get("text"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                JsonRpcError::new(error_codes::INVALID_PARAMS, "Missing 'text' argument")
            })?;

        Ok(json!({
            "content": [
                { "type": "text", "text": text }
            ]
        }))
    }

    /// `_meta.progressToken` of a `tools/call` request, if the caller asked
    /// for progress.
    pub fn progress_token(request: &JsonRpcRequest) -> Option<Value> {
        if request.method != "tools/call" {
            return None;
        }
        request
            .params
            .as_ref()?
            .get("_meta")?
            .get("progressToken")
            .cloned()
    }

    fn progress_notification(token: Value) -> JsonRpcMessage {
        let params = Map::from_iter([
            ("progressToken".to_string(), token),
            ("progress".to_string(), json!(1)),
            ("total".to_string(), json!(1)),
        ]);
        JsonRpcNotification::new("notifications/progress", Some(params)).into()
    }
}

impl TransportHandler for McpHandler {
    fn on_message(&self, transport: &StreamableHttpTransport, message: JsonRpcMessage) {
        let JsonRpcMessage::Request(request) = message else {
            debug!(
                "MCP: Ignoring {}",
                message.method().unwrap_or("client response")
            );
            return;
        };

        let transport = transport.clone();
        tokio::spawn(async move {
            if let Some(token) = Self::progress_token(&request) {
                let progress = Self::progress_notification(token);
                if let Err(e) = transport.send(progress, Some(request.id.clone())) {
                    warn!("MCP: Failed to send progress for {}: {}", request.id, e);
                }
            }

            let reply = Self::handle_request(&request);
            if let Err(e) = transport.send(reply, None) {
                warn!("MCP: Failed to answer {}: {}", request.id, e);
            }
        });
    }

    fn on_close(&self) {
        info!("MCP: Session closed");
    }

    fn on_error(&self, error: &TransportError) {
        warn!("MCP: Transport error: {}", error);
    }
}
