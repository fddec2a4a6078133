//! MCP server implementation.
//!
//! Handles newline-delimited JSON-RPC 2.0 over stdio according to the MCP
//! protocol specification. Each request runs on its own task so a slow tool
//! call never holds up the ones behind it; responses are written by a single
//! writer task in completion order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::connection::ConnectionManager;
use crate::envelope;
use crate::error::{rpc_codes, McpError, Result};
use crate::tools::ToolRegistry;

/// MCP protocol version we support.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server information.
const SERVER_NAME: &str = "mongodb-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Responses queued for the writer before request tasks wait.
const RESPONSE_QUEUE: usize = 64;

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, must be "2.0"
    pub jsonrpc: String,
    /// Request id, absent for notifications
    pub id: Option<JsonValue>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Option<JsonValue>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol version
    pub jsonrpc: String,
    /// Id of the request being answered
    pub id: Option<JsonValue>,
    /// Result on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    /// Error on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<JsonValue>, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<JsonValue>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }

    /// Create an error response from an McpError.
    pub fn from_error(id: Option<JsonValue>, err: McpError) -> Self {
        Self::error(id, err.rpc_code(), err.to_string())
    }
}

/// MCP server.
///
/// Cheap to clone; clones share the registry and the connection manager.
#[derive(Clone)]
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    manager: Arc<ConnectionManager>,
}

impl McpServer {
    /// Create a new MCP server.
    pub fn new(registry: ToolRegistry, manager: Arc<ConnectionManager>) -> Self {
        Self {
            registry: Arc::new(registry),
            manager,
        }
    }

    /// The connection manager shared by every tool call.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Run the server, reading from stdin and writing to stdout.
    pub async fn run(&self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve requests from `input` until EOF, writing responses to `output`.
    ///
    /// Returns once every accepted request has been answered.
    pub async fn serve<R, W>(&self, input: R, output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(RESPONSE_QUEUE);

        let writer = tokio::spawn(async move {
            let mut output = output;
            while let Some(response) = rx.recv().await {
                let response_json = serde_json::to_string(&response)?;
                output.write_all(response_json.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
            Ok::<(), McpError>(())
        });

        let mut reader = BufReader::new(input);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                // EOF - client disconnected
                break;
            }

            let request = line.trim().to_string();
            if request.is_empty() {
                continue;
            }

            let server = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(response) = server.handle_line(&request).await {
                    if tx.send(response).await.is_err() {
                        tracing::warn!("Response dropped: writer closed");
                    }
                }
            });
        }

        // The writer drains once every request task has released its sender.
        drop(tx);
        writer
            .await
            .map_err(|e| McpError::Internal(format!("writer task failed: {}", e)))?
    }

    /// Handle one raw input line. Returns `None` for notifications.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(JsonRpcResponse::error(
                None,
                rpc_codes::PARSE_ERROR,
                format!("Parse error: {}", e),
            )),
        }
    }

    /// Handle a single JSON-RPC request.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        // Validate JSON-RPC version
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id,
                rpc_codes::INVALID_REQUEST,
                "Invalid JSON-RPC version".to_string(),
            ));
        }

        tracing::debug!(method = %request.method, "Handling request");

        // Notifications get no response
        let Some(id) = request.id.clone() else {
            if !request.method.starts_with("notifications/") {
                tracing::debug!(method = %request.method, "Ignoring notification");
            }
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "ping" => JsonRpcResponse::success(Some(id), json!({})),
            _ => JsonRpcResponse::error(
                Some(id),
                rpc_codes::METHOD_NOT_FOUND,
                format!("Unknown method: {}", request.method),
            ),
        };
        Some(response)
    }

    /// Handle the initialize request.
    fn handle_initialize(&self, id: JsonValue) -> JsonRpcResponse {
        tracing::info!("Client initialized");
        JsonRpcResponse::success(
            Some(id),
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION
                }
            }),
        )
    }

    /// Handle the tools/list request.
    fn handle_tools_list(&self, id: JsonValue) -> JsonRpcResponse {
        let tools: Vec<JsonValue> = self
            .registry
            .tools()
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema
                })
            })
            .collect();

        JsonRpcResponse::success(Some(id), json!({ "tools": tools }))
    }

    /// Handle the tools/call request.
    async fn handle_tools_call(&self, id: JsonValue, params: Option<JsonValue>) -> JsonRpcResponse {
        let id = Some(id);

        // Extract name and arguments from params
        let mut params = match params {
            Some(JsonValue::Object(obj)) => obj,
            _ => {
                return JsonRpcResponse::error(
                    id,
                    rpc_codes::INVALID_PARAMS,
                    "Missing params object".to_string(),
                )
            }
        };

        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => return JsonRpcResponse::from_error(id, McpError::invalid("name", "is required")),
        };

        let arguments = match params.remove("arguments") {
            Some(JsonValue::Object(obj)) => obj,
            Some(JsonValue::Null) | None => Map::new(),
            _ => {
                return JsonRpcResponse::from_error(id, McpError::invalid("arguments", "must be an object"))
            }
        };

        // Tool faults travel inside the result as an error envelope
        let result = self.registry.dispatch(&self.manager, &name, arguments).await;
        let is_error = envelope::is_error(&result);

        JsonRpcResponse::success(
            id,
            json!({
                "content": [{
                    "type": "text",
                    "text": serde_json::to_string(&result).unwrap_or_else(|_| "null".to_string())
                }],
                "isError": is_error
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::connection::ConnectionDescriptor;
    use crate::driver::{Connector, MongoBackend};
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl Connector for Unreachable {
        async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn MongoBackend>> {
            Err(McpError::Connection(format!("{} unreachable", descriptor.host)))
        }
    }

    fn server() -> McpServer {
        let manager = ConnectionManager::new(Arc::new(Unreachable), Settings::default());
        McpServer::new(ToolRegistry::new(), Arc::new(manager))
    }

    #[test]
    fn test_json_rpc_response_success() {
        let response = JsonRpcResponse::success(Some(JsonValue::Number(1.into())), json!({"ok": true}));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_json_rpc_response_error() {
        let response = JsonRpcResponse::error(Some(JsonValue::Number(1.into())), -32600, "Invalid".to_string());
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"error\""));
        assert!(!json.contains("\"result\""));
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "mongodb-mcp");
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let response = server()
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_parse_error() {
        let response = server().handle_line("{not json").await.unwrap();
        assert_eq!(response.error.unwrap().code, rpc_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, rpc_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tools_list_matches_registry() {
        let server = server();
        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#)
            .await
            .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, server.registry.tools().len());
    }

    #[tokio::test]
    async fn test_tool_error_is_content_not_rpc_error() {
        let response = server()
            .handle_line(
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"mongodb_list_databases"}}"#,
            )
            .await
            .unwrap();
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        let envelope: JsonValue =
            serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(envelope["error_type"], "NotConnectedError");
    }

    #[tokio::test]
    async fn test_tools_call_requires_name() {
        let response = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{}}"#)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, rpc_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_serve_answers_every_request() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"mongodb_get_connection_status"}}"#,
            "\n"
        );
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        server().serve(input.as_bytes(), server_side).await.unwrap();

        let mut output = String::new();
        let mut reader = BufReader::new(client);
        let mut ids = Vec::new();
        while reader.read_line(&mut output).await.unwrap() > 0 {
            let response: JsonValue = serde_json::from_str(output.trim()).unwrap();
            ids.push(response["id"].as_i64().unwrap());
            output.clear();
        }
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }
}
