//! Tool registry and dispatch pipeline.
//!
//! Every call runs the same steps: resolve the tool, check the connection guard,
//! validate parameters against the declared schema, then run the handler on a
//! leased connection. Reads carry the query deadline to the server; a call that
//! overruns it by the grace period is reported as timed out but never
//! cancelled. Faults become error envelopes.

pub mod collections;
pub mod connection;
pub mod databases;
pub mod documents;
pub mod indexes;
pub mod stats;

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::connection::ConnectionManager;
use crate::convert::get_string_arg;
use crate::driver::Namespace;
use crate::envelope;
use crate::error::{McpError, Result};
use crate::validate::validate_args;

/// Slack past the query timeout before a call stops being awaited, so the
/// driver's own time limit is reported first.
const QUERY_GRACE: Duration = Duration::from_millis(1_000);

/// Handler group a tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolGroup {
    /// configure / test / status / disconnect
    Connection,
    /// Database-level tools
    Databases,
    /// Collection-level tools
    Collections,
    /// Document CRUD
    Documents,
    /// Index management
    Indexes,
    /// Server statistics
    Stats,
}

impl ToolGroup {
    /// Whether the group needs a live connection before it runs.
    pub fn requires_connection(self) -> bool {
        self != ToolGroup::Connection
    }
}

/// A tool definition for the MCP tools/list response.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    /// Tool name (e.g., "mongodb_list_databases")
    pub name: String,
    /// Tool description
    pub description: String,
    /// JSON Schema for the input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: JsonValue,
    /// Handler group
    #[serde(skip)]
    pub group: ToolGroup,
}

impl ToolDef {
    /// Create a new tool definition. The group is assigned at registration.
    pub fn new(name: &str, description: &str, input_schema: JsonValue) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            group: ToolGroup::Connection,
        }
    }

    /// Whether the connection guard applies.
    pub fn requires_connection(&self) -> bool {
        self.group.requires_connection()
    }
}

/// Registry of all available tools.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create a new registry with all tools registered.
    pub fn new() -> Self {
        let mut registry = Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
        };

        registry.register(ToolGroup::Connection, connection::tools());
        registry.register(ToolGroup::Databases, databases::tools());
        registry.register(ToolGroup::Collections, collections::tools());
        registry.register(ToolGroup::Documents, documents::tools());
        registry.register(ToolGroup::Indexes, indexes::tools());
        registry.register(ToolGroup::Stats, stats::tools());

        registry
    }

    fn register(&mut self, group: ToolGroup, tools: Vec<ToolDef>) {
        for mut tool in tools {
            tool.group = group;
            self.by_name.insert(tool.name.clone(), self.tools.len());
            self.tools.push(tool);
        }
    }

    /// Get all tool definitions.
    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// Run a tool call and shape the outcome into a response envelope.
    pub async fn dispatch(
        &self,
        manager: &ConnectionManager,
        name: &str,
        args: Map<String, JsonValue>,
    ) -> JsonValue {
        envelope::shape(self.call(manager, name, args).await)
    }

    /// Run a tool call, returning the raw handler payload or fault.
    pub async fn call(
        &self,
        manager: &ConnectionManager,
        name: &str,
        args: Map<String, JsonValue>,
    ) -> Result<JsonValue> {
        let outcome = self.run(manager, name, args).await;
        if let Err(err) = &outcome {
            tracing::warn!(tool = name, error_type = err.kind(), error = %err, "Tool call failed");
        }
        outcome
    }

    async fn run(
        &self,
        manager: &ConnectionManager,
        name: &str,
        args: Map<String, JsonValue>,
    ) -> Result<JsonValue> {
        let tool = self
            .get(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;

        if tool.requires_connection() && !manager.is_connected() {
            return Err(McpError::NotConnected);
        }

        validate_args(&tool.input_schema, &args)?;

        tracing::debug!(tool = name, "Executing tool");

        if tool.group == ToolGroup::Connection {
            return connection::dispatch(manager, name, args).await;
        }

        let lease = match tokio::time::timeout(manager.query_timeout(), manager.acquire()).await {
            Ok(lease) => lease?,
            Err(_) => {
                return Err(McpError::Timeout(format!(
                    "{} waited more than {} ms for a pooled connection",
                    name,
                    manager.query_timeout().as_millis()
                )))
            }
        };

        // The driver enforces the query deadline itself. The handler runs on its
        // own task so a backstop expiry stops waiting without cancelling it.
        let backstop = lease.query_timeout() + QUERY_GRACE;
        let group = tool.group;
        let tool_name = name.to_string();
        let mut call = tokio::spawn(async move {
            let backend = lease.backend();
            let name = tool_name.as_str();
            match group {
                ToolGroup::Databases => databases::dispatch(backend, name, args).await,
                ToolGroup::Collections => collections::dispatch(backend, name, args).await,
                ToolGroup::Documents => documents::dispatch(backend, name, args).await,
                ToolGroup::Indexes => indexes::dispatch(backend, name, args).await,
                ToolGroup::Stats => stats::dispatch(backend, name, args).await,
                ToolGroup::Connection => Err(McpError::Internal(format!(
                    "tool {} routed to the wrong group",
                    name
                ))),
            }
        });

        match tokio::time::timeout(backstop, &mut call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join)) => Err(McpError::Internal(format!("{} handler failed: {}", name, join))),
            Err(_) => {
                tracing::warn!(tool = name, "Tool call still running past its deadline; detaching");
                Err(McpError::Timeout(format!(
                    "{} exceeded {} ms and is still running on the server",
                    name,
                    backstop.as_millis()
                )))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The `database_name` / `collection_name` pair shared by most handlers.
pub(crate) fn namespace_arg(args: &Map<String, JsonValue>) -> Result<Namespace> {
    Ok(Namespace::new(
        get_string_arg(args, "database_name")?,
        get_string_arg(args, "collection_name")?,
    ))
}

/// Helper macro for creating JSON Schema for tool input parameters.
///
/// Unknown parameters are rejected (`additionalProperties: false`).
#[macro_export]
macro_rules! schema {
    // Object with required and optional properties
    (object {
        required: { $($req_name:literal : $req_type:tt),* $(,)? },
        optional: { $($opt_name:literal : $opt_type:tt),* $(,)? }
    }) => {{
        let mut required: Vec<&str> = Vec::new();
        $(required.push($req_name);)*

        let mut props = serde_json::Map::new();
        $(props.insert($req_name.to_string(), $crate::schema!(@type $req_type));)*
        $(props.insert($opt_name.to_string(), $crate::schema!(@type $opt_type));)*

        serde_json::json!({
            "type": "object",
            "properties": props,
            "required": required,
            "additionalProperties": false
        })
    }};

    // Object with only required properties
    (object {
        required: { $($req_name:literal : $req_type:tt),* $(,)? }
    }) => {{
        let mut required: Vec<&str> = Vec::new();
        $(required.push($req_name);)*

        let mut props = serde_json::Map::new();
        $(props.insert($req_name.to_string(), $crate::schema!(@type $req_type));)*

        serde_json::json!({
            "type": "object",
            "properties": props,
            "required": required,
            "additionalProperties": false
        })
    }};

    // Object with only optional properties
    (object {
        optional: { $($opt_name:literal : $opt_type:tt),* $(,)? }
    }) => {{
        let mut props = serde_json::Map::new();
        $(props.insert($opt_name.to_string(), $crate::schema!(@type $opt_type));)*

        serde_json::json!({
            "type": "object",
            "properties": props,
            "required": [],
            "additionalProperties": false
        })
    }};

    // Empty object (no parameters)
    (object {}) => {{
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        })
    }};

    // Type mappings
    (@type string) => { serde_json::json!({"type": "string"}) };
    (@type non_empty_string) => { serde_json::json!({"type": "string", "minLength": 1}) };
    (@type integer) => { serde_json::json!({"type": "integer"}) };
    (@type boolean) => { serde_json::json!({"type": "boolean"}) };
    (@type any) => { serde_json::json!({}) };
    (@type object) => { serde_json::json!({"type": "object"}) };
    (@type document) => { serde_json::json!({"type": "object", "minProperties": 1}) };
    (@type database_name) => {
        serde_json::json!({"type": "string", "minLength": 1, "maxLength": 64, "format": "database-name"})
    };
    (@type collection_name) => {
        serde_json::json!({"type": "string", "minLength": 1, "maxLength": 120, "format": "collection-name"})
    };
    (@type port) => { serde_json::json!({"type": "integer", "minimum": 1, "maximum": 65535}) };
    (@type timeout_ms) => { serde_json::json!({"type": "integer", "minimum": 1, "maximum": 600000}) };
    (@type pool_size) => { serde_json::json!({"type": "integer", "minimum": 1, "maximum": 100}) };
    (@type limit) => { serde_json::json!({"type": "integer", "minimum": 1, "maximum": 1000}) };
    (@type skip) => { serde_json::json!({"type": "integer", "minimum": 0, "maximum": 100000}) };
    (@type pipeline) => {
        serde_json::json!({
            "type": "array",
            "items": {"type": "object"},
            "minItems": 1,
            "maxItems": 100,
            "format": "pipeline"
        })
    };
    (@type index_keys) => {
        serde_json::json!({"type": "array", "minItems": 1, "format": "index-keys"})
    };
}
