//! Connection management tools.
//!
//! Tools: mongodb_configure_connection, mongodb_test_connection,
//!        mongodb_get_connection_status, mongodb_disconnect
//!
//! These are the only tools that run without a live connection and the only
//! ones allowed to change connection state.

use serde_json::{json, Map, Value as JsonValue};

use crate::connection::{ConnectionDescriptor, ConnectionLease, ConnectionManager, ConnectionState};
use crate::error::{McpError, Result};
use crate::schema;
use crate::tools::stats::server_info;
use crate::tools::ToolDef;

/// Get all connection tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "mongodb_configure_connection",
            "Configure the MongoDB connection used by every other tool. Any previous \
             connection is released. Defaults: localhost:27017, auth_source 'admin'. \
             username and password must be given together.",
            schema!(object {
                optional: {
                    "host": non_empty_string,
                    "port": port,
                    "username": non_empty_string,
                    "password": string,
                    "auth_source": non_empty_string,
                    "database": database_name,
                    "tls": boolean,
                    "tls_allow_invalid_certificates": boolean,
                    "connect_timeout_ms": timeout_ms,
                    "query_timeout_ms": timeout_ms,
                    "max_pool_size": pool_size,
                    "max_connections": pool_size
                }
            }),
        ),
        ToolDef::new(
            "mongodb_test_connection",
            "Ping the configured MongoDB server and report server information. \
             Does not change the connection state.",
            schema!(object {}),
        ),
        ToolDef::new(
            "mongodb_get_connection_status",
            "Report the connection state (disconnected, connecting, connected, failed) \
             and the active connection parameters with credentials redacted.",
            schema!(object {}),
        ),
        ToolDef::new(
            "mongodb_disconnect",
            "Close the MongoDB connection. Other tools will require \
             mongodb_configure_connection again.",
            schema!(object {}),
        ),
    ]
}

/// Dispatch a connection tool call.
pub async fn dispatch(
    manager: &ConnectionManager,
    name: &str,
    args: Map<String, JsonValue>,
) -> Result<JsonValue> {
    match name {
        "mongodb_configure_connection" => {
            let descriptor = ConnectionDescriptor::from_args(&args, manager.settings())?;
            let connection = descriptor.redacted();
            let lease = manager.configure(descriptor).await?;

            Ok(json!({
                "message": "MongoDB connection configured successfully",
                "connection": connection,
                "server_info": best_effort_server_info(&lease).await,
            }))
        }

        "mongodb_test_connection" => {
            let lease = manager.test().await?;
            Ok(json!({
                "message": "MongoDB connection is active",
                "server_info": best_effort_server_info(&lease).await,
            }))
        }

        "mongodb_get_connection_status" => {
            let status = manager.status();
            let mut payload = Map::new();
            payload.insert("state".to_string(), json!(status.state.as_str()));
            payload.insert(
                "connected".to_string(),
                json!(status.state == ConnectionState::Connected),
            );
            if let Some(descriptor) = &status.descriptor {
                payload.insert("connection".to_string(), descriptor.redacted());
            }
            if let ConnectionState::Failed(reason) = &status.state {
                payload.insert("error".to_string(), json!(reason));
            }
            Ok(JsonValue::Object(payload))
        }

        "mongodb_disconnect" => {
            let was_connected = manager.disconnect();
            let message = if was_connected {
                "Successfully disconnected from MongoDB"
            } else {
                "No active MongoDB connection"
            };
            Ok(json!({
                "message": message,
                "was_connected": was_connected,
            }))
        }

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}

/// Server information for a fresh or probed connection.
///
/// Failure here does not fail the call; the connection itself is fine.
async fn best_effort_server_info(lease: &ConnectionLease) -> JsonValue {
    match tokio::time::timeout(lease.query_timeout(), server_info(lease.backend())).await {
        Ok(Ok(info)) => info,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "Failed to collect server information");
            JsonValue::Null
        }
        Err(_) => {
            tracing::warn!("Timed out collecting server information");
            JsonValue::Null
        }
    }
}
