//! Error types for the MCP server.
//!
//! Every fault a tool can raise is one of the variants below. Driver errors are
//! classified on conversion so that no raw `mongodb` error ever reaches a caller.

use mongodb::error::{Error as DriverError, ErrorKind};
use serde::{Deserialize, Serialize};

/// Server error code for `NamespaceNotFound`.
const NAMESPACE_NOT_FOUND: i32 = 26;
/// Server error code for `IndexNotFound`.
const INDEX_NOT_FOUND: i32 = 27;
/// Server error code for `MaxTimeMSExpired`.
const MAX_TIME_MS_EXPIRED: i32 = 50;

/// MCP server errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum McpError {
    /// A database tool was called without a live connection.
    #[error("MongoDB connection not configured")]
    NotConnected,

    /// Network or authentication failure, during configure or mid-operation.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed or missing tool parameter.
    #[error("invalid parameter '{field}': {constraint}")]
    Validation {
        /// Offending parameter name
        field: String,
        /// The constraint that was violated
        constraint: String,
    },

    /// Referenced database, collection, document or index does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation exceeded its configured deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Driver-reported failure not otherwise classified.
    #[error("operation failed: {0}")]
    Operation(String),

    /// Unknown tool requested.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// JSON-RPC protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// Shorthand for a validation failure.
    pub fn invalid(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        McpError::Validation {
            field: field.into(),
            constraint: constraint.into(),
        }
    }

    /// Taxonomy name reported in the `error_type` envelope field.
    pub fn kind(&self) -> &'static str {
        match self {
            McpError::NotConnected => "NotConnectedError",
            McpError::Connection(_) => "ConnectionError",
            McpError::Validation { .. } => "ValidationError",
            McpError::NotFound(_) => "NotFoundError",
            McpError::Timeout(_) => "TimeoutError",
            McpError::UnknownTool(_) => "UnknownToolError",
            McpError::Operation(_)
            | McpError::Protocol(_)
            | McpError::Io(_)
            | McpError::Internal(_) => "OperationError",
        }
    }

    /// Corrective action for the caller, where one is obvious.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            McpError::NotConnected => Some(
                "Call mongodb_configure_connection first to establish a MongoDB connection."
                    .to_string(),
            ),
            McpError::Connection(_) => Some(
                "Check host, port, credentials and network reachability, then call \
                 mongodb_configure_connection again."
                    .to_string(),
            ),
            McpError::Validation { field, .. } => {
                Some(format!("Fix the '{}' parameter and retry.", field))
            }
            McpError::Timeout(_) => Some(
                "Narrow the query (filter, limit) or raise the query timeout via \
                 mongodb_configure_connection."
                    .to_string(),
            ),
            McpError::UnknownTool(_) => {
                Some("Call tools/list to see the available tools.".to_string())
            }
            _ => None,
        }
    }
}

impl From<DriverError> for McpError {
    fn from(err: DriverError) -> Self {
        let message = err.to_string();
        match err.kind.as_ref() {
            ErrorKind::Authentication { .. }
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::Io(_) => McpError::Connection(message),
            ErrorKind::Command(cmd) => match cmd.code {
                NAMESPACE_NOT_FOUND | INDEX_NOT_FOUND => McpError::NotFound(cmd.message.clone()),
                MAX_TIME_MS_EXPIRED => McpError::Timeout(cmd.message.clone()),
                _ => McpError::Operation(message),
            },
            ErrorKind::InvalidArgument { message: reason, .. } => {
                McpError::invalid("arguments", reason.clone())
            }
            _ => McpError::Operation(message),
        }
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        McpError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Protocol(format!("JSON error: {}", err))
    }
}

/// JSON-RPC error codes.
pub mod rpc_codes {
    /// Parse error - Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found - The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params - Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error - Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

impl McpError {
    /// Convert to JSON-RPC error code.
    ///
    /// Only protocol-level failures travel as JSON-RPC errors; tool failures are
    /// delivered inside an error envelope.
    pub fn rpc_code(&self) -> i32 {
        match self {
            McpError::UnknownTool(_) => rpc_codes::METHOD_NOT_FOUND,
            McpError::Validation { .. } => rpc_codes::INVALID_PARAMS,
            McpError::Protocol(_) => rpc_codes::INVALID_REQUEST,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;
