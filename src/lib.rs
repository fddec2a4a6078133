//! # mongodb-mcp
//!
//! MCP (Model Context Protocol) server for MongoDB.
//!
//! This crate exposes MongoDB administrative and CRUD operations as tools for AI
//! agents. It implements the MCP protocol over stdin/stdout using JSON-RPC 2.0.
//!
//! ## Features
//!
//! - **Runtime connection management**: configure, test, inspect and drop the
//!   MongoDB connection from the agent side; one live connection per process
//! - **Databases, collections, documents, indexes**: listing, CRUD, aggregation
//!   and index management with Extended JSON filters
//! - **Server statistics**: status, health and performance counters
//! - **Uniform envelopes**: every tool answers `{..., "status": "success"}` or
//!   `{"status": "error", "error", "error_type", "suggestion"}`
//!
//! ## Usage
//!
//! The server is typically run as an executable and configured in AI tools like Claude Desktop:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "mongodb": {
//!       "command": "/path/to/mongodb-mcp",
//!       "env": { "MONGODB_QUERY_TIMEOUT_MS": "30000" }
//!     }
//!   }
//! }
//! ```
//!
//! The agent then calls `mongodb_configure_connection` before any other tool.
//!
//! ## Library Usage
//!
//! For testing or embedding, you can use the library API:
//!
//! ```no_run
//! use std::sync::Arc;
//! use mongodb_mcp::{ConnectionManager, DriverConnector, McpServer, Settings, ToolRegistry};
//!
//! # async fn run() -> mongodb_mcp::Result<()> {
//! let manager = ConnectionManager::new(Arc::new(DriverConnector), Settings::default());
//! let server = McpServer::new(ToolRegistry::new(), Arc::new(manager));
//!
//! // Reads from stdin, writes to stdout
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod convert;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod server;
pub mod tools;
pub mod validate;

pub use config::Settings;
pub use connection::{
    ConnectionDescriptor, ConnectionLease, ConnectionManager, ConnectionState, ConnectionStatus,
};
pub use driver::{
    Connector, DriverConnector, FindQuery, IndexInfo, IndexSpec, MongoBackend, Namespace,
    UpdateOutcome,
};
pub use error::{McpError, Result};
pub use server::{JsonRpcRequest, JsonRpcResponse, McpServer};
pub use tools::{ToolDef, ToolGroup, ToolRegistry};
