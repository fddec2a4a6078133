//! MCP server for MongoDB.
//!
//! Run with `mongodb-mcp`; the agent supplies connection details at runtime
//! through `mongodb_configure_connection`.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use mongodb_mcp::{ConnectionManager, DriverConnector, McpServer, Settings, ToolRegistry};

/// MCP server for MongoDB.
///
/// Exposes MongoDB database operations as MCP tools for AI agents.
/// Communicates via JSON-RPC 2.0 over stdin/stdout; logs go to stderr.
#[derive(Parser)]
#[command(name = "mongodb-mcp")]
#[command(version, about, long_about = None)]
struct Args {
    /// Default connection timeout in milliseconds.
    #[arg(long, env = "MONGODB_CONNECTION_TIMEOUT_MS", default_value_t = 5_000)]
    connection_timeout: u64,

    /// Default per-tool query timeout in milliseconds.
    #[arg(long, env = "MONGODB_QUERY_TIMEOUT_MS", default_value_t = 30_000)]
    query_timeout: u64,

    /// Default connection pool size (1-100).
    #[arg(long, env = "MONGODB_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,

    /// Log level: trace, debug, info, warn or error.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable debug logging to stderr.
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let settings = match (Settings {
        connection_timeout_ms: args.connection_timeout,
        query_timeout_ms: args.query_timeout,
        max_connections: args.max_connections,
        log_level: args.log_level,
    })
    .validated()
    {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Set up logging; stdout belongs to the protocol
    let level = if args.verbose { "debug" } else { settings.log_level.as_str() };
    let filter = match format!("mongodb_mcp={}", level).parse::<Directive>() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        connection_timeout_ms = settings.connection_timeout_ms,
        query_timeout_ms = settings.query_timeout_ms,
        max_connections = settings.max_connections,
        "Starting MongoDB MCP server"
    );

    // Create connection manager and server
    let manager = ConnectionManager::new(Arc::new(DriverConnector), settings);
    let server = McpServer::new(ToolRegistry::new(), Arc::new(manager));

    // Run the server
    if let Err(e) = server.run().await {
        eprintln!("Error: Server error: {}", e);
        std::process::exit(1);
    }

    server.manager().disconnect();
    tracing::info!("MongoDB MCP server stopped");
}
