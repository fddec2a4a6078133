//! Startup settings.
//!
//! Read once by the binary and handed to the connection manager as the
//! defaults for every connection descriptor field a caller leaves out.

use std::time::Duration;

use crate::error::{McpError, Result};

/// Upper bound accepted for the driver connection pool.
pub const MAX_POOL_SIZE_LIMIT: u32 = 100;

/// Log levels accepted by `--log-level`.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Process-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Connection establishment timeout in milliseconds.
    pub connection_timeout_ms: u64,
    /// Per-tool query timeout in milliseconds.
    pub query_timeout_ms: u64,
    /// Maximum driver pool size, and the number of concurrent tool calls
    /// allowed against one connection.
    pub max_connections: u32,
    /// Default `tracing` level.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 5_000,
            query_timeout_ms: 30_000,
            max_connections: 10,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Check ranges and normalise the log level.
    pub fn validated(mut self) -> Result<Self> {
        if self.connection_timeout_ms == 0 {
            return Err(McpError::invalid("connection_timeout", "must be greater than zero"));
        }
        if self.query_timeout_ms == 0 {
            return Err(McpError::invalid("query_timeout", "must be greater than zero"));
        }
        if self.max_connections == 0 || self.max_connections > MAX_POOL_SIZE_LIMIT {
            return Err(McpError::invalid(
                "max_connections",
                format!("must be between 1 and {}", MAX_POOL_SIZE_LIMIT),
            ));
        }

        let level = self.log_level.to_ascii_lowercase();
        let level = if level == "warning" { "warn".to_string() } else { level };
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(McpError::invalid(
                "log_level",
                format!("must be one of {}", LOG_LEVELS.join(", ")),
            ));
        }
        self.log_level = level;
        Ok(self)
    }

    /// Query timeout as a `Duration`.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}
