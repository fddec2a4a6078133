//! Server statistics tools.
//!
//! Tools: mongodb_get_server_status, mongodb_get_system_stats,
//!        mongodb_get_server_health, mongodb_get_performance_metrics
//!
//! All of these read `serverStatus` / `dbStats`; counters are point-in-time.

use mongodb::bson::{doc, Document};
use serde_json::{json, Map, Value as JsonValue};

use crate::convert::{count_at, number_at, section_json};
use crate::driver::MongoBackend;
use crate::error::{McpError, Result};
use crate::schema;
use crate::tools::databases::is_system_database;
use crate::tools::ToolDef;

const OPCOUNTERS: [&str; 6] = ["insert", "query", "update", "delete", "getmore", "command"];

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Get all stats tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "mongodb_get_server_status",
            "Get server version, uptime, connections, operation counters and memory usage.",
            schema!(object {}),
        ),
        ToolDef::new(
            "mongodb_get_system_stats",
            "Get totals across user databases: database count, collections, objects \
             and data size.",
            schema!(object {}),
        ),
        ToolDef::new(
            "mongodb_get_server_health",
            "Get a health summary: uptime, connection usage percentage, memory in MB \
             and total operations.",
            schema!(object {}),
        ),
        ToolDef::new(
            "mongodb_get_performance_metrics",
            "Get operation counters, network traffic and operation throughput.",
            schema!(object {}),
        ),
    ]
}

/// Dispatch a stats tool call.
pub async fn dispatch(
    backend: &dyn MongoBackend,
    name: &str,
    _args: Map<String, JsonValue>,
) -> Result<JsonValue> {
    match name {
        "mongodb_get_server_status" => {
            let status = server_status(backend).await?;
            Ok(json!({
                "version": status.get_str("version").unwrap_or("unknown"),
                "host": status.get_str("host").unwrap_or_default(),
                "uptime": number_at(&status, "uptime").unwrap_or(0.0),
                "connections": section_json(&status, "connections"),
                "opcounters": section_json(&status, "opcounters"),
                "mem": section_json(&status, "mem"),
                "ok": number_at(&status, "ok").unwrap_or(0.0) >= 1.0,
            }))
        }

        "mongodb_get_system_stats" => {
            let mut databases = Vec::new();
            let (mut collections, mut objects, mut size) = (0_i64, 0_i64, 0_i64);

            for database in backend.list_database_names().await? {
                if is_system_database(&database) {
                    continue;
                }
                let stats = backend.run_command(&database, doc! { "dbStats": 1 }).await?;
                collections += count_at(&stats, "collections");
                objects += count_at(&stats, "objects");
                size += count_at(&stats, "dataSize");
                databases.push(json!({
                    "name": database,
                    "collections": count_at(&stats, "collections"),
                    "objects": count_at(&stats, "objects"),
                    "data_size": count_at(&stats, "dataSize"),
                }));
            }

            Ok(json!({
                "databases_count": databases.len(),
                "total_collections": collections,
                "total_objects": objects,
                "total_size": size,
                "databases": databases,
            }))
        }

        "mongodb_get_server_health" => {
            let status = server_status(backend).await?;
            let uptime = number_at(&status, "uptime").unwrap_or(0.0);
            let current = number_at(&status, "connections.current").unwrap_or(0.0);
            let available = number_at(&status, "connections.available").unwrap_or(0.0);

            Ok(json!({
                "healthy": number_at(&status, "ok").unwrap_or(0.0) >= 1.0,
                "version": status.get_str("version").unwrap_or("unknown"),
                "uptime_seconds": uptime,
                "uptime_hours": round2(uptime / 3600.0),
                "uptime_days": round2(uptime / 86_400.0),
                "connections": {
                    "current": current as i64,
                    "available": available as i64,
                    "usage_percent": percent(current, current + available),
                },
                "memory": {
                    "resident_mb": count_at(&status, "mem.resident"),
                    "virtual_mb": count_at(&status, "mem.virtual"),
                },
                "total_operations": total_operations(&status),
            }))
        }

        "mongodb_get_performance_metrics" => {
            let status = server_status(backend).await?;
            let uptime = number_at(&status, "uptime").unwrap_or(0.0);
            let total = total_operations(&status);

            let mut opcounters = Map::new();
            for op in OPCOUNTERS {
                opcounters.insert(op.to_string(), json!(count_at(&status, &format!("opcounters.{}", op))));
            }
            let ops_per_hour = if uptime > 0.0 {
                round2(total as f64 / (uptime / 3600.0))
            } else {
                0.0
            };

            Ok(json!({
                "opcounters": opcounters,
                "total_operations": total,
                "operations_per_hour": ops_per_hour,
                "network": {
                    "bytes_in_mb": round2(number_at(&status, "network.bytesIn").unwrap_or(0.0) / BYTES_PER_MB),
                    "bytes_out_mb": round2(number_at(&status, "network.bytesOut").unwrap_or(0.0) / BYTES_PER_MB),
                    "requests": count_at(&status, "network.numRequests"),
                },
                "uptime_seconds": uptime,
            }))
        }

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}

/// Summary reported by configure and test: server status plus database totals.
pub(crate) async fn server_info(backend: &dyn MongoBackend) -> Result<JsonValue> {
    let status = server_status(backend).await?;
    let (system, user): (Vec<String>, Vec<String>) = backend
        .list_database_names()
        .await?
        .into_iter()
        .partition(|db| is_system_database(db));

    Ok(json!({
        "version": status.get_str("version").unwrap_or("unknown"),
        "uptime_seconds": number_at(&status, "uptime").unwrap_or(0.0),
        "connections": section_json(&status, "connections"),
        "memory": section_json(&status, "mem"),
        "opcounters": section_json(&status, "opcounters"),
        "databases": {
            "total": user.len() + system.len(),
            "user": user.len(),
            "system": system.len(),
            "user_databases": user,
        },
    }))
}

async fn server_status(backend: &dyn MongoBackend) -> Result<Document> {
    backend.run_command("admin", doc! { "serverStatus": 1 }).await
}

fn total_operations(status: &Document) -> i64 {
    OPCOUNTERS
        .iter()
        .map(|op| count_at(status, &format!("opcounters.{}", op)))
        .sum()
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        round2(part / whole * 100.0)
    } else {
        0.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
