//! Database tools.
//!
//! Tools: mongodb_list_databases, mongodb_create_database, mongodb_drop_database,
//!        mongodb_get_database_info

use mongodb::bson::doc;
use serde_json::{json, Map, Value as JsonValue};

use crate::convert::{count_at, get_optional_bool, get_string_arg, number_at};
use crate::driver::MongoBackend;
use crate::error::{McpError, Result};
use crate::schema;
use crate::tools::{namespace_arg, ToolDef};

/// Databases the server manages for itself.
pub const SYSTEM_DATABASES: [&str; 3] = ["admin", "local", "config"];

/// Whether `name` is one of [`SYSTEM_DATABASES`].
pub fn is_system_database(name: &str) -> bool {
    SYSTEM_DATABASES.contains(&name)
}

/// Get all database tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "mongodb_list_databases",
            "List databases on the server. System databases (admin, local, config) \
             are hidden unless include_system is true.",
            schema!(object {
                optional: { "include_system": boolean }
            }),
        ),
        ToolDef::new(
            "mongodb_create_database",
            "Create a database. MongoDB materialises a database with its first \
             collection, so a collection name is required.",
            schema!(object {
                required: { "database_name": database_name, "collection_name": collection_name }
            }),
        ),
        ToolDef::new(
            "mongodb_drop_database",
            "Drop a database and everything in it. Irreversible, no confirmation. \
             Returns dropped=false if the database did not exist.",
            schema!(object {
                required: { "database_name": database_name }
            }),
        ),
        ToolDef::new(
            "mongodb_get_database_info",
            "Get storage statistics for a database: collections, objects, data, \
             storage and index sizes.",
            schema!(object {
                required: { "database_name": database_name }
            }),
        ),
    ]
}

/// Dispatch a database tool call.
pub async fn dispatch(
    backend: &dyn MongoBackend,
    name: &str,
    args: Map<String, JsonValue>,
) -> Result<JsonValue> {
    match name {
        "mongodb_list_databases" => {
            let include_system = get_optional_bool(&args, "include_system").unwrap_or(false);
            let databases: Vec<JsonValue> = backend
                .list_database_names()
                .await?
                .into_iter()
                .filter(|db| include_system || !is_system_database(db))
                .map(|db| json!({ "name": db }))
                .collect();

            Ok(json!({
                "total_count": databases.len(),
                "databases": databases,
            }))
        }

        "mongodb_create_database" => {
            let ns = namespace_arg(&args)?;
            backend.create_collection(&ns).await?;
            tracing::info!(database = %ns.database, collection = %ns.collection, "Created database");

            Ok(json!({
                "message": format!("Database '{}' created with collection '{}'", ns.database, ns.collection),
                "database": ns.database,
                "collection": ns.collection,
            }))
        }

        "mongodb_drop_database" => {
            let database = get_string_arg(&args, "database_name")?;
            if is_system_database(&database) {
                return Err(McpError::invalid(
                    "database_name",
                    format!("system database '{}' cannot be dropped", database),
                ));
            }

            let exists = backend.list_database_names().await?.contains(&database);
            if exists {
                backend.drop_database(&database).await?;
                tracing::info!(database = %database, "Dropped database");
            }

            let message = if exists {
                format!("Database '{}' dropped", database)
            } else {
                format!("Database '{}' does not exist", database)
            };
            Ok(json!({
                "message": message,
                "database": database,
                "dropped": exists,
            }))
        }

        "mongodb_get_database_info" => {
            let database = get_string_arg(&args, "database_name")?;
            if !backend.list_database_names().await?.contains(&database) {
                return Err(McpError::NotFound(format!("database '{}'", database)));
            }

            let stats = backend.run_command(&database, doc! { "dbStats": 1 }).await?;
            let size_on_disk = number_at(&stats, "totalSize")
                .map(|v| v as i64)
                .unwrap_or_else(|| count_at(&stats, "storageSize") + count_at(&stats, "indexSize"));

            Ok(json!({
                "database": database,
                "size_on_disk": size_on_disk,
                "collections": count_at(&stats, "collections"),
                "objects": count_at(&stats, "objects"),
                "avg_obj_size": number_at(&stats, "avgObjSize").unwrap_or(0.0),
                "data_size": count_at(&stats, "dataSize"),
                "storage_size": count_at(&stats, "storageSize"),
                "indexes": count_at(&stats, "indexes"),
                "index_size": count_at(&stats, "indexSize"),
            }))
        }

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}
