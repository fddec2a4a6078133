//! Collection tools.
//!
//! Tools: mongodb_list_collections, mongodb_create_collection, mongodb_drop_collection,
//!        mongodb_rename_collection, mongodb_get_collection_info,
//!        mongodb_validate_collection, mongodb_count_documents, mongodb_aggregate

use mongodb::bson::{doc, Bson, Document};
use serde_json::{json, Map, Value as JsonValue};

use crate::convert::{
    bson_to_json, count_at, document_to_json, get_optional_bool, get_optional_document,
    get_optional_u64, get_pipeline_arg, get_string_arg, number_at, section_json,
};
use crate::driver::{MongoBackend, Namespace};
use crate::error::{McpError, Result};
use crate::schema;
use crate::tools::{namespace_arg, ToolDef};

/// Results returned by `mongodb_aggregate` when no limit is given.
const DEFAULT_AGGREGATE_LIMIT: u64 = 100;

/// Get all collection tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "mongodb_list_collections",
            "List collections in a database.",
            schema!(object {
                required: { "database_name": database_name }
            }),
        ),
        ToolDef::new(
            "mongodb_create_collection",
            "Create a collection. Fails if it already exists.",
            schema!(object {
                required: { "database_name": database_name, "collection_name": collection_name }
            }),
        ),
        ToolDef::new(
            "mongodb_drop_collection",
            "Drop a collection and its indexes. Irreversible, no confirmation. \
             Dropping a missing collection succeeds with dropped=false.",
            schema!(object {
                required: { "database_name": database_name, "collection_name": collection_name }
            }),
        ),
        ToolDef::new(
            "mongodb_rename_collection",
            "Rename a collection within its database. Set drop_target to replace an \
             existing collection named new_name.",
            schema!(object {
                required: {
                    "database_name": database_name,
                    "old_name": collection_name,
                    "new_name": collection_name
                },
                optional: { "drop_target": boolean }
            }),
        ),
        ToolDef::new(
            "mongodb_get_collection_info",
            "Get document count, data and storage sizes, and the index list of a collection.",
            schema!(object {
                required: { "database_name": database_name, "collection_name": collection_name }
            }),
        ),
        ToolDef::new(
            "mongodb_validate_collection",
            "Run the server's validate command on a collection. full=true performs a \
             thorough (slower) check.",
            schema!(object {
                required: { "database_name": database_name, "collection_name": collection_name },
                optional: { "full": boolean }
            }),
        ),
        ToolDef::new(
            "mongodb_count_documents",
            "Count documents matching an optional filter (MongoDB query syntax, Extended JSON).",
            schema!(object {
                required: { "database_name": database_name, "collection_name": collection_name },
                optional: { "filter": object }
            }),
        ),
        ToolDef::new(
            "mongodb_aggregate",
            "Run an aggregation pipeline. Returns at most limit results (default 100, max 1000); \
             truncated=true when more were available.",
            schema!(object {
                required: {
                    "database_name": database_name,
                    "collection_name": collection_name,
                    "pipeline": pipeline
                },
                optional: { "limit": limit }
            }),
        ),
    ]
}

/// Dispatch a collection tool call.
pub async fn dispatch(
    backend: &dyn MongoBackend,
    name: &str,
    args: Map<String, JsonValue>,
) -> Result<JsonValue> {
    match name {
        "mongodb_list_collections" => {
            let database = get_string_arg(&args, "database_name")?;
            let collections: Vec<JsonValue> = backend
                .list_collection_names(&database)
                .await?
                .into_iter()
                .map(|c| json!({ "name": c }))
                .collect();

            Ok(json!({
                "database": database,
                "total_count": collections.len(),
                "collections": collections,
            }))
        }

        "mongodb_create_collection" => {
            let ns = namespace_arg(&args)?;
            backend.create_collection(&ns).await?;
            tracing::info!(namespace = %ns, "Created collection");

            Ok(json!({
                "message": format!("Collection '{}' created", ns),
                "database": ns.database,
                "collection": ns.collection,
            }))
        }

        "mongodb_drop_collection" => {
            let ns = namespace_arg(&args)?;
            let exists = collection_exists(backend, &ns).await?;
            if exists {
                backend.drop_collection(&ns).await?;
                tracing::info!(namespace = %ns, "Dropped collection");
            }

            let message = if exists {
                format!("Collection '{}' dropped", ns)
            } else {
                format!("Collection '{}' does not exist", ns)
            };
            Ok(json!({
                "message": message,
                "database": ns.database,
                "collection": ns.collection,
                "dropped": exists,
            }))
        }

        "mongodb_rename_collection" => {
            let database = get_string_arg(&args, "database_name")?;
            let old_name = get_string_arg(&args, "old_name")?;
            let new_name = get_string_arg(&args, "new_name")?;
            let drop_target = get_optional_bool(&args, "drop_target").unwrap_or(false);
            if old_name == new_name {
                return Err(McpError::invalid("new_name", "must differ from old_name"));
            }

            let ns = Namespace::new(database, old_name);
            if !collection_exists(backend, &ns).await? {
                return Err(McpError::NotFound(format!("collection '{}'", ns)));
            }
            backend.rename_collection(&ns, &new_name, drop_target).await?;
            tracing::info!(namespace = %ns, new_name = %new_name, "Renamed collection");

            Ok(json!({
                "message": format!("Collection '{}' renamed to '{}'", ns, new_name),
                "database": ns.database,
                "old_name": ns.collection,
                "new_name": new_name,
            }))
        }

        "mongodb_get_collection_info" => {
            let ns = namespace_arg(&args)?;
            if !collection_exists(backend, &ns).await? {
                return Err(McpError::NotFound(format!("collection '{}'", ns)));
            }

            let pipeline = vec![doc! { "$collStats": { "storageStats": {} } }];
            let stats = backend
                .aggregate(&ns, pipeline, 1)
                .await?
                .into_iter()
                .next()
                .and_then(|d| d.get_document("storageStats").ok().cloned())
                .unwrap_or_default();

            let index_sizes = match section_json(&stats, "indexSizes") {
                JsonValue::Null => json!({}),
                sizes => sizes,
            };
            let indexes: Vec<JsonValue> = backend
                .list_indexes(&ns)
                .await?
                .into_iter()
                .map(|i| json!({ "name": i.name, "key": document_to_json(i.keys), "unique": i.unique }))
                .collect();

            Ok(json!({
                "database": ns.database,
                "collection": ns.collection,
                "count": count_at(&stats, "count"),
                "size": count_at(&stats, "size"),
                "avg_obj_size": number_at(&stats, "avgObjSize").unwrap_or(0.0),
                "storage_size": count_at(&stats, "storageSize"),
                "total_index_size": count_at(&stats, "totalIndexSize"),
                "index_sizes": index_sizes,
                "indexes": indexes,
            }))
        }

        "mongodb_validate_collection" => {
            let ns = namespace_arg(&args)?;
            let full = get_optional_bool(&args, "full").unwrap_or(false);
            let report = backend
                .run_command(&ns.database, doc! { "validate": ns.collection.as_str(), "full": full })
                .await?;

            Ok(json!({
                "ok": number_at(&report, "ok").unwrap_or(0.0) >= 1.0,
                "ns": report.get_str("ns").unwrap_or_default(),
                "valid": report.get_bool("valid").unwrap_or(false),
                "full": full,
                "records": count_at(&report, "nrecords"),
                "indexes": count_at(&report, "nIndexes"),
                "warnings": string_list(&report, "warnings"),
                "errors": string_list(&report, "errors"),
            }))
        }

        "mongodb_count_documents" => {
            let ns = namespace_arg(&args)?;
            let filter = get_optional_document(&args, "filter")?.unwrap_or_default();
            let count = backend.count_documents(&ns, filter).await?;

            Ok(json!({
                "database": ns.database,
                "collection": ns.collection,
                "count": count,
            }))
        }

        "mongodb_aggregate" => {
            let ns = namespace_arg(&args)?;
            let pipeline = get_pipeline_arg(&args, "pipeline")?;
            let limit = get_optional_u64(&args, "limit").unwrap_or(DEFAULT_AGGREGATE_LIMIT) as usize;

            // One extra result tells us whether the cap cut anything off.
            let mut results = backend.aggregate(&ns, pipeline, limit + 1).await?;
            let truncated = results.len() > limit;
            results.truncate(limit);
            tracing::debug!(namespace = %ns, count = results.len(), truncated, "Aggregation complete");

            let result: Vec<JsonValue> = results.into_iter().map(document_to_json).collect();
            Ok(json!({
                "count": result.len(),
                "truncated": truncated,
                "limit": limit,
                "result": result,
            }))
        }

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}

async fn collection_exists(backend: &dyn MongoBackend, ns: &Namespace) -> Result<bool> {
    Ok(backend
        .list_collection_names(&ns.database)
        .await?
        .iter()
        .any(|c| *c == ns.collection))
}

fn string_list(doc: &Document, key: &str) -> Vec<JsonValue> {
    match doc.get_array(key) {
        Ok(items) => items
            .iter()
            .map(|item| match item {
                Bson::String(s) => JsonValue::String(s.clone()),
                other => bson_to_json(other.clone()),
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}
