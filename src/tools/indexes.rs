//! Index tools.
//!
//! Tools: mongodb_list_indexes, mongodb_create_index, mongodb_drop_index

use mongodb::bson::Document;
use serde_json::{json, Map, Value as JsonValue};

use crate::convert::{document_to_json, get_optional_bool, get_optional_string, get_string_arg};
use crate::driver::{IndexSpec, MongoBackend};
use crate::error::{McpError, Result};
use crate::schema;
use crate::tools::{namespace_arg, ToolDef};
use crate::validate::index_key_pairs;

/// Name of the index every collection keeps on `_id`.
const ID_INDEX: &str = "_id_";

/// Get all index tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "mongodb_list_indexes",
            "List indexes on a collection with their key specification and uniqueness.",
            schema!(object {
                required: { "database_name": database_name, "collection_name": collection_name }
            }),
        ),
        ToolDef::new(
            "mongodb_create_index",
            "Create an index. keys is an ordered list of [field, direction] pairs or \
             {field, direction} objects; direction is 1, -1, \"text\", \"hashed\", \"2d\" \
             or \"2dsphere\". Returns the index name.",
            schema!(object {
                required: {
                    "database_name": database_name,
                    "collection_name": collection_name,
                    "keys": index_keys
                },
                optional: { "name": non_empty_string, "unique": boolean }
            }),
        ),
        ToolDef::new(
            "mongodb_drop_index",
            "Drop an index by its exact name. The _id_ index cannot be dropped.",
            schema!(object {
                required: {
                    "database_name": database_name,
                    "collection_name": collection_name,
                    "index_name": non_empty_string
                }
            }),
        ),
    ]
}

/// Dispatch an index tool call.
pub async fn dispatch(
    backend: &dyn MongoBackend,
    name: &str,
    args: Map<String, JsonValue>,
) -> Result<JsonValue> {
    match name {
        "mongodb_list_indexes" => {
            let ns = namespace_arg(&args)?;
            let indexes: Vec<JsonValue> = backend
                .list_indexes(&ns)
                .await?
                .into_iter()
                .map(|i| json!({ "name": i.name, "key": document_to_json(i.keys), "unique": i.unique }))
                .collect();

            Ok(json!({
                "database": ns.database,
                "collection": ns.collection,
                "count": indexes.len(),
                "indexes": indexes,
            }))
        }

        "mongodb_create_index" => {
            let ns = namespace_arg(&args)?;
            let pairs = index_key_pairs("keys", args.get("keys").unwrap_or(&JsonValue::Null))?;
            let mut keys = Document::new();
            for (field, direction) in pairs {
                keys.insert(field, direction);
            }
            let spec = IndexSpec {
                keys,
                name: get_optional_string(&args, "name"),
                unique: get_optional_bool(&args, "unique").unwrap_or(false),
            };

            let index_name = backend.create_index(&ns, spec).await?;
            tracing::info!(namespace = %ns, index = %index_name, "Created index");

            Ok(json!({
                "message": format!("Index '{}' created on '{}'", index_name, ns),
                "database": ns.database,
                "collection": ns.collection,
                "index_name": index_name,
            }))
        }

        "mongodb_drop_index" => {
            let ns = namespace_arg(&args)?;
            let index_name = get_string_arg(&args, "index_name")?;
            if index_name == ID_INDEX {
                return Err(McpError::invalid("index_name", "the _id_ index cannot be dropped"));
            }

            backend.drop_index(&ns, &index_name).await?;
            tracing::info!(namespace = %ns, index = %index_name, "Dropped index");

            Ok(json!({
                "message": format!("Index '{}' dropped from '{}'", index_name, ns),
                "database": ns.database,
                "collection": ns.collection,
                "index_name": index_name,
            }))
        }

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}
