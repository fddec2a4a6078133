//! Document tools.
//!
//! Tools: mongodb_list_documents, mongodb_get_document, mongodb_insert_document,
//!        mongodb_update_document, mongodb_delete_document
//!
//! Filters, documents, projections and sorts accept MongoDB Extended JSON.
//! A document can be selected by `filter` or by a `field` + `value` pair.

use mongodb::bson::{doc, Document};
use serde_json::{json, Map, Value as JsonValue};

use crate::convert::{
    document_to_json, get_document_arg, get_optional_bool, get_optional_document,
    get_optional_u64, get_selector, id_to_json, parse_document_id,
};
use crate::driver::{FindQuery, MongoBackend};
use crate::error::{McpError, Result};
use crate::schema;
use crate::tools::{namespace_arg, ToolDef};

/// Documents returned by `mongodb_list_documents` when no limit is given.
const DEFAULT_LIST_LIMIT: u64 = 20;

/// Get all document tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "mongodb_list_documents",
            "List documents with optional filter, projection and sort. \
             limit defaults to 20 (max 1000); use skip to page.",
            schema!(object {
                required: { "database_name": database_name, "collection_name": collection_name },
                optional: {
                    "filter": object,
                    "projection": object,
                    "sort": object,
                    "limit": limit,
                    "skip": skip
                }
            }),
        ),
        ToolDef::new(
            "mongodb_get_document",
            "Get one document by document_id (ObjectId hex or raw _id value), by a \
             field/value pair, or by filter. Fails with NotFoundError when nothing matches.",
            schema!(object {
                required: { "database_name": database_name, "collection_name": collection_name },
                optional: {
                    "document_id": any,
                    "field": non_empty_string,
                    "value": any,
                    "filter": object,
                    "projection": object
                }
            }),
        ),
        ToolDef::new(
            "mongodb_insert_document",
            "Insert a document. Returns the generated _id as inserted_id.",
            schema!(object {
                required: {
                    "database_name": database_name,
                    "collection_name": collection_name,
                    "document": document
                }
            }),
        ),
        ToolDef::new(
            "mongodb_update_document",
            "Update documents selected by filter or field/value. An update without \
             $-operators is applied as $set. many=true updates every match; \
             upsert=true inserts when nothing matches. Zero matches is not an error.",
            schema!(object {
                required: {
                    "database_name": database_name,
                    "collection_name": collection_name,
                    "update": document
                },
                optional: {
                    "filter": object,
                    "field": non_empty_string,
                    "value": any,
                    "many": boolean,
                    "upsert": boolean
                }
            }),
        ),
        ToolDef::new(
            "mongodb_delete_document",
            "Delete documents selected by filter or field/value. many=true deletes every \
             match. Irreversible. Zero deletions is not an error.",
            schema!(object {
                required: { "database_name": database_name, "collection_name": collection_name },
                optional: {
                    "filter": object,
                    "field": non_empty_string,
                    "value": any,
                    "many": boolean
                }
            }),
        ),
    ]
}

/// Dispatch a document tool call.
pub async fn dispatch(
    backend: &dyn MongoBackend,
    name: &str,
    args: Map<String, JsonValue>,
) -> Result<JsonValue> {
    match name {
        "mongodb_list_documents" => {
            let ns = namespace_arg(&args)?;
            let limit = get_optional_u64(&args, "limit").unwrap_or(DEFAULT_LIST_LIMIT);
            let skip = get_optional_u64(&args, "skip").unwrap_or(0);
            let query = FindQuery {
                filter: get_optional_document(&args, "filter")?.unwrap_or_default(),
                projection: get_optional_document(&args, "projection")?,
                sort: get_optional_document(&args, "sort")?,
                limit: i64::try_from(limit).map_err(|_| McpError::invalid("limit", "is out of range"))?,
                skip,
            };

            let documents: Vec<JsonValue> = backend
                .find(&ns, query)
                .await?
                .into_iter()
                .map(document_to_json)
                .collect();

            Ok(json!({
                "database": ns.database,
                "collection": ns.collection,
                "count": documents.len(),
                "limit": limit,
                "skip": skip,
                "documents": documents,
            }))
        }

        "mongodb_get_document" => {
            let ns = namespace_arg(&args)?;
            let filter = match args.get("document_id") {
                Some(id) if !id.is_null() => {
                    if args.contains_key("filter") || args.contains_key("field") {
                        return Err(McpError::invalid(
                            "document_id",
                            "cannot be combined with 'filter' or 'field'",
                        ));
                    }
                    doc! { "_id": parse_document_id(id.clone())? }
                }
                _ => get_selector(&args)?.ok_or_else(|| {
                    McpError::invalid(
                        "document_id",
                        "one of 'document_id', 'field'/'value' or 'filter' is required",
                    )
                })?,
            };
            let projection = get_optional_document(&args, "projection")?;

            let document = backend
                .find_one(&ns, filter, projection)
                .await?
                .ok_or_else(|| McpError::NotFound(format!("no matching document in '{}'", ns)))?;

            Ok(json!({
                "database": ns.database,
                "collection": ns.collection,
                "document": document_to_json(document),
            }))
        }

        "mongodb_insert_document" => {
            let ns = namespace_arg(&args)?;
            let document = get_document_arg(&args, "document")?;
            let inserted_id = backend.insert_one(&ns, document).await?;
            tracing::info!(namespace = %ns, "Inserted document");

            Ok(json!({
                "message": format!("Document inserted into '{}'", ns),
                "database": ns.database,
                "collection": ns.collection,
                "inserted_id": id_to_json(inserted_id),
            }))
        }

        "mongodb_update_document" => {
            let ns = namespace_arg(&args)?;
            let filter = required_selector(&args)?;
            let update = update_spec(get_document_arg(&args, "update")?)?;
            let many = get_optional_bool(&args, "many").unwrap_or(false);
            let upsert = get_optional_bool(&args, "upsert").unwrap_or(false);

            let outcome = backend.update(&ns, filter, update, many, upsert).await?;
            tracing::info!(
                namespace = %ns,
                matched = outcome.matched_count,
                modified = outcome.modified_count,
                "Updated documents"
            );

            let mut payload = Map::new();
            payload.insert("database".to_string(), json!(ns.database));
            payload.insert("collection".to_string(), json!(ns.collection));
            payload.insert("matched_count".to_string(), json!(outcome.matched_count));
            payload.insert("modified_count".to_string(), json!(outcome.modified_count));
            if let Some(id) = outcome.upserted_id {
                payload.insert("upserted_id".to_string(), id_to_json(id));
            }
            Ok(JsonValue::Object(payload))
        }

        "mongodb_delete_document" => {
            let ns = namespace_arg(&args)?;
            let filter = required_selector(&args)?;
            let many = get_optional_bool(&args, "many").unwrap_or(false);

            let deleted_count = backend.delete(&ns, filter, many).await?;
            tracing::info!(namespace = %ns, deleted = deleted_count, "Deleted documents");

            Ok(json!({
                "database": ns.database,
                "collection": ns.collection,
                "deleted_count": deleted_count,
            }))
        }

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}

fn required_selector(args: &Map<String, JsonValue>) -> Result<Document> {
    get_selector(args)?
        .ok_or_else(|| McpError::invalid("filter", "either 'filter' or 'field'/'value' is required"))
}

/// Operator updates pass through; a plain replacement document becomes `$set`.
fn update_spec(update: Document) -> Result<Document> {
    let operators = update.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        Ok(doc! { "$set": update })
    } else if operators == update.len() {
        Ok(update)
    } else {
        Err(McpError::invalid(
            "update",
            "cannot mix update operators with plain fields",
        ))
    }
}
