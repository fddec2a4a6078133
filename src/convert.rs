//! Conversion utilities between JSON and BSON.
//!
//! Tool arguments arrive as `serde_json::Value` and may use MongoDB Extended JSON
//! (`{"$oid": ...}`, `{"$date": ...}`). Results leave as relaxed Extended JSON.

use mongodb::bson::{oid::ObjectId, Bson, Document};
use serde_json::{Map, Value as JsonValue};

use crate::error::{McpError, Result};

/// Convert a JSON value (Extended JSON allowed) to BSON.
pub fn json_to_bson(json: JsonValue, field: &str) -> Result<Bson> {
    Bson::try_from(json)
        .map_err(|e| McpError::invalid(field, format!("invalid extended JSON: {}", e)))
}

/// Convert a JSON object to a BSON document.
pub fn json_to_document(json: JsonValue, field: &str) -> Result<Document> {
    match json_to_bson(json, field)? {
        Bson::Document(doc) => Ok(doc),
        _ => Err(McpError::invalid(field, "must be an object")),
    }
}

/// Render a BSON value as relaxed Extended JSON.
pub fn bson_to_json(value: Bson) -> JsonValue {
    value.into_relaxed_extjson()
}

/// Render a BSON document as relaxed Extended JSON.
pub fn document_to_json(doc: Document) -> JsonValue {
    Bson::Document(doc).into_relaxed_extjson()
}

/// Render a document identifier. ObjectIds become their hex string.
pub fn id_to_json(id: Bson) -> JsonValue {
    match id {
        Bson::ObjectId(oid) => JsonValue::String(oid.to_hex()),
        other => bson_to_json(other),
    }
}

/// Interpret a caller-supplied document identifier.
///
/// A 24-character hex string is taken as an ObjectId; anything else is matched
/// as given.
pub fn parse_document_id(json: JsonValue) -> Result<Bson> {
    if let JsonValue::String(s) = &json {
        if s.len() == 24 {
            if let Ok(oid) = ObjectId::parse_str(s) {
                return Ok(Bson::ObjectId(oid));
            }
        }
    }
    json_to_bson(json, "document_id")
}

/// Helper to get a required string argument from JSON arguments.
pub fn get_string_arg(args: &Map<String, JsonValue>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| McpError::invalid(name, "is required and must be a string"))
}

/// Helper to get an optional string argument from JSON arguments.
pub fn get_optional_string(args: &Map<String, JsonValue>, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Helper to get an optional u64 argument from JSON arguments.
pub fn get_optional_u64(args: &Map<String, JsonValue>, name: &str) -> Option<u64> {
    args.get(name).and_then(|v| v.as_u64())
}

/// Helper to get an optional boolean argument.
pub fn get_optional_bool(args: &Map<String, JsonValue>, name: &str) -> Option<bool> {
    args.get(name).and_then(|v| v.as_bool())
}

/// Helper to get a required object argument as a BSON document.
pub fn get_document_arg(args: &Map<String, JsonValue>, name: &str) -> Result<Document> {
    let json = args
        .get(name)
        .cloned()
        .ok_or_else(|| McpError::invalid(name, "is required"))?;
    json_to_document(json, name)
}

/// Helper to get an optional object argument as a BSON document.
pub fn get_optional_document(args: &Map<String, JsonValue>, name: &str) -> Result<Option<Document>> {
    match args.get(name) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(json) => json_to_document(json.clone(), name).map(Some),
    }
}

/// Helper to get an aggregation pipeline argument.
pub fn get_pipeline_arg(args: &Map<String, JsonValue>, name: &str) -> Result<Vec<Document>> {
    let stages = args
        .get(name)
        .and_then(|v| v.as_array())
        .ok_or_else(|| McpError::invalid(name, "is required and must be an array"))?;

    stages
        .iter()
        .enumerate()
        .map(|(i, stage)| json_to_document(stage.clone(), &format!("{}[{}]", name, i)))
        .collect()
}

/// Numeric value at a dotted path (`"opcounters.insert"`), whatever its BSON width.
pub fn number_at(doc: &Document, path: &str) -> Option<f64> {
    let (parent, key) = match path.rsplit_once('.') {
        Some((parent, key)) => (parent.split('.').try_fold(doc, |d, p| d.get_document(p).ok())?, key),
        None => (doc, path),
    };
    match parent.get(key)? {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Integer counter at a dotted path, zero when absent.
pub fn count_at(doc: &Document, path: &str) -> i64 {
    number_at(doc, path).map(|v| v as i64).unwrap_or(0)
}

/// Sub-document at `key` as relaxed Extended JSON, null when absent.
pub fn section_json(doc: &Document, key: &str) -> JsonValue {
    doc.get_document(key)
        .ok()
        .map(|d| document_to_json(d.clone()))
        .unwrap_or(JsonValue::Null)
}

/// Build the filter for tools that accept either `filter` or a `field`/`value` pair.
///
/// Returns `None` when neither was supplied.
pub fn get_selector(args: &Map<String, JsonValue>) -> Result<Option<Document>> {
    if let Some(filter) = get_optional_document(args, "filter")? {
        for key in ["field", "value"] {
            if args.contains_key(key) {
                return Err(McpError::invalid(key, "cannot be combined with 'filter'"));
            }
        }
        return Ok(Some(filter));
    }

    match (args.get("field"), args.get("value")) {
        (Some(field), Some(value)) => {
            let field = field
                .as_str()
                .ok_or_else(|| McpError::invalid("field", "must be a string"))?;
            let mut filter = Document::new();
            filter.insert(field, json_to_bson(value.clone(), "value")?);
            Ok(Some(filter))
        }
        (Some(_), None) => Err(McpError::invalid("value", "is required when 'field' is given")),
        (None, Some(_)) => Err(McpError::invalid("field", "is required when 'value' is given")),
        (None, None) => Ok(None),
    }
}
