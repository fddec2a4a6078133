//! Tool parameter validation.
//!
//! Each tool declares its parameters as a JSON Schema object (see the `schema!`
//! macro). The same value is published through `tools/list` and interpreted
//! here, so the advertised shape and the enforced shape cannot drift apart.
//!
//! Validation is fail-fast: the first violation is returned as
//! `McpError::Validation` naming the parameter and the broken constraint.

use mongodb::bson::Bson;
use serde_json::{Map, Value as JsonValue};

use crate::error::{McpError, Result};

/// Characters MongoDB forbids in database names.
const DATABASE_NAME_FORBIDDEN: &[char] = &['/', '\\', '.', ' ', '"', '$'];

/// String index types accepted besides `1` and `-1`.
const INDEX_KINDS: &[&str] = &["2d", "2dsphere", "text", "hashed"];

/// Check `args` against a tool's input schema.
///
/// Unknown parameters are checked first, then required parameters in declared
/// order, then each supplied parameter in name order.
pub fn validate_args(schema: &JsonValue, args: &Map<String, JsonValue>) -> Result<()> {
    let empty = Map::new();
    let props = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .unwrap_or(&empty);

    if schema.get("additionalProperties") == Some(&JsonValue::Bool(false)) {
        if let Some(unknown) = args.keys().find(|k| !props.contains_key(k.as_str())) {
            return Err(McpError::invalid(unknown.as_str(), "is not a recognised parameter"));
        }
    }

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for name in &required {
        match args.get(*name) {
            None | Some(JsonValue::Null) => return Err(McpError::invalid(*name, "is required")),
            Some(_) => {}
        }
    }

    for (name, prop) in props {
        match args.get(name) {
            None => {}
            Some(JsonValue::Null) if !required.contains(&name.as_str()) => {}
            Some(value) => check_value(name, prop, value)?,
        }
    }

    Ok(())
}

fn check_value(field: &str, schema: &JsonValue, value: &JsonValue) -> Result<()> {
    if let Some(expected) = schema.get("type").and_then(|t| t.as_str()) {
        let ok = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        };
        if !ok {
            return Err(McpError::invalid(field, format!("must be of type {}", expected)));
        }
    }

    match value {
        JsonValue::String(s) => {
            let len = s.chars().count() as u64;
            if let Some(min) = bound(schema, "minLength") {
                if (len as f64) < min {
                    return Err(McpError::invalid(field, format!("must be at least {} characters", min)));
                }
            }
            if let Some(max) = bound(schema, "maxLength") {
                if (len as f64) > max {
                    return Err(McpError::invalid(field, format!("must be at most {} characters", max)));
                }
            }
        }
        JsonValue::Number(n) => {
            let n = n.as_f64().unwrap_or(f64::NAN);
            if let Some(min) = bound(schema, "minimum") {
                if n < min {
                    return Err(McpError::invalid(field, format!("must be at least {}", min)));
                }
            }
            if let Some(max) = bound(schema, "maximum") {
                if n > max {
                    return Err(McpError::invalid(field, format!("must be at most {}", max)));
                }
            }
        }
        JsonValue::Array(items) => {
            if let Some(min) = bound(schema, "minItems") {
                if (items.len() as f64) < min {
                    return Err(McpError::invalid(field, format!("must contain at least {} items", min)));
                }
            }
            if let Some(max) = bound(schema, "maxItems") {
                if (items.len() as f64) > max {
                    return Err(McpError::invalid(field, format!("must contain at most {} items", max)));
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check_value(&format!("{}[{}]", field, i), item_schema, item)?;
                }
            }
        }
        JsonValue::Object(obj) => {
            if let Some(min) = bound(schema, "minProperties") {
                if (obj.len() as f64) < min {
                    return Err(McpError::invalid(field, "must not be empty"));
                }
            }
        }
        _ => {}
    }

    if let Some(format) = schema.get("format").and_then(|f| f.as_str()) {
        check_format(field, format, value)?;
    }

    Ok(())
}

fn bound(schema: &JsonValue, key: &str) -> Option<f64> {
    schema.get(key).and_then(|v| v.as_f64())
}

fn check_format(field: &str, format: &str, value: &JsonValue) -> Result<()> {
    match format {
        "database-name" => check_database_name(field, value.as_str().unwrap_or_default()),
        "collection-name" => check_collection_name(field, value.as_str().unwrap_or_default()),
        "pipeline" => check_pipeline(field, value),
        "index-keys" => index_key_pairs(field, value).map(|_| ()),
        _ => Ok(()),
    }
}

/// Database names: non-blank, none of `/ \ . space " $`.
pub fn check_database_name(field: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(McpError::invalid(field, "must not be blank"));
    }
    if let Some(c) = name.chars().find(|c| DATABASE_NAME_FORBIDDEN.contains(c)) {
        return Err(McpError::invalid(field, format!("must not contain '{}'", c)));
    }
    Ok(())
}

/// Collection names: non-blank, no `system.` prefix, no `$`.
pub fn check_collection_name(field: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(McpError::invalid(field, "must not be blank"));
    }
    if name.starts_with("system.") {
        return Err(McpError::invalid(field, "must not start with 'system.'"));
    }
    if name.contains('$') {
        return Err(McpError::invalid(field, "must not contain '$'"));
    }
    Ok(())
}

fn check_pipeline(field: &str, value: &JsonValue) -> Result<()> {
    let stages = value
        .as_array()
        .ok_or_else(|| McpError::invalid(field, "must be an array of stages"))?;

    for (i, stage) in stages.iter().enumerate() {
        let name = format!("{}[{}]", field, i);
        let stage = stage
            .as_object()
            .ok_or_else(|| McpError::invalid(&name, "must be an object"))?;
        if stage.len() != 1 {
            return Err(McpError::invalid(&name, "must contain exactly one stage operator"));
        }
        if !stage.keys().all(|k| k.starts_with('$')) {
            return Err(McpError::invalid(&name, "stage operator must start with '$' (e.g. $match)"));
        }
    }
    Ok(())
}

/// Parse an index key specification into ordered `(field, direction)` pairs.
///
/// Accepts `[["name", 1], ["age", -1]]` or
/// `[{"field": "name", "direction": 1}]`.
pub fn index_key_pairs(field: &str, value: &JsonValue) -> Result<Vec<(String, Bson)>> {
    let items = value
        .as_array()
        .ok_or_else(|| McpError::invalid(field, "must be an array of [field, direction] pairs"))?;
    if items.is_empty() {
        return Err(McpError::invalid(field, "must contain at least one key"));
    }

    let mut pairs: Vec<(String, Bson)> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let name = format!("{}[{}]", field, i);
        let (key, direction) = match item {
            JsonValue::Array(pair) if pair.len() == 2 => (&pair[0], &pair[1]),
            JsonValue::Object(obj) => match (obj.get("field"), obj.get("direction")) {
                (Some(k), Some(d)) => (k, d),
                _ => {
                    return Err(McpError::invalid(&name, "must have 'field' and 'direction'"));
                }
            },
            _ => return Err(McpError::invalid(&name, "must be a [field, direction] pair")),
        };

        let key = key
            .as_str()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| McpError::invalid(&name, "field must be a non-empty string"))?;
        let direction = index_direction(direction).ok_or_else(|| {
            McpError::invalid(
                &name,
                "direction must be 1, -1, \"2d\", \"2dsphere\", \"text\" or \"hashed\"",
            )
        })?;
        if pairs.iter().any(|(k, _)| k == key) {
            return Err(McpError::invalid(&name, format!("duplicate index field '{}'", key)));
        }
        pairs.push((key.to_string(), direction));
    }
    Ok(pairs)
}

fn index_direction(value: &JsonValue) -> Option<Bson> {
    match value {
        JsonValue::Number(n) => match n.as_i64() {
            Some(1) => Some(Bson::Int32(1)),
            Some(-1) => Some(Bson::Int32(-1)),
            _ => None,
        },
        JsonValue::String(s) if INDEX_KINDS.contains(&s.as_str()) => Some(Bson::String(s.clone())),
        _ => None,
    }
}
