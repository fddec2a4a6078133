//! Response envelope.
//!
//! Every tool call resolves to one JSON object: the handler payload tagged with
//! `"status": "success"`, or an error description tagged with `"status": "error"`.

use serde_json::{Map, Value as JsonValue};

use crate::error::{McpError, Result};

/// Status tag for successful calls.
pub const STATUS_SUCCESS: &str = "success";
/// Status tag for failed calls.
pub const STATUS_ERROR: &str = "error";

/// Wrap a handler payload in a success envelope.
///
/// Object payloads are extended in place; anything else is placed under `result`.
pub fn success(payload: JsonValue) -> JsonValue {
    let mut obj = match payload {
        JsonValue::Object(obj) => obj,
        JsonValue::Null => Map::new(),
        other => {
            let mut obj = Map::new();
            obj.insert("result".to_string(), other);
            obj
        }
    };
    obj.insert("status".to_string(), JsonValue::String(STATUS_SUCCESS.to_string()));
    JsonValue::Object(obj)
}

/// Build an error envelope from a fault.
pub fn failure(err: &McpError) -> JsonValue {
    let mut obj = Map::new();
    obj.insert("status".to_string(), JsonValue::String(STATUS_ERROR.to_string()));
    obj.insert("error".to_string(), JsonValue::String(err.to_string()));
    obj.insert("error_type".to_string(), JsonValue::String(err.kind().to_string()));
    if let McpError::Validation { field, .. } = err {
        obj.insert("field".to_string(), JsonValue::String(field.clone()));
    }
    if let Some(suggestion) = err.suggestion() {
        obj.insert("suggestion".to_string(), JsonValue::String(suggestion));
    }
    JsonValue::Object(obj)
}

/// Collapse a handler outcome into an envelope.
pub fn shape(outcome: Result<JsonValue>) -> JsonValue {
    match outcome {
        Ok(payload) => success(payload),
        Err(err) => failure(&err),
    }
}

/// Whether an envelope reports failure.
pub fn is_error(envelope: &JsonValue) -> bool {
    envelope.get("status").and_then(|s| s.as_str()) == Some(STATUS_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_merges_status() {
        let env = success(json!({"count": 3}));
        assert_eq!(env, json!({"count": 3, "status": "success"}));
        assert!(!is_error(&env));
    }

    #[test]
    fn test_success_wraps_scalar() {
        let env = success(json!(42));
        assert_eq!(env, json!({"result": 42, "status": "success"}));
    }

    #[test]
    fn test_failure_carries_kind_and_suggestion() {
        let env = failure(&McpError::NotConnected);
        assert_eq!(env["status"], "error");
        assert_eq!(env["error_type"], "NotConnectedError");
        assert!(env["suggestion"].as_str().unwrap().contains("mongodb_configure_connection"));
        assert!(is_error(&env));
    }

    #[test]
    fn test_failure_names_validation_field() {
        let env = failure(&McpError::invalid("limit", "must be at most 1000"));
        assert_eq!(env["field"], "limit");
        assert_eq!(env["error_type"], "ValidationError");
    }

    #[test]
    fn test_operation_error_has_no_suggestion() {
        let env = failure(&McpError::Operation("E11000 duplicate key".to_string()));
        assert!(env.get("suggestion").is_none());
    }
}
