//! `{ "success": ... }` response objects for the interface layer.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{DfsError, DfsResult};

/// Flatten a successful result's fields next to `"success": true`, or
/// describe the failure. Non-object results land under `"data"`.
pub fn into_response<T: Serialize>(result: DfsResult<T>) -> Value {
    let value = match result {
        Ok(value) => value,
        Err(err) => return error_body(&err),
    };
    match serde_json::to_value(value) {
        Ok(Value::Object(fields)) => {
            let mut body = Map::new();
            body.insert("success".to_string(), Value::Bool(true));
            body.extend(fields);
            Value::Object(body)
        }
        Ok(other) => json!({ "success": true, "data": other }),
        Err(e) => error_body(&DfsError::from(e)),
    }
}

pub fn error_body(err: &DfsError) -> Value {
    json!({
        "success": false,
        "error": err.to_string(),
        "error_kind": err.kind(),
    })
}
