//! JSON merge patch (RFC 7386) synthesis.

use serde_json::{Map, Value};

use crate::error::{LabellerError, Result};

/// Builds the minimal merge patch turning `before` into `after`.
///
/// Both documents must be JSON objects. Keys dropped from `after` are emitted
/// as `null`, nested objects are diffed recursively and anything else
/// (scalars, arrays) is replaced wholesale.
pub fn create(before: &Value, after: &Value) -> Result<Value> {
    match (before, after) {
        (Value::Object(before), Value::Object(after)) => Ok(Value::Object(diff(before, after))),
        _ => Err(LabellerError::Patch(
            "merge patch documents must both be JSON objects".to_string(),
        )),
    }
}

fn diff(before: &Map<String, Value>, after: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, new_value) in after {
        match (before.get(key), new_value) {
            (Some(old_value), _) if old_value == new_value => {}
            (Some(Value::Object(old)), Value::Object(new)) => {
                let nested = diff(old, new);
                if !nested.is_empty() {
                    patch.insert(key.clone(), Value::Object(nested));
                }
            }
            _ => {
                patch.insert(key.clone(), new_value.clone());
            }
        }
    }

    for key in before.keys() {
        if !after.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    patch
}
