//! JSON Schema normalization for tool parameters.
//!
//! Providers disagree on which JSON Schema keywords they accept. Before a tool
//! schema goes upstream it is stripped of the keywords no provider accepts
//! universally. The cleaning recurses through `properties.*`, `items`, and any
//! nested object or array values; scalars pass through untouched.

use serde_json::Value;

const STRIP_KEYS: &[&str] = &["$schema", "title", "examples", "additionalProperties"];

/// Strip unsupported schema keywords, recursively. Idempotent.
///
/// `format` is removed only on string-typed schemas; providers accept it on
/// numeric types.
pub fn clean_json_schema(schema: &Value) -> Value {
    let mut cleaned = schema.clone();
    clean_in_place(&mut cleaned);
    cleaned
}

fn clean_in_place(schema: &mut Value) {
    match schema {
        Value::Object(obj) => {
            for k in STRIP_KEYS {
                obj.remove(*k);
            }

            let is_string_type = obj.get("type").and_then(Value::as_str) == Some("string");
            if is_string_type {
                obj.remove("format");
            }

            for (_k, v) in obj.iter_mut() {
                clean_in_place(v);
            }
        }
        Value::Array(arr) => {
            for item in arr {
                clean_in_place(item);
            }
        }
        _ => {}
    }
}
