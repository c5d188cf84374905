//! Default-value synthesis from a resolved schema.
//!
//! Used when a replicant declares a schema but no explicit default:
//! the `default` keyword wins, objects assemble their properties
//! recursively, and every other type takes its zero value.

use serde_json::{Map, Value, json};

pub fn default_value(schema: &Value) -> Value {
    let Value::Object(map) = schema else {
        return Value::Null;
    };

    if let Some(default) = map.get("default") {
        return default.clone();
    }

    match primary_type(map) {
        Some("object") => {
            let mut out = Map::new();
            if let Some(Value::Object(props)) = map.get("properties") {
                for (key, sub) in props {
                    out.insert(key.clone(), default_value(sub));
                }
            }
            Value::Object(out)
        }
        Some("array") => json!([]),
        Some("string") => json!(""),
        Some("number") | Some("integer") => json!(0),
        Some("boolean") => json!(false),
        _ => Value::Null,
    }
}

fn primary_type(map: &Map<String, Value>) -> Option<&str> {
    match map.get("type") {
        Some(Value::String(name)) => Some(name.as_str()),
        Some(Value::Array(names)) => names.first().and_then(Value::as_str),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keyword_wins() {
        let schema = json!({"type": "number", "default": 42});
        assert_eq!(default_value(&schema), json!(42));
    }

    #[test]
    fn objects_synthesize_from_properties() {
        let schema = json!({
            "type": "object",
            "required": ["x", "y"],
            "properties": {
                "x": {"type": "number"},
                "y": {"type": "string"},
                "nested": {
                    "type": "object",
                    "properties": {"flag": {"type": "boolean"}}
                }
            }
        });
        assert_eq!(
            default_value(&schema),
            json!({"x": 0, "y": "", "nested": {"flag": false}})
        );
    }

    #[test]
    fn zero_values_per_type() {
        assert_eq!(default_value(&json!({"type": "array"})), json!([]));
        assert_eq!(default_value(&json!({"type": "string"})), json!(""));
        assert_eq!(default_value(&json!({"type": "boolean"})), json!(false));
        assert_eq!(default_value(&json!({})), Value::Null);
    }
}
