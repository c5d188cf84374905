//! Canonical JSON encoding and the schema digest.
//!
//! Canonical rules:
//! - object keys sorted by UTF-8 byte order, recursively
//! - no insignificant whitespace
//!
//! The digest over the canonical form is the `schemaSum` that travels on
//! the wire, so the encoding must be identical on every platform.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a value to canonical JSON bytes.
pub fn to_canon_json_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canon(&mut out, value);
    out
}

/// Lowercase hex SHA-256 over the canonical JSON form.
pub fn canon_digest(value: &Value) -> String {
    use std::fmt::Write;

    let mut hasher = Sha256::new();
    hasher.update(to_canon_json_bytes(value));
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn write_canon(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(out, &Value::String((*key).clone()));
                out.push(b':');
                write_canon(out, value);
            }
            out.push(b'}');
        }
        Value::Array(values) => {
            out.push(b'[');
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canon(out, value);
            }
            out.push(b']');
        }
        other => write_scalar(out, other),
    }
}

fn write_scalar(out: &mut Vec<u8>, value: &Value) {
    // Scalars have a single serde_json rendering; only containers need
    // key ordering, handled above.
    match serde_json::to_vec(value) {
        Ok(bytes) => out.extend_from_slice(&bytes),
        Err(_) => out.extend_from_slice(b"null"),
    }
}

/// Total order over JSON values, used by the wire `array:sort` mutator.
///
/// null < bool < number < string < array < object; numbers compare
/// numerically, containers element-wise.
pub fn cmp_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x.cmp(&y)
            } else {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (a, b) in x.iter().zip(y.iter()) {
                let ord = cmp_values(a, b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => {
            to_canon_json_bytes(a).cmp(&to_canon_json_bytes(b))
        }
        _ => rank(a).cmp(&rank(b)),
    }
}
