//! The operation model: one serializable record per mutation.
//!
//! Wire shape is `{ "path": "/a/b", "method": "...", "args": {...} }`.
//! An unknown `method` fails deserialization, which rejects the whole
//! batch that carried it before any state is touched.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::path::ValuePath;

/// Deserialize a field that was present, even when it holds `null`.
///
/// With a plain `Option<Value>`, serde folds wire `null` into `None`,
/// erasing the difference between "value is null" and "no value"
/// (an unset replicant). Paired with `#[serde(default)]`, this keeps
/// absent → `None` and `null` → `Some(Value::Null)`.
pub(crate) fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub path: ValuePath,
    #[serde(flatten)]
    pub kind: OperationKind,
}

impl Operation {
    pub fn new(path: ValuePath, kind: OperationKind) -> Self {
        Self { path, kind }
    }

    /// Wire name of the mutator, for logging.
    pub fn method(&self) -> &'static str {
        self.kind.method()
    }
}

/// The mutator and its arguments.
///
/// `delete` applies to object keys only; array element removal travels as
/// `array:splice`. `array:sort` carries no comparator; both sides sort by
/// the canonical JSON order (see `core::canon::cmp_values`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum OperationKind {
    /// Replace the entire sub-value at `path`. An absent `newValue`
    /// unsets the root (the value becomes undeclared).
    #[serde(rename = "overwrite")]
    Overwrite {
        #[serde(
            rename = "newValue",
            default,
            deserialize_with = "present_value",
            skip_serializing_if = "Option::is_none"
        )]
        new_value: Option<Value>,
    },

    /// Create a child key that did not exist.
    #[serde(rename = "add")]
    Add {
        prop: String,
        #[serde(rename = "newValue")]
        new_value: Value,
    },

    /// Replace an existing child key.
    #[serde(rename = "update")]
    Update {
        prop: String,
        #[serde(rename = "newValue")]
        new_value: Value,
    },

    /// Remove an existing child key.
    #[serde(rename = "delete")]
    Delete { prop: String },

    #[serde(rename = "array:splice")]
    Splice {
        start: i64,
        #[serde(rename = "deleteCount")]
        delete_count: u64,
        #[serde(default)]
        items: Vec<Value>,
    },

    #[serde(rename = "array:push")]
    Push {
        #[serde(default)]
        items: Vec<Value>,
    },

    #[serde(rename = "array:pop")]
    Pop {},

    #[serde(rename = "array:shift")]
    Shift {},

    #[serde(rename = "array:unshift")]
    Unshift {
        #[serde(default)]
        items: Vec<Value>,
    },

    #[serde(rename = "array:reverse")]
    Reverse {},

    #[serde(rename = "array:sort")]
    Sort {},

    #[serde(rename = "array:copyWithin")]
    CopyWithin {
        target: i64,
        #[serde(default)]
        start: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<i64>,
    },

    #[serde(rename = "array:fill")]
    Fill {
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<i64>,
    },
}

impl OperationKind {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Overwrite { .. } => "overwrite",
            Self::Add { .. } => "add",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Splice { .. } => "array:splice",
            Self::Push { .. } => "array:push",
            Self::Pop {} => "array:pop",
            Self::Shift {} => "array:shift",
            Self::Unshift { .. } => "array:unshift",
            Self::Reverse {} => "array:reverse",
            Self::Sort {} => "array:sort",
            Self::CopyWithin { .. } => "array:copyWithin",
            Self::Fill { .. } => "array:fill",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_matches_wire_shape() {
        let op = Operation::new(
            ValuePath::parse("/a").unwrap(),
            OperationKind::Add {
                prop: "c".into(),
                new_value: json!(2),
            },
        );
        let wire = serde_json::to_value(&op).unwrap();
        assert_eq!(
            wire,
            json!({
                "path": "/a",
                "method": "add",
                "args": {"prop": "c", "newValue": 2}
            })
        );
    }

    #[test]
    fn splice_matches_wire_shape() {
        let op = Operation::new(
            ValuePath::root(),
            OperationKind::Splice {
                start: 1,
                delete_count: 1,
                items: vec![json!(40), json!(50)],
            },
        );
        let wire = serde_json::to_value(&op).unwrap();
        assert_eq!(
            wire,
            json!({
                "path": "/",
                "method": "array:splice",
                "args": {"start": 1, "deleteCount": 1, "items": [40, 50]}
            })
        );
    }

    #[test]
    fn round_trips_through_json() {
        let ops = vec![
            Operation::new(
                ValuePath::root(),
                OperationKind::Overwrite {
                    new_value: Some(json!({"a": 1})),
                },
            ),
            Operation::new(ValuePath::root(), OperationKind::Pop {}),
            Operation::new(
                ValuePath::parse("/list").unwrap(),
                OperationKind::Fill {
                    value: json!(0),
                    start: Some(1),
                    end: None,
                },
            ),
        ];
        let encoded = serde_json::to_string(&ops).unwrap();
        let decoded: Vec<Operation> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, ops);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let raw = json!({"path": "/", "method": "array:flatten", "args": {}});
        assert!(serde_json::from_value::<Operation>(raw).is_err());
    }

    #[test]
    fn overwrite_without_new_value_unsets() {
        let raw = json!({"path": "/", "method": "overwrite", "args": {}});
        let op: Operation = serde_json::from_value(raw).unwrap();
        assert_eq!(
            op.kind,
            OperationKind::Overwrite { new_value: None }
        );
    }

    #[test]
    fn overwrite_with_null_is_not_unset() {
        let raw = json!({"path": "/", "method": "overwrite", "args": {"newValue": null}});
        let op: Operation = serde_json::from_value(raw).unwrap();
        assert_eq!(
            op.kind,
            OperationKind::Overwrite {
                new_value: Some(Value::Null)
            }
        );
    }
}
