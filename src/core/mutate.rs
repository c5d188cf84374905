//! The mutation API that stands in for an observing proxy.
//!
//! Every mutation goes through a `MutationRecorder`, which applies the
//! edit to the local tree and appends the equivalent operation to the
//! pending queue in the same step. Remote operations are applied through
//! `core::apply` directly and never touch a recorder, so an applied batch
//! can never re-generate operations.

use serde_json::Value;

use super::apply::{ApplyError, apply_operation, resolve_path};
use super::operation::{Operation, OperationKind};
use super::path::ValuePath;

/// Records mutations against a value tree and its pending queue.
///
/// Borrows both exclusively, so a recorder can never outlive the tick
/// that created it.
pub struct MutationRecorder<'a> {
    value: &'a mut Option<Value>,
    pending: &'a mut Vec<Operation>,
}

impl<'a> MutationRecorder<'a> {
    pub fn new(value: &'a mut Option<Value>, pending: &'a mut Vec<Operation>) -> Self {
        Self { value, pending }
    }

    fn record(&mut self, op: Operation) -> Result<(), ApplyError> {
        apply_operation(self.value, &op)?;
        self.pending.push(op);
        Ok(())
    }

    /// Wholesale replacement. Returns `false` (recording nothing) when the
    /// new value equals the current one.
    pub fn assign(&mut self, new_value: Option<Value>) -> Result<bool, ApplyError> {
        if *self.value == new_value {
            return Ok(false);
        }
        self.record(Operation::new(
            ValuePath::root(),
            OperationKind::Overwrite { new_value },
        ))?;
        Ok(true)
    }

    /// Set a child key, classified as `add` when the key is absent and
    /// `update` when present.
    pub fn set(
        &mut self,
        path: &ValuePath,
        prop: &str,
        new_value: Value,
    ) -> Result<(), ApplyError> {
        let root = self.value.as_ref().ok_or(ApplyError::Unset)?;
        let target = resolve_path(root, path)?;
        let exists = match target {
            Value::Object(map) => map.contains_key(prop),
            Value::Array(arr) => {
                let index: usize = prop.parse().map_err(|_| ApplyError::IndexInvalid {
                    path: path.to_string(),
                    prop: prop.into(),
                })?;
                index < arr.len()
            }
            _ => {
                return Err(ApplyError::NotAContainer {
                    path: path.to_string(),
                });
            }
        };
        let kind = if exists {
            OperationKind::Update {
                prop: prop.into(),
                new_value,
            }
        } else {
            OperationKind::Add {
                prop: prop.into(),
                new_value,
            }
        };
        self.record(Operation::new(path.clone(), kind))
    }

    pub fn remove(&mut self, path: &ValuePath, prop: &str) -> Result<(), ApplyError> {
        self.record(Operation::new(
            path.clone(),
            OperationKind::Delete { prop: prop.into() },
        ))
    }

    pub fn splice(
        &mut self,
        path: &ValuePath,
        start: i64,
        delete_count: u64,
        items: Vec<Value>,
    ) -> Result<(), ApplyError> {
        self.record(Operation::new(
            path.clone(),
            OperationKind::Splice {
                start,
                delete_count,
                items,
            },
        ))
    }

    pub fn push(&mut self, path: &ValuePath, items: Vec<Value>) -> Result<(), ApplyError> {
        self.record(Operation::new(path.clone(), OperationKind::Push { items }))
    }

    /// Pops the last element, returning it like the native mutator does.
    pub fn pop(&mut self, path: &ValuePath) -> Result<Option<Value>, ApplyError> {
        let popped = self.last_element(path)?;
        self.record(Operation::new(path.clone(), OperationKind::Pop {}))?;
        Ok(popped)
    }

    /// Removes the first element, returning it.
    pub fn shift(&mut self, path: &ValuePath) -> Result<Option<Value>, ApplyError> {
        let root = self.value.as_ref().ok_or(ApplyError::Unset)?;
        let shifted = match resolve_path(root, path)? {
            Value::Array(arr) => arr.first().cloned(),
            _ => {
                return Err(ApplyError::NotAnArray {
                    path: path.to_string(),
                });
            }
        };
        self.record(Operation::new(path.clone(), OperationKind::Shift {}))?;
        Ok(shifted)
    }

    pub fn unshift(&mut self, path: &ValuePath, items: Vec<Value>) -> Result<(), ApplyError> {
        self.record(Operation::new(
            path.clone(),
            OperationKind::Unshift { items },
        ))
    }

    pub fn reverse(&mut self, path: &ValuePath) -> Result<(), ApplyError> {
        self.record(Operation::new(path.clone(), OperationKind::Reverse {}))
    }

    pub fn sort(&mut self, path: &ValuePath) -> Result<(), ApplyError> {
        self.record(Operation::new(path.clone(), OperationKind::Sort {}))
    }

    pub fn copy_within(
        &mut self,
        path: &ValuePath,
        target: i64,
        start: i64,
        end: Option<i64>,
    ) -> Result<(), ApplyError> {
        self.record(Operation::new(
            path.clone(),
            OperationKind::CopyWithin { target, start, end },
        ))
    }

    pub fn fill(
        &mut self,
        path: &ValuePath,
        value: Value,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<(), ApplyError> {
        self.record(Operation::new(
            path.clone(),
            OperationKind::Fill { value, start, end },
        ))
    }

    fn last_element(&self, path: &ValuePath) -> Result<Option<Value>, ApplyError> {
        let root = self.value.as_ref().ok_or(ApplyError::Unset)?;
        match resolve_path(root, path)? {
            Value::Array(arr) => Ok(arr.last().cloned()),
            _ => Err(ApplyError::NotAnArray {
                path: path.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn root() -> ValuePath {
        ValuePath::root()
    }

    #[test]
    fn set_classifies_add_vs_update() {
        let mut value = Some(json!({"a": 1}));
        let mut pending = Vec::new();
        let mut recorder = MutationRecorder::new(&mut value, &mut pending);

        recorder.set(&root(), "b", json!(2)).unwrap();
        recorder.set(&root(), "a", json!(3)).unwrap();

        assert_eq!(value, Some(json!({"a": 3, "b": 2})));
        assert_eq!(pending[0].method(), "add");
        assert_eq!(pending[1].method(), "update");
    }

    #[test]
    fn assign_equal_value_is_a_no_op() {
        let mut value = Some(json!({"a": 1}));
        let mut pending = Vec::new();
        let mut recorder = MutationRecorder::new(&mut value, &mut pending);

        let changed = recorder.assign(Some(json!({"a": 1}))).unwrap();
        assert!(!changed);
        assert!(pending.is_empty());

        let mut recorder = MutationRecorder::new(&mut value, &mut pending);
        let changed = recorder.assign(Some(json!({"a": 2}))).unwrap();
        assert!(changed);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method(), "overwrite");
    }

    #[test]
    fn pop_returns_the_removed_element() {
        let mut value = Some(json!([1, 2, 3]));
        let mut pending = Vec::new();
        let mut recorder = MutationRecorder::new(&mut value, &mut pending);

        let popped = recorder.pop(&root()).unwrap();
        assert_eq!(popped, Some(json!(3)));
        assert_eq!(value, Some(json!([1, 2])));
    }

    #[test]
    fn recorded_batch_replays_to_the_same_value() {
        let mut value = Some(json!({"a": {"b": 1}, "list": [1, 2]}));
        let replica_start = value.clone();
        let mut pending = Vec::new();
        let mut recorder = MutationRecorder::new(&mut value, &mut pending);

        let a = ValuePath::parse("/a").unwrap();
        let list = ValuePath::parse("/list").unwrap();
        recorder.set(&a, "c", json!(2)).unwrap();
        recorder.push(&list, vec![json!(3)]).unwrap();
        recorder.remove(&a, "b").unwrap();

        let mut replica = replica_start;
        crate::core::apply::apply_batch(&mut replica, &pending).unwrap();
        assert_eq!(replica, value);
    }

    #[test]
    fn set_on_scalar_fails_without_recording() {
        let mut value = Some(json!(42));
        let mut pending = Vec::new();
        let mut recorder = MutationRecorder::new(&mut value, &mut pending);

        assert!(recorder.set(&root(), "a", json!(1)).is_err());
        assert!(pending.is_empty());
        assert_eq!(value, Some(json!(42)));
    }
}
