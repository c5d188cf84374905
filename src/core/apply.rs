//! Pure application of operations to a value tree.
//!
//! Applying needs only the current value and the operation. Batches are
//! all-or-nothing: they run against a scratch clone and commit on success,
//! so a failing operation leaves the caller's value untouched.

use serde_json::Value;
use thiserror::Error;

use super::canon::cmp_values;
use super::operation::{Operation, OperationKind};
use super::path::ValuePath;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("operation on an unset value")]
    Unset,
    #[error("path {path} does not exist")]
    PathMissing { path: String },
    #[error("path {path} is not a container")]
    NotAContainer { path: String },
    #[error("path {path} is not an array")]
    NotAnArray { path: String },
    #[error("path {path} is not an object")]
    NotAnObject { path: String },
    #[error("property {prop:?} already exists at {path}")]
    PropExists { path: String, prop: String },
    #[error("property {prop:?} does not exist at {path}")]
    PropMissing { path: String, prop: String },
    #[error("{prop:?} is not a valid array index at {path}")]
    IndexInvalid { path: String, prop: String },
    #[error("overwrite below the root requires a value at {path}")]
    UnsetBelowRoot { path: String },
}

/// Apply a batch without partial application.
pub fn apply_batch(root: &mut Option<Value>, ops: &[Operation]) -> Result<(), ApplyError> {
    let mut scratch = root.clone();
    for op in ops {
        apply_operation(&mut scratch, op)?;
    }
    *root = scratch;
    Ok(())
}

/// Apply one operation in place.
pub fn apply_operation(root: &mut Option<Value>, op: &Operation) -> Result<(), ApplyError> {
    if op.path.is_root()
        && let OperationKind::Overwrite { new_value } = &op.kind
    {
        *root = new_value.clone();
        return Ok(());
    }

    let value = root.as_mut().ok_or(ApplyError::Unset)?;
    let target = navigate(value, &op.path)?;

    match &op.kind {
        OperationKind::Overwrite { new_value } => {
            let new_value = new_value.as_ref().ok_or_else(|| ApplyError::UnsetBelowRoot {
                path: op.path.to_string(),
            })?;
            *target = new_value.clone();
            Ok(())
        }
        OperationKind::Add { prop, new_value } => add_child(target, &op.path, prop, new_value),
        OperationKind::Update { prop, new_value } => {
            update_child(target, &op.path, prop, new_value)
        }
        OperationKind::Delete { prop } => delete_child(target, &op.path, prop),
        OperationKind::Splice {
            start,
            delete_count,
            items,
        } => {
            let arr = as_array(target, &op.path)?;
            let len = arr.len();
            let start = clamp_index(*start, len);
            let delete_count = (*delete_count as usize).min(len - start);
            arr.splice(start..start + delete_count, items.iter().cloned());
            Ok(())
        }
        OperationKind::Push { items } => {
            let arr = as_array(target, &op.path)?;
            arr.extend(items.iter().cloned());
            Ok(())
        }
        OperationKind::Pop {} => {
            let arr = as_array(target, &op.path)?;
            arr.pop();
            Ok(())
        }
        OperationKind::Shift {} => {
            let arr = as_array(target, &op.path)?;
            if !arr.is_empty() {
                arr.remove(0);
            }
            Ok(())
        }
        OperationKind::Unshift { items } => {
            let arr = as_array(target, &op.path)?;
            arr.splice(0..0, items.iter().cloned());
            Ok(())
        }
        OperationKind::Reverse {} => {
            let arr = as_array(target, &op.path)?;
            arr.reverse();
            Ok(())
        }
        OperationKind::Sort {} => {
            let arr = as_array(target, &op.path)?;
            arr.sort_by(cmp_values);
            Ok(())
        }
        OperationKind::CopyWithin { target: to, start, end } => {
            let arr = as_array(target, &op.path)?;
            let len = arr.len();
            let to = clamp_index(*to, len);
            let from = clamp_index(*start, len);
            let fin = clamp_index(end.unwrap_or(len as i64), len);
            let count = fin.saturating_sub(from).min(len - to);
            let copied: Vec<Value> = arr[from..from + count].to_vec();
            arr[to..to + count].clone_from_slice(&copied);
            Ok(())
        }
        OperationKind::Fill { value, start, end } => {
            let arr = as_array(target, &op.path)?;
            let len = arr.len();
            let from = clamp_index(start.unwrap_or(0), len);
            let fin = clamp_index(end.unwrap_or(len as i64), len);
            for slot in arr.iter_mut().take(fin).skip(from) {
                *slot = value.clone();
            }
            Ok(())
        }
    }
}

/// Immutable twin of the internal navigation, for callers that need to
/// inspect a sub-value before deciding on an operation.
pub fn resolve_path<'a>(mut value: &'a Value, path: &ValuePath) -> Result<&'a Value, ApplyError> {
    for segment in path.segments() {
        value = match value {
            Value::Object(map) => map.get(segment).ok_or_else(|| ApplyError::PathMissing {
                path: path.to_string(),
            })?,
            Value::Array(arr) => {
                let index: usize =
                    segment.parse().map_err(|_| ApplyError::IndexInvalid {
                        path: path.to_string(),
                        prop: segment.clone(),
                    })?;
                arr.get(index).ok_or_else(|| ApplyError::PathMissing {
                    path: path.to_string(),
                })?
            }
            _ => {
                return Err(ApplyError::NotAContainer {
                    path: path.to_string(),
                });
            }
        };
    }
    Ok(value)
}

fn navigate<'a>(mut value: &'a mut Value, path: &ValuePath) -> Result<&'a mut Value, ApplyError> {
    for segment in path.segments() {
        value = match value {
            Value::Object(map) => map.get_mut(segment).ok_or_else(|| ApplyError::PathMissing {
                path: path.to_string(),
            })?,
            Value::Array(arr) => {
                let index: usize =
                    segment.parse().map_err(|_| ApplyError::IndexInvalid {
                        path: path.to_string(),
                        prop: segment.clone(),
                    })?;
                arr.get_mut(index).ok_or_else(|| ApplyError::PathMissing {
                    path: path.to_string(),
                })?
            }
            _ => {
                return Err(ApplyError::NotAContainer {
                    path: path.to_string(),
                });
            }
        };
    }
    Ok(value)
}

fn add_child(
    target: &mut Value,
    path: &ValuePath,
    prop: &str,
    new_value: &Value,
) -> Result<(), ApplyError> {
    match target {
        Value::Object(map) => {
            if map.contains_key(prop) {
                return Err(ApplyError::PropExists {
                    path: path.to_string(),
                    prop: prop.into(),
                });
            }
            map.insert(prop.into(), new_value.clone());
            Ok(())
        }
        Value::Array(arr) => {
            let index: usize = prop.parse().map_err(|_| ApplyError::IndexInvalid {
                path: path.to_string(),
                prop: prop.into(),
            })?;
            // JSON arrays cannot be sparse; only appending introduces a key.
            if index != arr.len() {
                return Err(ApplyError::IndexInvalid {
                    path: path.to_string(),
                    prop: prop.into(),
                });
            }
            arr.push(new_value.clone());
            Ok(())
        }
        _ => Err(ApplyError::NotAContainer {
            path: path.to_string(),
        }),
    }
}

fn update_child(
    target: &mut Value,
    path: &ValuePath,
    prop: &str,
    new_value: &Value,
) -> Result<(), ApplyError> {
    match target {
        Value::Object(map) => {
            let slot = map.get_mut(prop).ok_or_else(|| ApplyError::PropMissing {
                path: path.to_string(),
                prop: prop.into(),
            })?;
            *slot = new_value.clone();
            Ok(())
        }
        Value::Array(arr) => {
            let index: usize = prop.parse().map_err(|_| ApplyError::IndexInvalid {
                path: path.to_string(),
                prop: prop.into(),
            })?;
            let slot = arr.get_mut(index).ok_or_else(|| ApplyError::PropMissing {
                path: path.to_string(),
                prop: prop.into(),
            })?;
            *slot = new_value.clone();
            Ok(())
        }
        _ => Err(ApplyError::NotAContainer {
            path: path.to_string(),
        }),
    }
}

fn delete_child(target: &mut Value, path: &ValuePath, prop: &str) -> Result<(), ApplyError> {
    match target {
        Value::Object(map) => {
            if map.shift_remove(prop).is_none() {
                return Err(ApplyError::PropMissing {
                    path: path.to_string(),
                    prop: prop.into(),
                });
            }
            Ok(())
        }
        _ => Err(ApplyError::NotAnObject {
            path: path.to_string(),
        }),
    }
}

fn as_array<'a>(target: &'a mut Value, path: &ValuePath) -> Result<&'a mut Vec<Value>, ApplyError> {
    target.as_array_mut().ok_or_else(|| ApplyError::NotAnArray {
        path: path.to_string(),
    })
}

fn clamp_index(index: i64, len: usize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs() as usize)
    } else {
        (index as usize).min(len)
    }
}
