//! `$ref` resolution: inline external and internal references so the
//! runtime schema is self-contained.
//!
//! External references resolve against files in the schema's own
//! directory ("common.json", "common.json#/definitions/color"); internal
//! references ("#/definitions/color") resolve against the referencing
//! document's root. Per JSON-Schema, a `$ref` object is replaced wholesale
//! by its target; sibling keys are dropped.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::SchemaError;

pub fn resolve_document(path: &Path) -> Result<Value, SchemaError> {
    let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut resolver = Resolver {
        dir,
        cache: HashMap::new(),
        stack: Vec::new(),
    };
    let root = resolver.load(&file)?;
    resolver.resolve(root.clone(), &root, &file)
}

struct Resolver {
    dir: PathBuf,
    cache: HashMap<String, Value>,
    stack: Vec<String>,
}

impl Resolver {
    fn load(&mut self, file: &str) -> Result<Value, SchemaError> {
        if let Some(doc) = self.cache.get(file) {
            return Ok(doc.clone());
        }
        let path = self.dir.join(file);
        let contents = fs::read_to_string(&path).map_err(|source| SchemaError::Io {
            path: path.clone(),
            source,
        })?;
        let doc: Value =
            serde_json::from_str(&contents).map_err(|source| SchemaError::Parse { path, source })?;
        self.cache.insert(file.to_string(), doc.clone());
        Ok(doc)
    }

    /// Walk `value`, replacing every `$ref` object with its resolved
    /// target. `root` and `file` identify the document `value` came from,
    /// for internal pointer lookups and cycle tracking.
    fn resolve(&mut self, value: Value, root: &Value, file: &str) -> Result<Value, SchemaError> {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("$ref") {
                    return self.resolve_ref(reference.clone(), root, file);
                }
                let mut out = serde_json::Map::new();
                for (key, child) in map {
                    out.insert(key, self.resolve(child, root, file)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(values) => {
                let mut out = Vec::with_capacity(values.len());
                for child in values {
                    out.push(self.resolve(child, root, file)?);
                }
                Ok(Value::Array(out))
            }
            other => Ok(other),
        }
    }

    fn resolve_ref(
        &mut self,
        reference: String,
        root: &Value,
        file: &str,
    ) -> Result<Value, SchemaError> {
        let (target_file, pointer) = match reference.split_once('#') {
            Some((f, ptr)) => (f, ptr.to_string()),
            None => (reference.as_str(), String::new()),
        };
        let target_file = if target_file.is_empty() {
            file.to_string()
        } else {
            target_file.to_string()
        };

        let key = format!("{target_file}#{pointer}");
        if self.stack.contains(&key) {
            return Err(SchemaError::RefCycle { reference });
        }

        let (target_root, target) = if target_file == file {
            let target = lookup(root, &pointer).ok_or(SchemaError::RefTarget {
                reference: reference.clone(),
            })?;
            (root.clone(), target)
        } else {
            let doc = self.load(&target_file)?;
            let target = lookup(&doc, &pointer).ok_or(SchemaError::RefTarget {
                reference: reference.clone(),
            })?;
            (doc, target)
        };

        self.stack.push(key);
        let resolved = self.resolve(target, &target_root, &target_file)?;
        self.stack.pop();
        Ok(resolved)
    }
}

fn lookup(doc: &Value, pointer: &str) -> Option<Value> {
    if pointer.is_empty() {
        return Some(doc.clone());
    }
    doc.pointer(pointer).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write(dir: &Path, name: &str, value: &Value) {
        fs::write(dir.join(name), serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    #[test]
    fn inlines_internal_refs() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "schema.json",
            &json!({
                "definitions": {"score": {"type": "number"}},
                "type": "object",
                "properties": {"home": {"$ref": "#/definitions/score"}}
            }),
        );

        let resolved = resolve_document(&dir.path().join("schema.json")).unwrap();
        assert_eq!(
            resolved["properties"]["home"],
            json!({"type": "number"})
        );
    }

    #[test]
    fn inlines_external_refs_with_fragments() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "common.json",
            &json!({"definitions": {"color": {"type": "string"}}}),
        );
        write(
            dir.path(),
            "schema.json",
            &json!({
                "type": "object",
                "properties": {"tint": {"$ref": "common.json#/definitions/color"}}
            }),
        );

        let resolved = resolve_document(&dir.path().join("schema.json")).unwrap();
        assert_eq!(resolved["properties"]["tint"], json!({"type": "string"}));
    }

    #[test]
    fn follows_refs_transitively_across_files() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "base.json",
            &json!({"definitions": {"id": {"type": "integer"}}}),
        );
        write(
            dir.path(),
            "mid.json",
            &json!({"definitions": {"key": {"$ref": "base.json#/definitions/id"}}}),
        );
        write(
            dir.path(),
            "schema.json",
            &json!({"$ref": "mid.json#/definitions/key"}),
        );

        let resolved = resolve_document(&dir.path().join("schema.json")).unwrap();
        assert_eq!(resolved, json!({"type": "integer"}));
    }

    #[test]
    fn detects_ref_cycles() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "schema.json",
            &json!({"definitions": {"a": {"$ref": "#/definitions/a"}}, "$ref": "#/definitions/a"}),
        );

        let err = resolve_document(&dir.path().join("schema.json")).unwrap_err();
        assert!(matches!(err, SchemaError::RefCycle { .. }));
    }

    #[test]
    fn missing_target_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "schema.json", &json!({"$ref": "#/definitions/nope"}));

        let err = resolve_document(&dir.path().join("schema.json")).unwrap_err();
        assert!(matches!(err, SchemaError::RefTarget { .. }));
    }
}
