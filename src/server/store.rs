//! Per-namespace snapshot store.
//!
//! A namespace maps to a directory under the store root; each replicant
//! persists under the key `<name>.rep`, holding either a JSON snapshot
//! or the empty string for an unset value. Writes replace the prior
//! file contents wholesale via a tmp-file rename, so a torn write never
//! leaves a half-written snapshot behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::core::{NamespaceId, ReplicantName};
use crate::error::Transience;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            StoreError::Io { source, .. } => match source.kind() {
                io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => Transience::Retryable,
                _ => Transience::Permanent,
            },
        }
    }
}

pub struct NamespaceStore {
    dir: PathBuf,
}

impl NamespaceStore {
    pub fn open(root: &Path, namespace: &NamespaceId) -> Result<Self, StoreError> {
        let dir = crate::paths::namespace_dir(root, namespace);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.dir.join(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.dir.join(key);
        let tmp = self.dir.join(format!("{key}.tmp"));
        fs::write(&tmp, value.as_bytes()).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })
    }
}

/// Store key for a replicant's snapshot.
pub fn replicant_key(name: &ReplicantName) -> String {
    format!("{name}.rep")
}

/// Encode a value for the store: JSON, or the empty string when unset.
pub fn encode_snapshot(value: Option<&Value>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => String::new(),
    }
}

/// Decode a stored record. `None` means the record is corrupt and the
/// caller should fall back to defaults.
pub fn decode_snapshot(record: &str) -> Option<Option<Value>> {
    if record.is_empty() {
        return Some(None);
    }
    serde_json::from_str(record).ok().map(Some)
}
