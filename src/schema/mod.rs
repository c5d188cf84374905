//! Schema engine: load, resolve `$ref`s, digest, validate, defaults.
//!
//! A replicant schema is loaded once at declaration time. Load failures
//! are reported but never fatal: the replicant then runs without
//! validation and without a `schemaSum`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::core::canon_digest;

pub mod defaults;
pub mod resolve;
pub mod validate;

pub use validate::{Compiled, Violation};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse schema {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unresolvable $ref {reference:?}")]
    RefTarget { reference: String },
    #[error("$ref cycle through {reference:?}")]
    RefCycle { reference: String },
    #[error("schema is not an object or boolean")]
    NotASchema,
}

/// A fully resolved, compiled schema plus its wire digest.
#[derive(Debug, Clone)]
pub struct ReplicantSchema {
    resolved: Value,
    digest: String,
    compiled: Compiled,
}

impl ReplicantSchema {
    /// Load a schema file and inline every `$ref` against files in the
    /// same directory.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let resolved = resolve::resolve_document(path)?;
        Self::from_resolved(resolved)
    }

    /// Build from an already-resolved schema document.
    pub fn from_resolved(resolved: Value) -> Result<Self, SchemaError> {
        let compiled = validate::compile(&resolved)?;
        let digest = canon_digest(&resolved);
        Ok(Self {
            resolved,
            digest,
            compiled,
        })
    }

    pub fn resolved(&self) -> &Value {
        &self.resolved
    }

    /// The `schemaSum`: hex digest over the canonical serialization of
    /// the resolved schema. The only token used on the wire to compare
    /// schema versions.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Validate a value. An unset value passes: declaration always
    /// materializes schema defaults, so "no value yet" is not a schema
    /// violation.
    pub fn validate(&self, value: Option<&Value>) -> Result<(), Vec<Violation>> {
        let Some(value) = value else {
            return Ok(());
        };
        self.compiled.validate(value)
    }

    /// Default value synthesized from the schema.
    pub fn default_value(&self) -> Value {
        defaults::default_value(&self.resolved)
    }
}
