//! Wire payload schemas for the `replicant:*` protocol.
//!
//! Field names here are the wire contract; renames keep the Rust side
//! idiomatic while the frames match the protocol exactly. Value fields
//! distinguish absent (an unset replicant) from JSON `null` via
//! `present_value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::operation::present_value;
use crate::core::{NamespaceId, Operation, ReplicantName};

pub const PROTOCOL_VERSION: u32 = 1;

/// Event names used in envelopes.
pub mod events {
    pub const DECLARE: &str = "replicant:declare";
    pub const PROPOSE_OPERATIONS: &str = "replicant:proposeOperations";
    pub const READ: &str = "replicant:read";
    pub const OPERATIONS: &str = "replicant:operations";
    pub const PING: &str = "ping";
    pub const SHUTDOWN: &str = "shutdown";
    pub const ACK: &str = "ack";
}

/// Declaration options. The server ignores `schemaPath` arriving over the
/// wire; schemas are server-owned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicantOpts {
    #[serde(
        rename = "defaultValue",
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    #[serde(
        rename = "persistenceInterval",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub persistence_interval_ms: Option<u64>,
    #[serde(rename = "schemaPath", default, skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclareRequest {
    pub name: ReplicantName,
    pub namespace: NamespaceId,
    #[serde(default)]
    pub opts: ReplicantOpts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    SchemaMismatch,
    RevisionMismatch,
    ValueInvalid,
    /// The batch carried a method this engine does not recognize.
    UnknownOperation,
    /// A recognized operation could not apply to the current value.
    OperationInvalid,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SchemaMismatch => "schema-mismatch",
            Self::RevisionMismatch => "revision-mismatch",
            Self::ValueInvalid => "value-invalid",
            Self::UnknownOperation => "unknown-operation",
            Self::OperationInvalid => "operation-invalid",
        }
    }
}

/// Reply to a declaration or a proposal: the authoritative snapshot,
/// plus a reject reason when the request was refused.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotReply {
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(rename = "schemaSum", default, skip_serializing_if = "Option::is_none")]
    pub schema_sum: Option<String>,
    #[serde(
        rename = "rejectReason",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reject_reason: Option<RejectReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeRequest {
    pub name: ReplicantName,
    pub namespace: NamespaceId,
    #[serde(default)]
    pub opts: ReplicantOpts,
    /// Kept as raw values so a batch carrying an unknown method can be
    /// rejected with the authoritative snapshot instead of a bare decode
    /// failure.
    pub operations: Vec<Value>,
    pub revision: u64,
    #[serde(rename = "schemaSum", default, skip_serializing_if = "Option::is_none")]
    pub schema_sum: Option<String>,
}

impl ProposeRequest {
    pub fn decode_operations(&self) -> Result<Vec<Operation>, serde_json::Error> {
        self.operations
            .iter()
            .map(|raw| serde_json::from_value(raw.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub name: ReplicantName,
    pub namespace: NamespaceId,
}

/// Broadcast to the namespace room after each flushed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsBroadcast {
    pub name: ReplicantName,
    pub namespace: NamespaceId,
    pub revision: u64,
    pub operations: Vec<Operation>,
}

/// Daemon identity, served by `ping` and written to `daemon.meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonInfo {
    pub version: String,
    pub protocol_version: u32,
    pub pid: u32,
}
