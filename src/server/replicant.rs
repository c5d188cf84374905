//! Server-side replicant: the authoritative state holder.
//!
//! All writes funnel through `mutate`, which stages edits against a
//! scratch copy, validates the result against the schema, and only then
//! commits and queues the recorded operations. The first mutation after
//! an empty queue snapshots the old value for the eventual `change`
//! event; `flush` drains the queue into exactly one revision step.

use std::mem;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::api::{ReplicantOpts, SnapshotReply};
use crate::change::{ChangeBus, ChangeEvent, ChangeSubscription};
use crate::core::{
    ApplyError, MutationRecorder, NamespaceId, Operation, ReplicantName, apply_operation,
};
use crate::schema::{ReplicantSchema, Violation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicantOptions {
    pub persistent: bool,
    pub persistence_interval: Duration,
}

impl ReplicantOptions {
    pub fn from_wire(opts: &ReplicantOpts, default_interval: Duration) -> Self {
        Self {
            persistent: opts.persistent.unwrap_or(true),
            persistence_interval: opts
                .persistence_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(default_interval),
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("value failed schema validation: {}", format_violations(.violations))]
    ValueInvalid { violations: Vec<Violation> },
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One flushed batch, ready for broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushOutcome {
    pub revision: u64,
    pub operations: Vec<Operation>,
}

pub struct ServerReplicant {
    namespace: NamespaceId,
    name: ReplicantName,
    options: ReplicantOptions,
    schema: Option<ReplicantSchema>,
    value: Option<Value>,
    revision: u64,
    pending: Vec<Operation>,
    // Outer Some while a mutation window is open this tick.
    old_value: Option<Option<Value>>,
    changes: ChangeBus,
}

impl ServerReplicant {
    pub fn new(
        namespace: NamespaceId,
        name: ReplicantName,
        options: ReplicantOptions,
        schema: Option<ReplicantSchema>,
        change_queue: usize,
    ) -> Self {
        Self {
            namespace,
            name,
            options,
            schema,
            value: None,
            revision: 0,
            pending: Vec::new(),
            old_value: None,
            changes: ChangeBus::new(change_queue),
        }
    }

    pub fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    pub fn name(&self) -> &ReplicantName {
        &self.name
    }

    pub fn options(&self) -> &ReplicantOptions {
        &self.options
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn schema(&self) -> Option<&ReplicantSchema> {
        self.schema.as_ref()
    }

    pub fn schema_sum(&self) -> Option<&str> {
        self.schema.as_ref().map(ReplicantSchema::digest)
    }

    pub fn validate(&self, value: Option<&Value>) -> Result<(), WriteError> {
        match &self.schema {
            Some(schema) => schema
                .validate(value)
                .map_err(|violations| WriteError::ValueInvalid { violations }),
            None => Ok(()),
        }
    }

    /// Install the initial value at declaration time. No operation is
    /// recorded and the revision stays put; the caller has already
    /// validated or synthesized the value.
    pub fn install(&mut self, value: Option<Value>) {
        self.value = value;
    }

    /// Run a batch of mutations as one unit. The closure edits a scratch
    /// copy through the recorder; the result must validate before commit.
    /// On any error nothing is committed and nothing is recorded.
    pub fn mutate<R>(
        &mut self,
        f: impl FnOnce(&mut MutationRecorder<'_>) -> Result<R, ApplyError>,
    ) -> Result<R, WriteError> {
        let mut scratch = self.value.clone();
        let mut recorded = Vec::new();
        let output = f(&mut MutationRecorder::new(&mut scratch, &mut recorded))?;
        if recorded.is_empty() {
            return Ok(output);
        }
        self.validate(scratch.as_ref())?;
        self.begin_mutation_window();
        self.value = scratch;
        self.pending.extend(recorded);
        Ok(output)
    }

    /// Wholesale assignment. Returns `false` when the new value equals
    /// the current one (no operation, no change).
    pub fn assign(&mut self, value: Option<Value>) -> Result<bool, WriteError> {
        // Validation precedes the write so a rejected assignment leaves
        // the pre-state exactly.
        self.validate(value.as_ref())?;
        self.mutate(|m| m.assign(value))
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain the queue into one revision step. At most one broadcast and
    /// one `change` per tick, regardless of how many mutations coalesced.
    pub fn flush(&mut self) -> Option<FlushOutcome> {
        if self.pending.is_empty() {
            return None;
        }
        self.revision += 1;
        let operations = mem::take(&mut self.pending);
        let old_value = self.old_value.take().flatten();
        self.changes.publish(ChangeEvent {
            value: self.value.clone(),
            old_value,
            revision: self.revision,
            operations: operations.clone(),
        });
        Some(FlushOutcome {
            revision: self.revision,
            operations,
        })
    }

    /// Apply an accepted remote batch: no recording, one revision bump,
    /// one `change`. The batch either applies fully and validates, or
    /// the state is untouched.
    pub fn apply_remote(&mut self, operations: &[Operation]) -> Result<u64, WriteError> {
        let mut scratch = self.value.clone();
        for op in operations {
            apply_operation(&mut scratch, op)?;
        }
        self.validate(scratch.as_ref())?;

        let old_value = mem::replace(&mut self.value, scratch);
        self.revision += 1;
        self.changes.publish(ChangeEvent {
            value: self.value.clone(),
            old_value,
            revision: self.revision,
            operations: operations.to_vec(),
        });
        Ok(self.revision)
    }

    /// Subscribe to `change` events. The subscriber immediately receives
    /// a synthetic event carrying the current value.
    pub fn subscribe(&mut self) -> ChangeSubscription {
        let snapshot = ChangeEvent {
            value: self.value.clone(),
            old_value: None,
            revision: self.revision,
            operations: Vec::new(),
        };
        self.changes.subscribe_with(Some(snapshot))
    }

    /// The declaration reply: value, revision, and schema when present.
    pub fn snapshot_reply(&self) -> SnapshotReply {
        SnapshotReply {
            value: self.value.clone(),
            revision: Some(self.revision),
            schema: self.schema.as_ref().map(|s| s.resolved().clone()),
            schema_sum: self.schema_sum().map(String::from),
            reject_reason: None,
        }
    }

    fn begin_mutation_window(&mut self) {
        if self.pending.is_empty() && self.old_value.is_none() {
            self.old_value = Some(self.value.clone());
        }
    }
}
