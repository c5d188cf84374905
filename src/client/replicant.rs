//! Client-side replicant: a mirror of the server state.
//!
//! Lifecycle: `undeclared → declared`. While undeclared, reads see the
//! provisional default and writes buffer into the pending queue; the
//! declaration handshake installs the authoritative snapshot and replays
//! the buffer as one proposal. While declared, writes apply optimistically
//! and travel as proposals carrying the last known revision and
//! `schemaSum`; a rejection reverts to the server's snapshot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use super::ClientError;
use super::socket::SocketInner;
use crate::api::{
    DeclareRequest, OperationsBroadcast, ProposeRequest, ReadRequest, RejectReason, ReplicantOpts,
    SnapshotReply, events,
};
use crate::change::{ChangeBus, ChangeEvent, ChangeSubscription};
use crate::core::{
    ApplyError, MutationRecorder, NamespaceId, Operation, ReplicantName, ValuePath,
    apply_operation,
};
use crate::schema::ReplicantSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclarationState {
    Undeclared,
    Declared,
}

struct ReplicantState {
    state: DeclarationState,
    value: Option<Value>,
    revision: u64,
    schema: Option<ReplicantSchema>,
    schema_sum: Option<String>,
    pending: Vec<Operation>,
    reconciling: bool,
    changes: ChangeBus,
}

pub(super) struct ReplicantShared {
    namespace: NamespaceId,
    name: ReplicantName,
    opts: ReplicantOpts,
    /// Serializes declarations and proposals; never held across a state
    /// lock acquisition by the reader thread.
    send_lock: Mutex<()>,
    state: Mutex<ReplicantState>,
}

impl ReplicantShared {
    pub(super) fn new(
        namespace: NamespaceId,
        name: ReplicantName,
        opts: ReplicantOpts,
        change_queue: usize,
    ) -> Self {
        let provisional = opts.default_value.clone();
        Self {
            namespace,
            name,
            opts,
            send_lock: Mutex::new(()),
            state: Mutex::new(ReplicantState {
                state: DeclarationState::Undeclared,
                value: provisional,
                revision: 0,
                schema: None,
                schema_sum: None,
                pending: Vec::new(),
                reconciling: false,
                changes: ChangeBus::new(change_queue),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReplicantState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn mark_undeclared(&self) {
        let mut st = self.lock();
        st.state = DeclarationState::Undeclared;
    }

    /// Inbound `replicant:operations` from the namespace room, on the
    /// reader thread.
    pub(super) fn apply_broadcast(
        self: &Arc<Self>,
        socket: &Arc<SocketInner>,
        broadcast: OperationsBroadcast,
    ) {
        let mut st = self.lock();
        if st.state != DeclarationState::Declared {
            return;
        }
        // Stale batches are discarded.
        if broadcast.revision <= st.revision {
            return;
        }
        if broadcast.revision == st.revision + 1 {
            let mut scratch = st.value.clone();
            let applied = broadcast
                .operations
                .iter()
                .try_for_each(|op| apply_operation(&mut scratch, op));
            if applied.is_ok() {
                let old_value = std::mem::replace(&mut st.value, scratch);
                st.revision = broadcast.revision;
                let event = ChangeEvent {
                    value: st.value.clone(),
                    old_value,
                    revision: st.revision,
                    operations: broadcast.operations,
                };
                st.changes.publish(event);
                return;
            }
            tracing::warn!(
                namespace = %self.namespace, name = %self.name,
                "inbound batch failed to apply, reconciling"
            );
        }

        // Revision gap (or divergence): full read + reconcile, off the
        // reader thread so the ack can still be delivered.
        if st.reconciling {
            return;
        }
        st.reconciling = true;
        drop(st);

        let shared = Arc::clone(self);
        let socket = Arc::clone(socket);
        let target_revision = broadcast.revision;
        std::thread::spawn(move || shared.reconcile(&socket, target_revision));
    }

    fn reconcile(&self, socket: &Arc<SocketInner>, target_revision: u64) {
        let request = ReadRequest {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        };
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(_) => return,
        };
        let result = socket.rpc(events::READ, payload);

        let mut st = self.lock();
        st.reconciling = false;
        match result {
            Ok(value) => {
                let old_value = std::mem::replace(&mut st.value, Some(value));
                st.revision = target_revision;
                st.pending.clear();
                let event = ChangeEvent {
                    value: st.value.clone(),
                    old_value,
                    revision: st.revision,
                    operations: Vec::new(),
                };
                st.changes.publish(event);
            }
            Err(err) => {
                tracing::warn!(
                    namespace = %self.namespace, name = %self.name, %err,
                    "reconcile read failed"
                );
            }
        }
    }
}

/// Handle to a client replicant. Cheap to clone; all handles share the
/// same mirror state.
pub struct ClientReplicant {
    socket: Arc<SocketInner>,
    shared: Arc<ReplicantShared>,
}

impl Clone for ClientReplicant {
    fn clone(&self) -> Self {
        Self {
            socket: Arc::clone(&self.socket),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl ClientReplicant {
    pub(super) fn new(socket: Arc<SocketInner>, shared: Arc<ReplicantShared>) -> Self {
        Self { socket, shared }
    }

    pub fn namespace(&self) -> &NamespaceId {
        &self.shared.namespace
    }

    pub fn name(&self) -> &ReplicantName {
        &self.shared.name
    }

    pub fn value(&self) -> Option<Value> {
        self.shared.lock().value.clone()
    }

    pub fn revision(&self) -> u64 {
        self.shared.lock().revision
    }

    pub fn is_declared(&self) -> bool {
        self.shared.lock().state == DeclarationState::Declared
    }

    /// Subscribe to `change` events. On an already-declared replicant
    /// the subscriber immediately receives the current value.
    pub fn subscribe(&self) -> ChangeSubscription {
        let mut st = self.shared.lock();
        let snapshot = (st.state == DeclarationState::Declared).then(|| ChangeEvent {
            value: st.value.clone(),
            old_value: None,
            revision: st.revision,
            operations: Vec::new(),
        });
        st.changes.subscribe_with(snapshot)
    }

    /// Run a batch of mutations as one unit: one task, one proposal.
    /// The batch validates locally against the schema before anything is
    /// committed or sent.
    pub fn transaction<R>(
        &self,
        f: impl FnOnce(&mut MutationRecorder<'_>) -> Result<R, ApplyError>,
    ) -> Result<R, ClientError> {
        let _send = self
            .shared
            .send_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (output, declared) = {
            let mut st = self.shared.lock();
            let mut scratch = st.value.clone();
            let mut recorded = Vec::new();
            let output = f(&mut MutationRecorder::new(&mut scratch, &mut recorded))?;
            if recorded.is_empty() {
                return Ok(output);
            }
            if let Some(schema) = &st.schema {
                schema
                    .validate(scratch.as_ref())
                    .map_err(|violations| ClientError::ValueInvalid { violations })?;
            }
            // Optimistic local apply; subscribers see the change now.
            let old_value = std::mem::replace(&mut st.value, scratch);
            st.pending.extend(recorded.iter().cloned());
            let event = ChangeEvent {
                value: st.value.clone(),
                old_value,
                revision: st.revision,
                operations: recorded,
            };
            st.changes.publish(event);
            (output, st.state == DeclarationState::Declared)
        };

        if declared {
            self.propose_pending();
        }
        Ok(output)
    }

    pub fn assign(&self, value: Option<Value>) -> Result<bool, ClientError> {
        self.transaction(|m| m.assign(value))
    }

    pub fn set(&self, path: &ValuePath, prop: &str, value: Value) -> Result<(), ClientError> {
        self.transaction(|m| m.set(path, prop, value))
    }

    pub fn remove(&self, path: &ValuePath, prop: &str) -> Result<(), ClientError> {
        self.transaction(|m| m.remove(path, prop))
    }

    pub fn splice(
        &self,
        path: &ValuePath,
        start: i64,
        delete_count: u64,
        items: Vec<Value>,
    ) -> Result<(), ClientError> {
        self.transaction(|m| m.splice(path, start, delete_count, items))
    }

    pub fn push(&self, path: &ValuePath, items: Vec<Value>) -> Result<(), ClientError> {
        self.transaction(|m| m.push(path, items))
    }

    pub fn pop(&self, path: &ValuePath) -> Result<Option<Value>, ClientError> {
        self.transaction(|m| m.pop(path))
    }

    pub fn shift(&self, path: &ValuePath) -> Result<Option<Value>, ClientError> {
        self.transaction(|m| m.shift(path))
    }

    pub fn unshift(&self, path: &ValuePath, items: Vec<Value>) -> Result<(), ClientError> {
        self.transaction(|m| m.unshift(path, items))
    }

    pub fn reverse(&self, path: &ValuePath) -> Result<(), ClientError> {
        self.transaction(|m| m.reverse(path))
    }

    pub fn sort(&self, path: &ValuePath) -> Result<(), ClientError> {
        self.transaction(|m| m.sort(path))
    }

    pub fn copy_within(
        &self,
        path: &ValuePath,
        target: i64,
        start: i64,
        end: Option<i64>,
    ) -> Result<(), ClientError> {
        self.transaction(|m| m.copy_within(path, target, start, end))
    }

    pub fn fill(
        &self,
        path: &ValuePath,
        value: Value,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<(), ClientError> {
        self.transaction(|m| m.fill(path, value, start, end))
    }

    /// Declaration handshake: install the authoritative snapshot, then
    /// replay any buffered operations as one fresh proposal.
    pub(super) fn declare_and_replay(&self) -> Result<(), ClientError> {
        let _send = self
            .shared
            .send_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        {
            let st = self.shared.lock();
            if st.state == DeclarationState::Declared {
                return Ok(());
            }
        }

        let request = DeclareRequest {
            name: self.shared.name.clone(),
            namespace: self.shared.namespace.clone(),
            opts: self.shared.opts.clone(),
        };
        let payload = serde_json::to_value(&request).map_err(ClientError::Json)?;
        let reply = self.socket.rpc(events::DECLARE, payload)?;
        let reply: SnapshotReply =
            serde_json::from_value(reply).map_err(ClientError::Json)?;

        if let Some(reason) = reply.reject_reason {
            return Err(ClientError::DeclarationRejected {
                reason: reason.as_str().to_string(),
            });
        }

        let buffered = {
            let mut st = self.shared.lock();
            let old_value = std::mem::replace(&mut st.value, reply.value);
            st.revision = reply.revision.unwrap_or(0);
            st.schema_sum = reply.schema_sum;
            st.schema = reply
                .schema
                .and_then(|schema| match ReplicantSchema::from_resolved(schema) {
                    Ok(schema) => Some(schema),
                    Err(err) => {
                        tracing::warn!(
                            namespace = %self.shared.namespace, name = %self.shared.name, %err,
                            "declared schema failed to compile, validating server-side only"
                        );
                        None
                    }
                });
            st.state = DeclarationState::Declared;
            let event = ChangeEvent {
                value: st.value.clone(),
                old_value,
                revision: st.revision,
                operations: Vec::new(),
            };
            st.changes.publish(event);
            !st.pending.is_empty()
        };

        if buffered {
            self.propose_pending();
        }
        Ok(())
    }

    /// Send queued operations as one proposal. Must run under the send
    /// lock. Delivery failures leave the queue buffered for the next
    /// declaration; rejections adopt the authoritative snapshot.
    fn propose_pending(&self) {
        let (payload, proposed) = {
            let st = self.shared.lock();
            if st.pending.is_empty() {
                return;
            }
            let operations: Vec<Value> = st
                .pending
                .iter()
                .filter_map(|op| serde_json::to_value(op).ok())
                .collect();
            let proposed = st.pending.len();
            let request = ProposeRequest {
                name: self.shared.name.clone(),
                namespace: self.shared.namespace.clone(),
                opts: self.shared.opts.clone(),
                operations,
                revision: st.revision,
                schema_sum: st.schema_sum.clone(),
            };
            match serde_json::to_value(&request) {
                Ok(payload) => (payload, proposed),
                Err(_) => return,
            }
        };

        let reply = match self.socket.rpc(events::PROPOSE_OPERATIONS, payload) {
            Ok(reply) => reply,
            Err(err) => {
                // Unacknowledged proposals are treated as rejected; the
                // operations stay buffered for the reconnect replay.
                tracing::warn!(
                    namespace = %self.shared.namespace, name = %self.shared.name, %err,
                    "proposal undelivered, operations buffered"
                );
                return;
            }
        };
        let reply: SnapshotReply = match serde_json::from_value(reply) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(%err, "malformed proposal reply");
                return;
            }
        };

        let mut st = self.shared.lock();
        match reply.reject_reason {
            None => {
                // Accepted: adopt the authoritative snapshot, then lay
                // any operations staged after this proposal back on top.
                // A reconcile may have cleared the queue while the ack
                // was in flight.
                st.value = reply.value;
                st.revision = reply.revision.unwrap_or(st.revision + 1);
                let at = proposed.min(st.pending.len());
                let remainder: Vec<Operation> = st.pending.split_off(at);
                st.pending = Vec::new();
                for op in remainder {
                    let mut scratch = st.value.clone();
                    if apply_operation(&mut scratch, &op).is_ok() {
                        st.value = scratch;
                        st.pending.push(op);
                    }
                }
            }
            Some(reason) => {
                tracing::debug!(
                    namespace = %self.shared.namespace, name = %self.shared.name,
                    reason = reason.as_str(),
                    "proposal rejected, adopting authoritative snapshot"
                );
                if reason == RejectReason::SchemaMismatch {
                    st.schema_sum = reply.schema_sum;
                    st.schema = reply
                        .schema
                        .and_then(|schema| ReplicantSchema::from_resolved(schema).ok());
                }
                let old_value = std::mem::replace(&mut st.value, reply.value);
                if let Some(revision) = reply.revision {
                    st.revision = revision;
                }
                st.pending.clear();
                let event = ChangeEvent {
                    value: st.value.clone(),
                    old_value,
                    revision: st.revision,
                    operations: Vec::new(),
                };
                st.changes.publish(event);
            }
        }
    }
}
