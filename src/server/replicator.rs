//! The Replicator: process-wide registry and broadcast hub.
//!
//! Owns every server-side replicant, the per-namespace stores, the room
//! registry, and the save scheduler. All methods run on the state
//! thread, which is the total-ordering authority: whichever proposal
//! arrives first and passes the schema/revision checks wins.

use std::collections::BTreeMap;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use serde_json::Value;
use thiserror::Error;

use crate::api::{
    DeclareRequest, OperationsBroadcast, ProposeRequest, ReadRequest, RejectReason, ReplicantOpts,
    SnapshotReply, events,
};
use crate::config::Config;
use crate::core::{NamespaceId, ReplicantName};
use crate::schema::ReplicantSchema;
use crate::server::replicant::{ReplicantOptions, ServerReplicant, WriteError};
use crate::server::saver::{SaveKey, SaveScheduler};
use crate::server::store::{NamespaceStore, decode_snapshot, encode_snapshot, replicant_key};
use crate::transport::{AccessPolicy, AllowAll, ConnId, Envelope, Rooms, encode_frame};

#[derive(Debug, Error)]
#[error("replicant {namespace}/{name} is not declared")]
pub struct NotDeclared {
    pub namespace: NamespaceId,
    pub name: ReplicantName,
}

/// Writer handle for one connection. The stream clone exists so a
/// protocol violation can sever the socket, not just stop replying.
pub struct ConnHandle {
    pub sender: Sender<String>,
    pub stream: Option<UnixStream>,
}

pub struct Replicator {
    limits: crate::config::Limits,
    default_interval: Duration,
    store_root: PathBuf,
    schema_root: Option<PathBuf>,
    declared: BTreeMap<NamespaceId, BTreeMap<ReplicantName, ServerReplicant>>,
    stores: BTreeMap<NamespaceId, NamespaceStore>,
    saver: SaveScheduler,
    rooms: Rooms,
    conns: BTreeMap<ConnId, ConnHandle>,
    policy: Box<dyn AccessPolicy>,
}

impl Replicator {
    pub fn new(config: &Config, schema_root: Option<PathBuf>) -> Self {
        Self {
            limits: config.limits.clone(),
            default_interval: config.persistence.default_interval(),
            store_root: config.persistence.root_dir(),
            schema_root,
            declared: BTreeMap::new(),
            stores: BTreeMap::new(),
            saver: SaveScheduler::new(),
            rooms: Rooms::new(),
            conns: BTreeMap::new(),
            policy: Box::new(AllowAll),
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn allow(&self, event: &str, conn: ConnId) -> bool {
        self.policy.allow(event, conn)
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    pub fn connect(&mut self, conn: ConnId, handle: ConnHandle) {
        self.conns.insert(conn, handle);
    }

    pub fn disconnect(&mut self, conn: ConnId) {
        if let Some(handle) = self.conns.remove(&conn)
            && let Some(stream) = handle.stream
        {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.rooms.leave_all(conn);
    }

    pub fn send_to(&self, conn: ConnId, envelope: &Envelope) {
        if let Some(handle) = self.conns.get(&conn)
            && let Ok(frame) = encode_frame(envelope)
        {
            let _ = handle.sender.send(frame);
        }
    }

    // ------------------------------------------------------------------
    // Declaration
    // ------------------------------------------------------------------

    /// Wire declaration. `schemaPath` in the options is ignored; the
    /// schema is looked up by server-side convention.
    pub fn declare_remote(&mut self, conn: ConnId, request: DeclareRequest) -> SnapshotReply {
        match self.declare_inner(&request.namespace, &request.name, &request.opts, false) {
            Ok(reply) => {
                self.rooms.join(&request.namespace.room(), conn);
                reply
            }
            Err(err) => {
                tracing::warn!(
                    namespace = %request.namespace, name = %request.name, %err,
                    "declaration rejected"
                );
                SnapshotReply {
                    reject_reason: Some(RejectReason::ValueInvalid),
                    ..SnapshotReply::default()
                }
            }
        }
    }

    /// In-process declaration (extensions, tests). `schemaPath` is
    /// honored here: local code owns its schema files.
    pub fn declare_local(
        &mut self,
        namespace: &NamespaceId,
        name: &ReplicantName,
        opts: &ReplicantOpts,
    ) -> Result<&mut ServerReplicant, WriteError> {
        self.declare_inner(namespace, name, opts, true)?;
        Ok(self
            .declared
            .get_mut(namespace)
            .and_then(|reps| reps.get_mut(name))
            .expect("replicant exists after successful declare"))
    }

    fn declare_inner(
        &mut self,
        namespace: &NamespaceId,
        name: &ReplicantName,
        opts: &ReplicantOpts,
        trust_schema_path: bool,
    ) -> Result<SnapshotReply, WriteError> {
        if let Some(rep) = self
            .declared
            .get(namespace)
            .and_then(|reps| reps.get(name))
        {
            // Idempotent: later declarations never reset value or
            // revision, and their options are ignored.
            return Ok(rep.snapshot_reply());
        }

        let options = ReplicantOptions::from_wire(opts, self.default_interval);
        let schema_path = if trust_schema_path {
            opts.schema_path.as_deref()
        } else {
            None
        };
        let schema = self.load_schema(namespace, name, schema_path);

        let mut rep = ServerReplicant::new(
            namespace.clone(),
            name.clone(),
            options,
            schema,
            self.limits.change_queue_events,
        );

        let mut initial: Option<Option<Value>> = None;
        if rep.options().persistent {
            match self.load_persisted(namespace, name) {
                Some(persisted) => match rep.validate(persisted.as_ref()) {
                    Ok(()) => initial = Some(persisted),
                    Err(err) => {
                        tracing::info!(
                            %namespace, %name, %err,
                            "persisted value rejected by schema, using defaults"
                        );
                    }
                },
                None => {}
            }
        }

        if initial.is_none() {
            if let Some(default) = &opts.default_value {
                rep.validate(Some(default))?;
                initial = Some(Some(default.clone()));
            } else if let Some(schema) = rep.schema() {
                initial = Some(Some(schema.default_value()));
            }
        }

        rep.install(initial.flatten());
        tracing::debug!(
            %namespace, %name,
            revision = rep.revision(),
            has_schema = rep.schema().is_some(),
            "replicant declared"
        );

        let reply = rep.snapshot_reply();
        self.declared
            .entry(namespace.clone())
            .or_default()
            .insert(name.clone(), rep);
        Ok(reply)
    }

    fn load_schema(
        &self,
        namespace: &NamespaceId,
        name: &ReplicantName,
        explicit: Option<&str>,
    ) -> Option<ReplicantSchema> {
        let path = match explicit {
            Some(p) => PathBuf::from(p),
            None => {
                let root = self.schema_root.as_ref()?;
                let path = root
                    .join(namespace.as_str())
                    .join(format!("{name}.json"));
                if !path.exists() {
                    return None;
                }
                path
            }
        };
        match ReplicantSchema::load(&path) {
            Ok(schema) => Some(schema),
            Err(err) => {
                // Load failure is not fatal: run unvalidated.
                tracing::warn!(
                    %namespace, %name, path = %path.display(), %err,
                    "schema load failed, replicant runs without validation"
                );
                None
            }
        }
    }

    fn load_persisted(
        &mut self,
        namespace: &NamespaceId,
        name: &ReplicantName,
    ) -> Option<Option<Value>> {
        let store = self.store(namespace)?;
        let record = match store.get_item(&replicant_key(name)) {
            Ok(record) => record?,
            Err(err) => {
                tracing::warn!(%namespace, %name, %err, "persisted snapshot unreadable");
                return None;
            }
        };
        match decode_snapshot(&record) {
            Some(value) => Some(value),
            None => {
                tracing::warn!(%namespace, %name, "persisted snapshot corrupt, ignoring");
                None
            }
        }
    }

    fn store(&mut self, namespace: &NamespaceId) -> Option<&NamespaceStore> {
        if !self.stores.contains_key(namespace) {
            match NamespaceStore::open(&self.store_root, namespace) {
                Ok(store) => {
                    self.stores.insert(namespace.clone(), store);
                }
                Err(err) => {
                    tracing::error!(%namespace, %err, "namespace store unavailable");
                    return None;
                }
            }
        }
        self.stores.get(namespace)
    }

    // ------------------------------------------------------------------
    // Proposals and reads
    // ------------------------------------------------------------------

    pub fn handle_propose(
        &mut self,
        conn: Option<ConnId>,
        request: ProposeRequest,
    ) -> Result<SnapshotReply, NotDeclared> {
        let max_ops = self.limits.max_operations_per_proposal;
        let rep = self
            .declared
            .get_mut(&request.namespace)
            .and_then(|reps| reps.get_mut(&request.name))
            .ok_or_else(|| NotDeclared {
                namespace: request.namespace.clone(),
                name: request.name.clone(),
            })?;

        // Schema check precedes the revision check: a client on a stale
        // schema needs the new schema more than a revision repair.
        if request.schema_sum.as_deref() != rep.schema_sum() {
            tracing::debug!(
                namespace = %request.namespace, name = %request.name,
                "proposal rejected: schema mismatch"
            );
            let mut reply = rep.snapshot_reply();
            reply.reject_reason = Some(RejectReason::SchemaMismatch);
            return Ok(reply);
        }

        if request.revision != rep.revision() {
            tracing::debug!(
                namespace = %request.namespace, name = %request.name,
                proposed = request.revision, current = rep.revision(),
                "proposal rejected: revision mismatch"
            );
            return Ok(SnapshotReply {
                value: rep.value().cloned(),
                revision: Some(rep.revision()),
                reject_reason: Some(RejectReason::RevisionMismatch),
                ..SnapshotReply::default()
            });
        }

        if request.operations.len() > max_ops {
            let mut reply = rep.snapshot_reply();
            reply.reject_reason = Some(RejectReason::OperationInvalid);
            return Ok(reply);
        }

        let operations = match request.decode_operations() {
            Ok(operations) => operations,
            Err(err) => {
                tracing::warn!(
                    namespace = %request.namespace, name = %request.name, %err,
                    "proposal rejected: unknown operation"
                );
                let mut reply = rep.snapshot_reply();
                reply.reject_reason = Some(RejectReason::UnknownOperation);
                return Ok(reply);
            }
        };

        match rep.apply_remote(&operations) {
            Ok(revision) => {
                tracing::debug!(
                    namespace = %request.namespace, name = %request.name,
                    revision, operations = operations.len(),
                    "proposal accepted"
                );
                let reply = rep.snapshot_reply();
                let persistent = rep.options().persistent;
                let interval = rep.options().persistence_interval;
                self.broadcast_operations(
                    &request.namespace,
                    &request.name,
                    revision,
                    operations,
                    conn,
                );
                if persistent {
                    self.request_save(&request.namespace, &request.name, interval);
                }
                Ok(reply)
            }
            Err(err) => {
                let reason = match &err {
                    WriteError::ValueInvalid { .. } => RejectReason::ValueInvalid,
                    WriteError::Apply(_) => RejectReason::OperationInvalid,
                };
                tracing::warn!(
                    namespace = %request.namespace, name = %request.name, %err,
                    "proposal rejected"
                );
                let rep = self
                    .declared
                    .get(&request.namespace)
                    .and_then(|reps| reps.get(&request.name))
                    .expect("replicant still declared");
                let mut reply = rep.snapshot_reply();
                reply.reject_reason = Some(reason);
                Ok(reply)
            }
        }
    }

    /// `replicant:read`: the current value, no subscription established.
    pub fn handle_read(&self, request: &ReadRequest) -> Value {
        self.declared
            .get(&request.namespace)
            .and_then(|reps| reps.get(&request.name))
            .and_then(|rep| rep.value().cloned())
            .unwrap_or(Value::Null)
    }

    pub fn replicant_mut(
        &mut self,
        namespace: &NamespaceId,
        name: &ReplicantName,
    ) -> Option<&mut ServerReplicant> {
        self.declared
            .get_mut(namespace)
            .and_then(|reps| reps.get_mut(name))
    }

    // ------------------------------------------------------------------
    // Flush and broadcast
    // ------------------------------------------------------------------

    /// End-of-tick: flush every replicant with queued local mutations.
    /// Each flush produces exactly one broadcast and one save request.
    pub fn flush_pending(&mut self) {
        let mut flushed = Vec::new();
        for (namespace, reps) in &mut self.declared {
            for (name, rep) in reps {
                if let Some(outcome) = rep.flush() {
                    tracing::debug!(
                        %namespace, %name,
                        revision = outcome.revision,
                        operations = outcome.operations.len(),
                        "flushed local mutations"
                    );
                    flushed.push((
                        namespace.clone(),
                        name.clone(),
                        outcome,
                        rep.options().persistent,
                        rep.options().persistence_interval,
                    ));
                }
            }
        }
        for (namespace, name, outcome, persistent, interval) in flushed {
            self.broadcast_operations(&namespace, &name, outcome.revision, outcome.operations, None);
            if persistent {
                self.request_save(&namespace, &name, interval);
            }
        }
    }

    fn broadcast_operations(
        &mut self,
        namespace: &NamespaceId,
        name: &ReplicantName,
        revision: u64,
        operations: Vec<crate::core::Operation>,
        except: Option<ConnId>,
    ) {
        let members = self.rooms.members(&namespace.room(), except);
        if members.is_empty() {
            return;
        }
        let payload = OperationsBroadcast {
            name: name.clone(),
            namespace: namespace.clone(),
            revision,
            operations,
        };
        let Ok(payload) = serde_json::to_value(&payload) else {
            return;
        };
        let envelope = Envelope::new(events::OPERATIONS, payload);
        let Ok(frame) = encode_frame(&envelope) else {
            return;
        };
        let mut stale = Vec::new();
        for conn in members {
            match self.conns.get(&conn) {
                Some(handle) => {
                    if handle.sender.send(frame.clone()).is_err() {
                        stale.push(conn);
                    }
                }
                None => stale.push(conn),
            }
        }
        for conn in stale {
            self.disconnect(conn);
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    fn request_save(&mut self, namespace: &NamespaceId, name: &ReplicantName, interval: Duration) {
        self.saver.request_save(
            SaveKey {
                namespace: namespace.clone(),
                name: name.clone(),
            },
            interval,
            Instant::now(),
        );
    }

    pub fn next_save_deadline(&mut self) -> Option<Instant> {
        self.saver.next_deadline()
    }

    pub fn run_due_saves(&mut self, now: Instant) {
        for key in self.saver.drain_due(now) {
            self.save_one(&key, now);
        }
    }

    fn save_one(&mut self, key: &SaveKey, now: Instant) {
        let Some(rep) = self
            .declared
            .get(&key.namespace)
            .and_then(|reps| reps.get(&key.name))
        else {
            return;
        };
        let record = encode_snapshot(rep.value());
        let interval = rep.options().persistence_interval;
        let item = replicant_key(&key.name);

        let result = match self.store(&key.namespace) {
            Some(store) => store.set_item(&item, &record),
            None => return,
        };
        match result {
            Ok(()) => {
                tracing::debug!(
                    namespace = %key.namespace, name = %key.name,
                    bytes = record.len(),
                    "snapshot saved"
                );
                self.saver.mark_saved(key, now);
            }
            Err(err) => {
                if err.transience().is_retryable() {
                    tracing::warn!(
                        namespace = %key.namespace, name = %key.name, %err,
                        "snapshot write failed, retrying"
                    );
                    self.saver.request_retry(key.clone(), interval, now);
                } else {
                    // Abandoned for this tick; the next mutation
                    // schedules a fresh attempt.
                    tracing::error!(
                        namespace = %key.namespace, name = %key.name, %err,
                        "snapshot write failed"
                    );
                }
            }
        }
    }

    /// Final snapshot for every persistent replicant, at shutdown.
    pub fn save_all(&mut self) {
        let keys: Vec<SaveKey> = self
            .declared
            .iter()
            .flat_map(|(namespace, reps)| {
                reps.iter()
                    .filter(|(_, rep)| rep.options().persistent)
                    .map(|(name, _)| SaveKey {
                        namespace: namespace.clone(),
                        name: name.clone(),
                    })
            })
            .collect();
        let now = Instant::now();
        for key in keys {
            self.save_one(&key, now);
        }
    }
}
