//! Client socket: connect, RPC with `msgid`-matched acks, broadcast
//! routing, reconnect with re-declaration.

use std::collections::HashMap;
use std::io::BufReader;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::channel::Sender;
use serde_json::Value;

use super::ClientError;
use super::replicant::{ClientReplicant, ReplicantShared};
use crate::api::{DaemonInfo, OperationsBroadcast, ReadRequest, ReplicantOpts, events};
use crate::config::Limits;
use crate::core::{NamespaceId, ReplicantName};
use crate::transport::{Envelope, IpcError, read_frame, write_frame};

pub struct ClientSocket {
    inner: Arc<SocketInner>,
}

pub(super) struct SocketInner {
    path: PathBuf,
    pub(super) limits: Limits,
    writer: Mutex<Option<UnixStream>>,
    /// Bumped per (re)connect so a stale reader thread cannot tear down
    /// the connection that replaced its own.
    generation: AtomicU64,
    next_msgid: AtomicU64,
    pending_acks: Mutex<HashMap<u64, Sender<Value>>>,
    replicants: Mutex<HashMap<(NamespaceId, ReplicantName), Arc<ReplicantShared>>>,
}

impl ClientSocket {
    pub fn connect(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        Self::connect_with(path, Limits::default())
    }

    pub fn connect_with(path: impl Into<PathBuf>, limits: Limits) -> Result<Self, ClientError> {
        let path = path.into();
        let inner = Arc::new(SocketInner {
            path,
            limits,
            writer: Mutex::new(None),
            generation: AtomicU64::new(0),
            next_msgid: AtomicU64::new(1),
            pending_acks: Mutex::new(HashMap::new()),
            replicants: Mutex::new(HashMap::new()),
        });
        inner.open_stream()?;
        Ok(Self { inner })
    }

    /// Obtain (declaring if needed) the replicant handle for
    /// `(namespace, name)`. Repeated calls return handles over the same
    /// shared state.
    pub fn replicant(
        &self,
        namespace: NamespaceId,
        name: ReplicantName,
        opts: ReplicantOpts,
    ) -> Result<ClientReplicant, ClientError> {
        let key = (namespace.clone(), name.clone());
        let shared = {
            let mut replicants = self.inner.lock_replicants();
            replicants
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(ReplicantShared::new(
                        namespace,
                        name,
                        opts,
                        self.inner.limits.change_queue_events,
                    ))
                })
                .clone()
        };
        let handle = ClientReplicant::new(Arc::clone(&self.inner), shared);
        handle.declare_and_replay()?;
        Ok(handle)
    }

    /// One-shot `replicant:read`; establishes no subscription.
    pub fn read(
        &self,
        namespace: NamespaceId,
        name: ReplicantName,
    ) -> Result<Value, ClientError> {
        let payload = serde_json::to_value(ReadRequest { name, namespace })
            .map_err(ClientError::Json)?;
        self.inner.rpc(events::READ, payload)
    }

    pub fn ping(&self) -> Result<DaemonInfo, ClientError> {
        let reply = self.inner.rpc(events::PING, Value::Null)?;
        serde_json::from_value(reply).map_err(ClientError::Json)
    }

    /// Ask the daemon to flush and exit.
    pub fn shutdown_daemon(&self) -> Result<(), ClientError> {
        self.inner.rpc(events::SHUTDOWN, Value::Null)?;
        Ok(())
    }

    /// Re-establish the stream after a disconnect, re-declare every
    /// known replicant, and replay their buffered operations.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.inner.open_stream()?;
        let shared: Vec<Arc<ReplicantShared>> =
            self.inner.lock_replicants().values().cloned().collect();
        for rep in shared {
            ClientReplicant::new(Arc::clone(&self.inner), rep).declare_and_replay()?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_writer().is_some()
    }
}

impl SocketInner {
    fn open_stream(self: &Arc<Self>) -> Result<(), ClientError> {
        let stream = UnixStream::connect(&self.path).map_err(IpcError::from)?;
        let reader_stream = stream.try_clone().map_err(IpcError::from)?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.lock_writer() = Some(stream);

        let inner = Arc::clone(self);
        std::thread::spawn(move || run_reader(inner, reader_stream, generation));
        Ok(())
    }

    pub(super) fn rpc(&self, event: &str, payload: Value) -> Result<Value, ClientError> {
        let msgid = self.next_msgid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.lock_acks().insert(msgid, tx);

        let envelope = Envelope::rpc(event, msgid, payload);
        if let Err(e) = self.send(&envelope) {
            self.lock_acks().remove(&msgid);
            return Err(e);
        }

        match rx.recv_timeout(self.limits.rpc_timeout()) {
            Ok(reply) => Ok(reply),
            Err(_) => {
                self.lock_acks().remove(&msgid);
                Err(ClientError::Ipc(IpcError::AckTimeout {
                    timeout_ms: self.limits.rpc_timeout_ms,
                }))
            }
        }
    }

    fn send(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let mut writer = self.lock_writer();
        let stream = writer.as_mut().ok_or(ClientError::Disconnected)?;
        match write_frame(stream, envelope) {
            Ok(()) => Ok(()),
            Err(e) => {
                *writer = None;
                Err(e.into())
            }
        }
    }

    fn complete_ack(&self, msgid: u64, payload: Value) {
        if let Some(tx) = self.lock_acks().remove(&msgid) {
            let _ = tx.send(payload);
        }
    }

    fn route_broadcast(self: &Arc<Self>, broadcast: OperationsBroadcast) {
        let shared = {
            let replicants = self.lock_replicants();
            replicants
                .get(&(broadcast.namespace.clone(), broadcast.name.clone()))
                .cloned()
        };
        match shared {
            Some(rep) => rep.apply_broadcast(self, broadcast),
            None => {
                tracing::debug!(
                    namespace = %broadcast.namespace, name = %broadcast.name,
                    "broadcast for unknown replicant dropped"
                );
            }
        }
    }

    /// The stream died: outstanding proposals count as rejected and
    /// every replicant falls back to `undeclared` (writes buffer until
    /// `reconnect`). A reader from a superseded connection must not
    /// tear down its replacement.
    fn handle_disconnect(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        *self.lock_writer() = None;
        self.lock_acks().clear();
        for rep in self.lock_replicants().values() {
            rep.mark_undeclared();
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<UnixStream>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_acks(&self) -> MutexGuard<'_, HashMap<u64, Sender<Value>>> {
        self.pending_acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_replicants(
        &self,
    ) -> MutexGuard<'_, HashMap<(NamespaceId, ReplicantName), Arc<ReplicantShared>>> {
        self.replicants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_reader(inner: Arc<SocketInner>, stream: UnixStream, generation: u64) {
    let max = inner.limits.max_frame_bytes;
    let mut reader = BufReader::new(stream);
    loop {
        match read_frame(&mut reader, max) {
            Ok(Some(envelope)) => match envelope.event.as_str() {
                events::ACK => {
                    if let Some(msgid) = envelope.msgid {
                        inner.complete_ack(msgid, envelope.payload);
                    }
                }
                events::OPERATIONS => {
                    match serde_json::from_value::<OperationsBroadcast>(envelope.payload) {
                        Ok(broadcast) => inner.route_broadcast(broadcast),
                        Err(err) => {
                            tracing::warn!(%err, "malformed operations broadcast");
                        }
                    }
                }
                other => {
                    tracing::debug!(event = %other, "unexpected event from daemon");
                }
            },
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(%err, "client read failed");
                break;
            }
        }
    }
    inner.handle_disconnect(generation);
}
