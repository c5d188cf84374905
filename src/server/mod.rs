//! Server side: replicants, the Replicator, persistence, daemon threads.

pub mod replicant;
pub mod replicator;
pub mod saver;
pub mod socket;
pub mod state_loop;
pub mod store;

pub use replicant::{FlushOutcome, ReplicantOptions, ServerReplicant, WriteError};
pub use replicator::{ConnHandle, NotDeclared, Replicator};
pub use saver::{SaveKey, SaveScheduler};
pub use socket::{DaemonOptions, run_daemon};
pub use state_loop::{StateMessage, run_state_loop};
pub use store::{NamespaceStore, StoreError, decode_snapshot, encode_snapshot, replicant_key};
