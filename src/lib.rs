#![forbid(unsafe_code)]

pub mod api;
pub mod change;
pub mod client;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
mod paths;
pub mod schema;
pub mod server;
pub mod telemetry;
pub mod transport;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working set at the crate root for convenience
pub use crate::api::{
    DaemonInfo, DeclareRequest, OperationsBroadcast, ProposeRequest, ReadRequest, RejectReason,
    ReplicantOpts, SnapshotReply,
};
pub use crate::change::{ChangeEvent, ChangeSubscription};
pub use crate::client::{ClientError, ClientReplicant, ClientSocket};
pub use crate::core::{
    ApplyError, NamespaceId, Operation, OperationKind, ReplicantName, ValuePath, apply_batch,
    apply_operation, canon_digest,
};
pub use crate::schema::{ReplicantSchema, SchemaError, Violation};
pub use crate::server::{
    DaemonOptions, Replicator, ServerReplicant, WriteError, run_daemon,
};
pub use crate::paths::{data_dir, replicants_dir, socket_path};
