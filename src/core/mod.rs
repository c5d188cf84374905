//! Value-tree domain: identity, paths, operations, application, canon.

pub mod apply;
pub mod canon;
pub mod ident;
pub mod mutate;
pub mod operation;
pub mod path;

pub use apply::{ApplyError, apply_batch, apply_operation, resolve_path};
pub use canon::{canon_digest, cmp_values, to_canon_json_bytes};
pub use ident::{InvalidIdent, NamespaceId, ReplicantName};
pub use mutate::MutationRecorder;
pub use operation::{Operation, OperationKind};
pub use path::{PathError, ValuePath};
