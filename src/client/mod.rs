//! Client side: the socket binding and the mirror replicant.

pub mod replicant;
pub mod socket;

use thiserror::Error;

use crate::core::ApplyError;
use crate::error::Transience;
use crate::schema::Violation;
use crate::transport::IpcError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Ipc(#[from] IpcError),
    #[error("not connected to the daemon")]
    Disconnected,
    #[error("declaration rejected: {reason}")]
    DeclarationRejected { reason: String },
    #[error("value failed schema validation: {}", crate::client::format_violations(.violations))]
    ValueInvalid { violations: Vec<Violation> },
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error("invalid JSON payload: {0}")]
    Json(#[source] serde_json::Error),
}

impl ClientError {
    pub fn transience(&self) -> Transience {
        match self {
            ClientError::Ipc(e) => e.transience(),
            ClientError::Disconnected => Transience::Retryable,
            ClientError::DeclarationRejected { .. }
            | ClientError::ValueInvalid { .. }
            | ClientError::Apply(_)
            | ClientError::Json(_) => Transience::Permanent,
        }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub use replicant::ClientReplicant;
pub use socket::ClientSocket;
