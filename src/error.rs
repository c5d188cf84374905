use thiserror::Error;

use crate::client::ClientError;
use crate::core::{ApplyError, InvalidIdent, PathError};
use crate::schema::SchemaError;
use crate::server::StoreError;
use crate::transport::IpcError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the capability errors; callers that care about a
/// specific failure match on the module error directly.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Ident(#[from] InvalidIdent),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Ident(_) | Error::Path(_) | Error::Apply(_) | Error::Schema(_) => {
                Transience::Permanent
            }
            Error::Store(e) => e.transience(),
            Error::Ipc(e) => e.transience(),
            Error::Client(e) => e.transience(),
        }
    }
}
