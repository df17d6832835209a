use serde::{Deserialize, Serialize};
use thiserror::Error;

use makroq_comm::CommError;

use crate::store::SideStoreError;

/// Errors that can occur in the macro-task queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown task kind: {0}")]
    UnknownKind(String),

    #[error("truncated task stream")]
    TruncatedStream,

    #[error("side store error: {0}")]
    SideStore(#[from] SideStoreError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("communicator error: {0}")]
    Comm(#[from] CommError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),
}

/// Wire form of a [`QueueError`], used to synchronize the first failure of
/// a batch across the universe. Reconstruction keeps the taxonomy for every
/// variant a worker can actually hit; source errors that cannot cross the
/// wire are carried as their display text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ErrorReport {
    kind: ErrorKind,
    detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ErrorKind {
    InvalidArgument,
    UnknownKind,
    TruncatedStream,
    SideStore,
    Protocol,
    Comm,
    Serialization,
    Config,
}

impl ErrorReport {
    pub(crate) fn from_error(err: &QueueError) -> Self {
        let kind = match err {
            QueueError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            QueueError::UnknownKind(_) => ErrorKind::UnknownKind,
            QueueError::TruncatedStream => ErrorKind::TruncatedStream,
            QueueError::SideStore(_) => ErrorKind::SideStore,
            QueueError::Protocol(_) => ErrorKind::Protocol,
            QueueError::Comm(_) => ErrorKind::Comm,
            QueueError::Serialization(_) => ErrorKind::Serialization,
            QueueError::Config(_) => ErrorKind::Config,
        };
        let detail = match err {
            QueueError::InvalidArgument(s)
            | QueueError::Protocol(s)
            | QueueError::Serialization(s)
            | QueueError::Config(s)
            | QueueError::UnknownKind(s) => s.clone(),
            QueueError::TruncatedStream => String::new(),
            QueueError::SideStore(e) => e.to_string(),
            QueueError::Comm(e) => e.to_string(),
        };
        Self { kind, detail }
    }

    pub(crate) fn into_error(self) -> QueueError {
        match self.kind {
            ErrorKind::InvalidArgument => QueueError::InvalidArgument(self.detail),
            ErrorKind::UnknownKind => QueueError::UnknownKind(self.detail),
            ErrorKind::TruncatedStream => QueueError::TruncatedStream,
            ErrorKind::SideStore => QueueError::SideStore(SideStoreError::Io(
                std::io::Error::new(std::io::ErrorKind::Other, self.detail),
            )),
            ErrorKind::Protocol => QueueError::Protocol(self.detail),
            ErrorKind::Comm => QueueError::Comm(CommError::Transport(self.detail)),
            ErrorKind::Serialization => QueueError::Serialization(self.detail),
            ErrorKind::Config => QueueError::Config(self.detail),
        }
    }
}
