//! Error type shared by every foreground call.

use crate::net::classify::{FailureKind, Operation};

use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("client registry is full ({capacity} connections)")]
    CapacityExceeded { capacity: usize },

    #[error("invalid socket handle {0}")]
    InvalidHandle(i32),

    #[error("watch set is empty")]
    EmptyWatchSet,

    #[error("watch set holds {len} descriptors, limit is {limit}")]
    TooManyDescriptors { len: usize, limit: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("watch loop is already running")]
    AlreadyWatching,

    #[error("already removed")]
    Removed,

    #[error("watch loop thread panicked")]
    WorkerPanicked,

    #[error("{operation} failed ({kind:?}): {source}")]
    Os {
        operation: Operation,
        kind: FailureKind,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn watch loop thread: {0}")]
    Spawn(#[source] io::Error),
}

impl Error {
    /// Builds an [`Error::Os`] from `errno` as left by the last failed syscall.
    pub(crate) fn last_os(operation: Operation) -> Self {
        Self::from_io(operation, io::Error::last_os_error())
    }

    pub(crate) fn from_io(operation: Operation, source: io::Error) -> Self {
        let kind = FailureKind::classify(operation, source.raw_os_error().unwrap_or(-1));

        Error::Os {
            operation,
            kind,
            source,
        }
    }

    /// Classification of an OS failure, if this is one.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::Os { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Raw errno of an OS failure, if this is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
