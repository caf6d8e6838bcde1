//! Error types for the cache write coordinator

use thiserror::Error;

/// Errors produced by the network transaction feeding the coordinator.
///
/// These are fatal to the read cycle they occur in: every consumer waiting
/// on that cycle observes the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    /// Connection to the origin was lost entirely
    #[error("internet disconnected")]
    InternetDisconnected,
    /// Peer reset the connection mid-stream
    #[error("connection reset")]
    ConnectionReset,
    /// Read timed out in the transport layer
    #[error("network timeout")]
    Timeout,
    /// Any other transport-level failure
    #[error("network stream failed: {0}")]
    Stream(String),
}

/// Errors produced by the storage entry backing the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A data write was rejected or came up short
    #[error("storage write failed")]
    WriteFailed,
    /// Truncating the entry to the committed length failed
    #[error("storage truncate failed")]
    TruncateFailed,
    /// The entry was doomed underneath us
    #[error("storage entry doomed")]
    Doomed,
}

/// Errors surfaced to consumers of [`Writers`](crate::Writers).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WritersError {
    /// The shared network read failed; all consumers in the cycle see this
    #[error("network read failed: {0}")]
    Network(#[from] NetError),
    /// Writing the shared bytes to the cache entry failed. Delivered to every
    /// consumer in the cycle except the active one, whose stream continues.
    #[error("cache write failed")]
    CacheWriteFailure,
    /// An exclusive writer already holds the entry
    #[error("an exclusive writer holds this entry")]
    ExclusiveWriteInProgress,
    /// The coordinator is network-read-only or winding down
    #[error("coordinator is not accepting writers")]
    NotAcceptingWriters,
    /// The handle was never registered or has been removed
    #[error("unknown writer handle")]
    UnknownWriter,
    /// The handle already has a read in flight
    #[error("a read is already pending for this writer")]
    ReadAlreadyPending,
    /// The writer was removed while its read was pending
    #[error("read aborted: writer removed mid-cycle")]
    Aborted,
}

/// Convenience Result type for coordinator operations
pub type Result<T> = std::result::Result<T, WritersError>;
