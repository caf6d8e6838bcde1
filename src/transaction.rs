//! Leaf dependencies of the coordinator
//!
//! The coordinator arbitrates between three external parties, each behind a
//! trait so the cache, the transport, and the disk backend stay out of this
//! crate:
//!
//! - **NetworkTransaction**: the byte-producing source, exclusively owned by
//!   the coordinator while a response is streaming.
//! - **StorageEntry**: the key-addressed blob store the bytes are written to,
//!   shared with the owning cache.
//! - **CacheOwner**: the notification contract back to the owning cache.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{NetError, StorageError};
use crate::priority::RequestPriority;
use crate::response::{PartialState, ResponseInfo};

/// Opaque identity of a registered consumer.
///
/// Issued at registration; consumers are always addressed by handle, never by
/// reference, so a caller deleting its transaction object cannot leave a
/// dangling back-pointer inside the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriterHandle(pub(crate) u64);

/// Consumer metadata captured at registration.
#[derive(Debug, Clone, Default)]
pub struct TransactionInfo {
    /// Byte-range resume state, when the consumer is continuing a
    /// previously truncated entry
    pub partial: Option<PartialState>,
    /// Whether the entry being written was already truncated once
    pub truncated: bool,
    /// Response metadata; the first registration's copy becomes the
    /// coordinator's
    pub response: ResponseInfo,
}

/// An in-flight network fetch producing the response body.
///
/// At most one `read` is outstanding at a time; the coordinator serializes
/// cycles itself.
#[async_trait]
pub trait NetworkTransaction: Send {
    /// Read up to `buf.len()` bytes of the response body into `buf`.
    /// Returns the byte count; zero means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError>;

    /// Adjust the transport scheduling weight for this fetch.
    fn set_priority(&mut self, priority: RequestPriority);
}

/// A cache entry being populated, addressed by offset.
#[async_trait]
pub trait StorageEntry: Send {
    /// Write `data` at `offset`; returns the byte count actually written.
    async fn write_data(&mut self, offset: u64, data: &[u8]) -> Result<usize, StorageError>;

    /// Shrink the entry to `len` bytes, marking it resumable.
    async fn truncate(&mut self, len: u64) -> Result<(), StorageError>;
}

/// Storage entry shared between the coordinator and the owning cache.
///
/// The coordinator references the entry, it does not own it; the owning cache
/// keeps a clone and closes the entry once the coordinator reports done.
pub type SharedStorageEntry = Arc<Mutex<Box<dyn StorageEntry>>>;

/// Notification contract from the coordinator back to its owning cache.
///
/// Injected at construction rather than inherited, so any cache (or test)
/// can observe the coordinator's terminal transitions.
pub trait CacheOwner: Send + Sync {
    /// The coordinator finished writing. `success` is true when the full
    /// body reached storage; `should_keep_entry` says whether a partial
    /// entry is worth keeping as resumable.
    fn writers_done_writing(&self, success: bool, should_keep_entry: bool);

    /// The entry must be invalidated and sibling transactions restarted.
    fn writers_doom_entry(&self);
}
