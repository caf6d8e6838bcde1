//! # Fanout Cache - Shared-Write HTTP Cache Coordination
//!
//! When several requests want the same resource while it is still streaming
//! from the network, only one fetch should happen. This crate implements the
//! coordinator that owns that single in-flight network transaction, writes
//! its bytes to the cache entry, and fans them out to every consumer sharing
//! the response.
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - **writers**: the coordinator multiplexing one network fetch to many
//!   cache-entry readers
//! - **transaction**: trait seams for the network source, the storage entry,
//!   and the owning cache's notification contract
//! - **priority**: request priority levels and max-urgency aggregation
//! - **response**: response metadata and the strong-validator check behind
//!   the truncation decision
//! - **error**: error taxonomy (network, storage, coordinator)
//! - **mock**: scripted collaborators for tests and benchmarks

pub mod error;
pub mod mock;
pub mod priority;
pub mod response;
pub mod transaction;
pub mod writers;

// Re-export main types for convenience
pub use error::{NetError, Result, StorageError, WritersError};
pub use priority::RequestPriority;
pub use response::{PartialState, ResponseInfo};
pub use transaction::{
    CacheOwner, NetworkTransaction, SharedStorageEntry, StorageEntry, TransactionInfo,
    WriterHandle,
};
pub use writers::Writers;

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
