//! Response metadata carried alongside the shared byte stream
//!
//! The coordinator never parses HTTP; headers are an opaque map. The only
//! fields it interprets are the validators, which gate whether a partially
//! written entry may be kept as resumable.

use std::collections::HashMap;

/// Metadata describing the response being written to the cache entry.
#[derive(Debug, Clone, Default)]
pub struct ResponseInfo {
    /// Response headers, opaque to the coordinator
    pub headers: HashMap<String, String>,
    /// ETag for validation
    pub etag: Option<String>,
    /// Last-Modified header
    pub last_modified: Option<String>,
    /// Declared body length, if the response carried one
    pub content_length: Option<u64>,
}

impl ResponseInfo {
    /// Check whether this response can back a resumable truncated entry.
    ///
    /// A byte-range resume must be revalidated against the origin, which
    /// requires an ETag or a Last-Modified date.
    pub fn has_strong_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

/// Byte-range resume bookkeeping for a consumer picking up a truncated entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartialState {
    /// First byte of the requested range
    pub range_start: u64,
    /// One past the last byte of the requested range, if bounded
    pub range_end: Option<u64>,
    /// Offset the network stream resumes from; bytes before it are already
    /// committed to the entry
    pub current_offset: u64,
}
