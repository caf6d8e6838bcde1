//! Scripted collaborators for exercising the coordinator
//!
//! Used by the unit tests, the integration tests, and the benchmarks. Each
//! mock keeps its observable state behind shared handles so a test can hold a
//! probe while the boxed trait object lives inside the coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{NetError, StorageError};
use crate::priority::RequestPriority;
use crate::transaction::{CacheOwner, NetworkTransaction, SharedStorageEntry, StorageEntry};

/// Network source replaying a fixed body.
///
/// Every read yields once before resolving, so reads are genuinely
/// asynchronous the way a socket-backed transaction would be.
pub struct MockNetworkTransaction {
    body: Vec<u8>,
    pos: usize,
    /// Cap on bytes returned per read, to script short reads
    chunk_limit: usize,
    fail_with: Option<NetError>,
    priority_log: Arc<Mutex<Vec<RequestPriority>>>,
}

impl MockNetworkTransaction {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            pos: 0,
            chunk_limit: usize::MAX,
            fail_with: None,
            priority_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every read fail with `error`.
    pub fn fail_with(mut self, error: NetError) -> Self {
        self.fail_with = Some(error);
        self
    }

    /// Never return more than `limit` bytes from a single read.
    pub fn chunk_limit(mut self, limit: usize) -> Self {
        self.chunk_limit = limit;
        self
    }

    /// Probe recording every priority change applied to the transaction.
    pub fn priority_log(&self) -> Arc<Mutex<Vec<RequestPriority>>> {
        Arc::clone(&self.priority_log)
    }

    pub fn boxed(self) -> Box<dyn NetworkTransaction> {
        Box::new(self)
    }
}

#[async_trait]
impl NetworkTransaction for MockNetworkTransaction {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        tokio::task::yield_now().await;
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        let remaining = self.body.len() - self.pos;
        let n = buf.len().min(self.chunk_limit).min(remaining);
        buf[..n].copy_from_slice(&self.body[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn set_priority(&mut self, priority: RequestPriority) {
        if let Ok(mut log) = self.priority_log.lock() {
            log.push(priority);
        }
    }
}

/// In-memory storage entry with a switchable failure mode.
#[derive(Clone, Default)]
pub struct MockStorageEntry {
    data: Arc<Mutex<Vec<u8>>>,
    soft_failure: Arc<AtomicBool>,
    truncations: Arc<Mutex<Vec<u64>>>,
}

impl MockStorageEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a clone of this entry for sharing with a coordinator. The
    /// original keeps observing the same underlying buffers.
    pub fn shared(&self) -> SharedStorageEntry {
        Arc::new(AsyncMutex::new(Box::new(self.clone())))
    }

    /// Seed the entry with already-committed bytes, as when resuming a
    /// truncated entry.
    pub fn preload(&self, data: &[u8]) {
        if let Ok(mut buf) = self.data.lock() {
            buf.extend_from_slice(data);
        }
    }

    /// Make subsequent writes fail without tearing the entry down.
    pub fn set_soft_failure(&self, fail: bool) {
        self.soft_failure.store(fail, Ordering::SeqCst);
    }

    /// Bytes written so far.
    pub fn data(&self) -> Vec<u8> {
        self.data.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Lengths passed to `truncate`, in order.
    pub fn truncations(&self) -> Vec<u64> {
        self.truncations.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StorageEntry for MockStorageEntry {
    async fn write_data(&mut self, offset: u64, data: &[u8]) -> Result<usize, StorageError> {
        tokio::task::yield_now().await;
        if self.soft_failure.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed);
        }
        let mut buf = self.data.lock().map_err(|_| StorageError::WriteFailed)?;
        let offset = offset as usize;
        let end = offset + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset..end].copy_from_slice(data);
        Ok(data.len())
    }

    async fn truncate(&mut self, len: u64) -> Result<(), StorageError> {
        if let Ok(mut truncations) = self.truncations.lock() {
            truncations.push(len);
        }
        let mut buf = self.data.lock().map_err(|_| StorageError::TruncateFailed)?;
        buf.truncate(len as usize);
        Ok(())
    }
}

/// What the coordinator reported back to its owning cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerEvent {
    DoneWriting {
        success: bool,
        should_keep_entry: bool,
    },
    DoomEntry,
}

/// Owner double recording every notification.
#[derive(Default)]
pub struct RecordingCacheOwner {
    events: Mutex<Vec<OwnerEvent>>,
}

impl RecordingCacheOwner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<OwnerEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl CacheOwner for RecordingCacheOwner {
    fn writers_done_writing(&self, success: bool, should_keep_entry: bool) {
        if let Ok(mut events) = self.events.lock() {
            events.push(OwnerEvent::DoneWriting {
                success,
                should_keep_entry,
            });
        }
    }

    fn writers_doom_entry(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.push(OwnerEvent::DoomEntry);
        }
    }
}

/// Drive the current-thread runtime until spawned coordinator tasks have had
/// ample chances to run.
pub async fn run_until_idle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
