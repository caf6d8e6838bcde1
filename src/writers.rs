//! The shared-write coordinator
//!
//! `Writers` owns the single in-flight network transaction for a cache entry
//! and fans its bytes out to every consumer that wants the response while it
//! is being written to storage. One network read and one storage write are
//! outstanding at most; all sharers ride the same cycle.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::{NetError, Result, WritersError};
use crate::priority::RequestPriority;
use crate::response::ResponseInfo;
use crate::transaction::{
    CacheOwner, NetworkTransaction, SharedStorageEntry, TransactionInfo, WriterHandle,
};

/// A read registered by a consumer, waiting on the current or next cycle.
struct PendingRead {
    /// Bytes the consumer asked for; its delivery is capped by this
    len: usize,
    tx: oneshot::Sender<Result<Vec<u8>>>,
}

/// Book-keeping for one registered consumer.
struct Registration {
    priority: RequestPriority,
    pending: Option<PendingRead>,
}

/// The single in-flight read cycle.
struct Cycle {
    /// Consumer whose request sized the network read. Cleared if it is
    /// removed mid-cycle; the cycle itself keeps running.
    active: Option<WriterHandle>,
    /// Network read size, fixed at dispatch
    len: usize,
}

/// What the network read plus the optional storage write produced.
enum CycleOutcome {
    NetworkError(NetError),
    Eof,
    Data { n: usize, wrote: bool },
    CacheWriteFailed { n: usize },
}

struct State {
    registrations: BTreeMap<WriterHandle, Registration>,
    next_handle: u64,
    network: Option<Box<dyn NetworkTransaction>>,
    priority: RequestPriority,
    /// A priority change arrived while the cycle held the network
    /// transaction; apply it when the transaction comes back
    priority_dirty: bool,
    exclusive: bool,
    network_read_only: bool,
    should_keep_entry: bool,
    truncate_initiated: bool,
    truncate_decided: bool,
    doomed: bool,
    cycle: Option<Cycle>,
    /// Bytes successfully written to the storage entry so far
    committed: u64,
    done: bool,
    failed: Option<WritersError>,
    response: ResponseInfo,
    notified_owner: bool,
}

impl State {
    fn new() -> Self {
        Self {
            registrations: BTreeMap::new(),
            next_handle: 0,
            network: None,
            priority: RequestPriority::Idle,
            priority_dirty: false,
            exclusive: false,
            network_read_only: false,
            should_keep_entry: true,
            truncate_initiated: false,
            truncate_decided: false,
            doomed: false,
            cycle: None,
            committed: 0,
            done: false,
            failed: None,
            response: ResponseInfo::default(),
            notified_owner: false,
        }
    }

    fn recompute_priority(&mut self) {
        let agg = RequestPriority::aggregate(self.registrations.values().map(|r| r.priority));
        if agg == self.priority {
            return;
        }
        self.priority = agg;
        match self.network.as_mut() {
            Some(net) => net.set_priority(agg),
            None => self.priority_dirty = true,
        }
    }

    /// Take every pending read out of the registrations. The snapshot is
    /// taken before any completion is delivered, so a consumer removing
    /// itself (or others) while handling its result cannot disturb delivery.
    fn drain_pending(&mut self) -> Vec<(WriterHandle, PendingRead)> {
        let mut pending = Vec::new();
        for (handle, reg) in self.registrations.iter_mut() {
            if let Some(p) = reg.pending.take() {
                pending.push((*handle, p));
            }
        }
        pending
    }

    /// Decide whether the partially written entry is worth keeping as a
    /// resumable truncated entry. Returns the length to truncate to when it
    /// is. A resume can only be validated later if the response carried
    /// strong validators, and only if some bytes actually reached storage.
    fn decide_truncation(&mut self) -> Option<u64> {
        if self.truncate_decided {
            return None;
        }
        self.truncate_initiated = true;
        self.truncate_decided = true;
        if self.should_keep_entry && self.committed > 0 && self.response.has_strong_validators() {
            log::debug!("keeping truncated entry at {} bytes", self.committed);
            Some(self.committed)
        } else {
            self.should_keep_entry = false;
            log::debug!(
                "discarding partial entry ({} bytes committed, validators: {})",
                self.committed,
                self.response.has_strong_validators()
            );
            None
        }
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    // A panicked task cannot leave the registry half-mutated in a way that
    // poisons correctness; continue with the inner state.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coordinator multiplexing one network fetch to many cache-entry readers.
///
/// Created when a cache entry transitions to "being written"; the owning
/// cache keeps it until the last consumer detaches. All asynchronous work is
/// spawned on the ambient Tokio runtime, so a `Writers` must live inside one.
///
/// Consumers are addressed by the [`WriterHandle`] issued at registration.
/// Each [`read`](Writers::read) eventually resolves exactly once with a byte
/// buffer (empty at end of stream) or an error, unless the consumer is
/// removed first, in which case the future resolves with
/// [`WritersError::Aborted`].
pub struct Writers {
    state: Arc<Mutex<State>>,
    entry: SharedStorageEntry,
    owner: Arc<dyn CacheOwner>,
}

impl Writers {
    /// Create a coordinator over a storage entry shared with the owning
    /// cache. The owner is notified when writing finishes or the entry must
    /// be invalidated.
    pub fn new(entry: SharedStorageEntry, owner: Arc<dyn CacheOwner>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new())),
            entry,
            owner,
        }
    }

    /// Register a consumer of the response being written.
    ///
    /// The first consumer's response metadata becomes the coordinator's, and
    /// its byte-range state (when resuming a truncated entry) seeds the
    /// committed offset. Fails when an exclusive writer holds the entry or
    /// the coordinator has stopped accepting writers.
    pub fn add_transaction(
        &self,
        is_exclusive: bool,
        priority: RequestPriority,
        info: TransactionInfo,
    ) -> Result<WriterHandle> {
        let mut s = lock_state(&self.state);
        if s.exclusive {
            return Err(WritersError::ExclusiveWriteInProgress);
        }
        if s.network_read_only || s.truncate_initiated {
            return Err(WritersError::NotAcceptingWriters);
        }
        if is_exclusive && !s.registrations.is_empty() {
            return Err(WritersError::ExclusiveWriteInProgress);
        }

        let first = s.next_handle == 0;
        let handle = WriterHandle(s.next_handle);
        s.next_handle += 1;
        if first {
            s.response = info.response.clone();
            if let Some(partial) = info.partial {
                s.committed = partial.current_offset;
            }
        }
        if is_exclusive {
            s.exclusive = true;
        }
        s.registrations.insert(
            handle,
            Registration {
                priority,
                pending: None,
            },
        );
        s.recompute_priority();
        Ok(handle)
    }

    /// Hand the network transaction to the coordinator. It is owned
    /// exclusively from here on and carries the aggregate priority of all
    /// registered consumers.
    pub fn set_network_transaction(&self, mut network: Box<dyn NetworkTransaction>) {
        let mut s = lock_state(&self.state);
        network.set_priority(s.priority);
        s.priority_dirty = false;
        s.network = Some(network);
    }

    /// Deregister a consumer. `success` records whether it finished reading
    /// the response.
    ///
    /// A read cycle the consumer initiated is never cancelled: the bytes
    /// already requested are still fetched, written to storage, and handed to
    /// any waiting consumers. If no consumers remain, the coordinator decides
    /// between keeping a resumable truncated entry and discarding it, then
    /// notifies the owner.
    pub fn remove_transaction(&self, handle: WriterHandle, success: bool) {
        let mut done_notice = None;
        let mut truncate_to = None;
        {
            let mut s = lock_state(&self.state);
            // Dropping the registration drops its pending sender, so the
            // consumer's read future resolves as aborted and never sees data.
            if s.registrations.remove(&handle).is_none() {
                return;
            }
            if let Some(cycle) = &mut s.cycle {
                if cycle.active == Some(handle) {
                    cycle.active = None;
                }
            }
            s.recompute_priority();

            if s.registrations.is_empty() {
                if s.cycle.is_some() {
                    // The in-flight read still completes and commits its
                    // bytes; gate new writers now, decide truncation when the
                    // cycle resolves.
                    s.truncate_initiated = true;
                } else if s.done || success {
                    done_notice = Some((true, s.should_keep_entry));
                } else if s.failed.is_some() {
                    done_notice = Some((false, s.should_keep_entry));
                } else {
                    truncate_to = s.decide_truncation();
                    done_notice = Some((false, s.should_keep_entry));
                }
                if done_notice.is_some() {
                    if s.notified_owner {
                        done_notice = None;
                    }
                    s.notified_owner = true;
                }
            }
        }
        if let Some(len) = truncate_to {
            self.spawn_truncate(len);
        }
        if let Some((success, keep)) = done_notice {
            self.owner.writers_done_writing(success, keep);
        }
    }

    /// Recompute the aggregate priority and propagate it to the network
    /// transaction if it changed.
    pub fn update_priority(&self) {
        lock_state(&self.state).recompute_priority();
    }

    /// Change one consumer's declared priority, then recompute the aggregate.
    pub fn update_transaction_priority(
        &self,
        handle: WriterHandle,
        priority: RequestPriority,
    ) -> Result<()> {
        let mut s = lock_state(&self.state);
        let reg = s
            .registrations
            .get_mut(&handle)
            .ok_or(WritersError::UnknownWriter)?;
        reg.priority = priority;
        s.recompute_priority();
        Ok(())
    }

    /// Whether another consumer may attach to this coordinator. False when
    /// an exclusive writer holds the entry, the coordinator is
    /// network-read-only, or entry truncation has been initiated.
    pub fn can_add_writers(&self) -> bool {
        let s = lock_state(&self.state);
        !s.exclusive && !s.network_read_only && !s.truncate_initiated
    }

    /// Stop writing to storage, but only if `handle` is the sole remaining
    /// consumer. Returns false (and keeps caching) when the read is shared:
    /// the other consumers still need the entry populated.
    pub fn stop_caching(&self, handle: WriterHandle) -> bool {
        let mut s = lock_state(&self.state);
        if s.registrations.len() != 1 || !s.registrations.contains_key(&handle) {
            return false;
        }
        s.network_read_only = true;
        true
    }

    /// Unconditionally switch to network-read-only mode: bytes keep flowing
    /// to consumers but are no longer written to storage. `keep_entry`
    /// records whether the partially written entry should survive teardown.
    pub fn set_network_read_only(&self, keep_entry: bool) {
        let mut s = lock_state(&self.state);
        s.network_read_only = true;
        s.should_keep_entry = keep_entry;
    }

    /// Decide the fate of a partially written entry once the last consumer
    /// is gone: truncate to the committed length when the response can be
    /// resumed, discard otherwise. Neither outcome is a consumer-visible
    /// error.
    pub fn initiate_truncate_entry(&self) {
        let truncate_to = lock_state(&self.state).decide_truncation();
        if let Some(len) = truncate_to {
            self.spawn_truncate(len);
        }
    }

    /// True once every consumer has detached.
    pub fn is_empty(&self) -> bool {
        lock_state(&self.state).registrations.is_empty()
    }

    /// Number of registered consumers.
    pub fn transaction_count(&self) -> usize {
        lock_state(&self.state).registrations.len()
    }

    /// Whether `handle` is currently registered.
    pub fn has_transaction(&self, handle: WriterHandle) -> bool {
        lock_state(&self.state).registrations.contains_key(&handle)
    }

    /// Aggregate priority currently applied to the network transaction.
    pub fn priority(&self) -> RequestPriority {
        lock_state(&self.state).priority
    }

    /// Whether bytes still flow to consumers but no longer to storage.
    pub fn network_read_only(&self) -> bool {
        lock_state(&self.state).network_read_only
    }

    /// Whether the entry should survive an abnormal termination.
    pub fn should_keep_entry(&self) -> bool {
        lock_state(&self.state).should_keep_entry
    }

    /// Read up to `buf_len` bytes of the shared response body.
    ///
    /// The consumer that finds no cycle in flight becomes active: its request
    /// sizes the network read. Everyone else waits and receives
    /// `min(buf_len, produced)` bytes when the in-flight cycle resolves, so a
    /// consumer never learns more bytes than it asked for and never stalls a
    /// larger reader beyond that cap. An empty buffer means end of stream.
    pub async fn read(&self, handle: WriterHandle, buf_len: usize) -> Result<Vec<u8>> {
        if buf_len == 0 {
            return Ok(Vec::new());
        }
        let (rx, dispatch) = {
            let mut s = lock_state(&self.state);
            if let Some(err) = &s.failed {
                return Err(err.clone());
            }
            if s.done {
                return Ok(Vec::new());
            }
            let reg = s
                .registrations
                .get_mut(&handle)
                .ok_or(WritersError::UnknownWriter)?;
            if reg.pending.is_some() {
                return Err(WritersError::ReadAlreadyPending);
            }
            let (tx, rx) = oneshot::channel();
            reg.pending = Some(PendingRead { len: buf_len, tx });
            let dispatch = s.cycle.is_none();
            if dispatch {
                s.cycle = Some(Cycle {
                    active: Some(handle),
                    len: buf_len,
                });
            }
            (rx, dispatch)
        };
        if dispatch {
            tokio::spawn(Self::drive_cycle(
                Arc::clone(&self.state),
                Arc::clone(&self.entry),
                Arc::clone(&self.owner),
            ));
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(WritersError::Aborted),
        }
    }

    fn spawn_truncate(&self, len: u64) {
        let entry = Arc::clone(&self.entry);
        tokio::spawn(async move {
            if let Err(e) = entry.lock().await.truncate(len).await {
                log::warn!("truncating cache entry to {len} bytes failed: {e}");
            }
        });
    }

    /// One full read cycle: pull from the network, write to storage, then
    /// complete every pending consumer. Runs as its own task so the cycle
    /// outlives the consumer that dispatched it.
    async fn drive_cycle(
        state: Arc<Mutex<State>>,
        entry: SharedStorageEntry,
        owner: Arc<dyn CacheOwner>,
    ) {
        // Take exclusive hold of the network transaction for this cycle.
        let (mut network, len) = {
            let mut s = lock_state(&state);
            let len = match &s.cycle {
                Some(cycle) => cycle.len,
                None => return,
            };
            match s.network.take() {
                Some(mut network) => {
                    if s.priority_dirty {
                        network.set_priority(s.priority);
                        s.priority_dirty = false;
                    }
                    (network, len)
                }
                None => {
                    // Reads were issued before a network transaction was
                    // attached; fail the cycle rather than hang it.
                    s.cycle = None;
                    let err = WritersError::Network(NetError::Stream(
                        "no network transaction attached".to_string(),
                    ));
                    s.failed = Some(err.clone());
                    let pending = s.drain_pending();
                    drop(s);
                    for (_, p) in pending {
                        let _ = p.tx.send(Err(err.clone()));
                    }
                    return;
                }
            }
        };

        let mut buf = vec![0u8; len];
        let read_result = network.read(&mut buf).await;

        let outcome = match read_result {
            Err(e) => CycleOutcome::NetworkError(e),
            Ok(0) => CycleOutcome::Eof,
            Ok(n) => {
                let (offset, read_only) = {
                    let s = lock_state(&state);
                    (s.committed, s.network_read_only)
                };
                if read_only {
                    CycleOutcome::Data { n, wrote: false }
                } else {
                    match entry.lock().await.write_data(offset, &buf[..n]).await {
                        Ok(written) if written == n => CycleOutcome::Data { n, wrote: true },
                        Ok(_) | Err(_) => CycleOutcome::CacheWriteFailed { n },
                    }
                }
            }
        };

        // Finalize under the lock; deliver completions only after it drops.
        let mut network = Some(network);
        let mut deliveries: Vec<(oneshot::Sender<Result<Vec<u8>>>, Result<Vec<u8>>)> = Vec::new();
        let mut doom = false;
        let mut done_notice = None;
        let mut truncate_to = None;
        {
            let mut s = lock_state(&state);
            let active = s.cycle.take().and_then(|c| c.active);
            let pending = s.drain_pending();
            match outcome {
                CycleOutcome::NetworkError(e) => {
                    log::warn!("shared network read failed: {e}");
                    let err = WritersError::Network(e);
                    s.failed = Some(err.clone());
                    s.should_keep_entry = false;
                    if !s.doomed {
                        s.doomed = true;
                        doom = true;
                    }
                    // Network failures are global: every consumer in the
                    // cycle observes the same error.
                    for (_, p) in pending {
                        deliveries.push((p.tx, Err(err.clone())));
                    }
                    network = None;
                }
                CycleOutcome::Eof => {
                    log::debug!("response body complete, {} bytes committed", s.committed);
                    s.done = true;
                    for (_, p) in pending {
                        deliveries.push((p.tx, Ok(Vec::new())));
                    }
                    // Response fully consumed; release the network source.
                    network = None;
                }
                CycleOutcome::Data { n, wrote } => {
                    if wrote {
                        s.committed += n as u64;
                    }
                    for (_, p) in pending {
                        let take = p.len.min(n);
                        deliveries.push((p.tx, Ok(buf[..take].to_vec())));
                    }
                }
                CycleOutcome::CacheWriteFailed { n } => {
                    log::warn!("cache write failed, continuing network-read-only");
                    s.network_read_only = true;
                    s.should_keep_entry = false;
                    if !s.doomed {
                        s.doomed = true;
                        doom = true;
                    }
                    // The active consumer's stream is not interrupted by a
                    // cache-layer problem; everyone else loses caching.
                    for (h, p) in pending {
                        if Some(h) == active {
                            let take = p.len.min(n);
                            deliveries.push((p.tx, Ok(buf[..take].to_vec())));
                        } else {
                            deliveries.push((p.tx, Err(WritersError::CacheWriteFailure)));
                        }
                    }
                }
            }
            if let Some(network) = &mut network {
                if s.priority_dirty {
                    network.set_priority(s.priority);
                    s.priority_dirty = false;
                }
            }
            s.network = network;

            // Every consumer detached while the cycle was in flight: the
            // cycle still committed its bytes, now settle the entry's fate.
            if s.registrations.is_empty() && !s.notified_owner {
                if s.done {
                    done_notice = Some((true, s.should_keep_entry));
                } else if s.failed.is_some() {
                    done_notice = Some((false, s.should_keep_entry));
                } else {
                    truncate_to = s.decide_truncation();
                    done_notice = Some((false, s.should_keep_entry));
                }
                s.notified_owner = true;
            }
        }

        if doom {
            owner.writers_doom_entry();
        }
        if let Some(len) = truncate_to {
            if let Err(e) = entry.lock().await.truncate(len).await {
                log::warn!("truncating cache entry to {len} bytes failed: {e}");
            }
        }
        if let Some((success, keep)) = done_notice {
            owner.writers_done_writing(success, keep);
        }
        for (tx, result) in deliveries {
            let _ = tx.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        run_until_idle, MockNetworkTransaction, MockStorageEntry, OwnerEvent, RecordingCacheOwner,
    };
    use pretty_assertions::assert_eq;

    const BODY: &[u8] = b"<html><body>Fanout Blah Blah</body></html>";

    fn validated_info() -> TransactionInfo {
        TransactionInfo {
            response: ResponseInfo {
                etag: Some("\"foopy\"".to_string()),
                last_modified: Some("Wed, 28 Nov 2007 00:40:09 GMT".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    struct Harness {
        writers: Writers,
        storage: MockStorageEntry,
        owner: Arc<RecordingCacheOwner>,
    }

    impl Harness {
        fn new() -> Self {
            let storage = MockStorageEntry::new();
            let owner = RecordingCacheOwner::new();
            let writers = Writers::new(storage.shared(), owner.clone());
            Self {
                writers,
                storage,
                owner,
            }
        }

        fn add_with_network(&self, is_exclusive: bool, info: TransactionInfo) -> WriterHandle {
            let handle = self
                .writers
                .add_transaction(is_exclusive, RequestPriority::default(), info)
                .expect("add_transaction");
            self.writers
                .set_network_transaction(MockNetworkTransaction::new(BODY).boxed());
            handle
        }

        fn add(&self) -> WriterHandle {
            self.writers
                .add_transaction(false, RequestPriority::default(), TransactionInfo::default())
                .expect("add_transaction")
        }
    }

    #[tokio::test]
    async fn test_add_transaction() {
        let h = Harness::new();
        let handle = h.add_with_network(false, validated_info());
        assert!(!h.writers.is_empty());
        assert!(h.writers.has_transaction(handle));
        // keep_entry is true until something goes wrong.
        assert!(h.writers.should_keep_entry());
    }

    #[tokio::test]
    async fn test_add_many_transactions() {
        let h = Harness::new();
        h.add_with_network(false, validated_info());
        for _ in 0..5 {
            h.add();
        }
        assert_eq!(h.writers.transaction_count(), 6);
    }

    #[tokio::test]
    async fn test_exclusive_writer_blocks_others() {
        let h = Harness::new();
        h.add_with_network(true, validated_info());
        assert!(!h.writers.is_empty());
        assert!(!h.writers.can_add_writers());
        let err = h
            .writers
            .add_transaction(false, RequestPriority::default(), TransactionInfo::default())
            .unwrap_err();
        assert_eq!(err, WritersError::ExclusiveWriteInProgress);
    }

    #[tokio::test]
    async fn test_stop_caching_multiple_writers() {
        let h = Harness::new();
        let first = h.add_with_network(false, validated_info());
        assert!(h.writers.can_add_writers());
        h.add();

        // Data must keep reaching storage for the other writer.
        assert!(!h.writers.stop_caching(first));
        assert!(h.writers.can_add_writers());
    }

    #[tokio::test]
    async fn test_stop_caching_single_writer() {
        let h = Harness::new();
        let handle = h.add_with_network(false, validated_info());
        assert!(h.writers.stop_caching(handle));
        assert!(h.writers.network_read_only());
        assert!(!h.writers.can_add_writers());
    }

    #[tokio::test]
    async fn test_set_network_read_only_keep_entry() {
        let h = Harness::new();
        h.add_with_network(true, validated_info());
        assert!(!h.writers.network_read_only());

        h.writers.set_network_read_only(true);
        assert!(h.writers.network_read_only());
        assert!(h.writers.should_keep_entry());
    }

    #[tokio::test]
    async fn test_set_network_read_only_discard_entry() {
        let h = Harness::new();
        h.add_with_network(true, validated_info());

        h.writers.set_network_read_only(false);
        assert!(h.writers.network_read_only());
        assert!(!h.writers.should_keep_entry());
        assert!(!h.writers.can_add_writers());
    }

    #[tokio::test]
    async fn test_remove_idle_transaction_updates_priority() {
        let storage = MockStorageEntry::new();
        let owner = RecordingCacheOwner::new();
        let writers = Writers::new(storage.shared(), owner);

        let first = writers
            .add_transaction(false, RequestPriority::Highest, validated_info())
            .expect("add_transaction");
        let network = MockNetworkTransaction::new(BODY);
        let priority_log = network.priority_log();
        writers.set_network_transaction(network.boxed());
        assert_eq!(writers.priority(), RequestPriority::Highest);

        // A default-priority sharer does not change the aggregate, so no
        // redundant signal reaches the transport.
        writers
            .add_transaction(false, RequestPriority::default(), TransactionInfo::default())
            .expect("add_transaction");
        writers.update_priority();
        assert_eq!(writers.priority(), RequestPriority::Highest);

        writers.remove_transaction(first, false);
        assert_eq!(writers.transaction_count(), 1);
        assert_eq!(writers.priority(), RequestPriority::Medium);
        assert_eq!(
            priority_log.lock().expect("priority log").as_slice(),
            &[RequestPriority::Highest, RequestPriority::Medium]
        );
    }

    #[tokio::test]
    async fn test_priority_change_during_cycle_is_deferred() {
        let storage = MockStorageEntry::new();
        let owner = RecordingCacheOwner::new();
        let writers = Writers::new(storage.shared(), owner);

        let handle = writers
            .add_transaction(false, RequestPriority::default(), validated_info())
            .expect("add_transaction");
        let network = MockNetworkTransaction::new(BODY);
        let priority_log = network.priority_log();
        writers.set_network_transaction(network.boxed());

        let mut read = Box::pin(writers.read(handle, 16));
        assert!(futures::poll!(read.as_mut()).is_pending());
        // Let the cycle task take ownership of the network transaction.
        tokio::task::yield_now().await;

        writers
            .update_transaction_priority(handle, RequestPriority::Highest)
            .expect("known handle");
        assert_eq!(writers.priority(), RequestPriority::Highest);

        let chunk = read.await.expect("read");
        assert_eq!(chunk, &BODY[..16]);

        // One signal at attach, one once the cycle returned the transaction;
        // nothing reached the transport while the cycle held it.
        assert_eq!(
            priority_log.lock().expect("priority log").as_slice(),
            &[RequestPriority::Medium, RequestPriority::Highest]
        );
    }

    #[tokio::test]
    async fn test_update_transaction_priority() {
        let h = Harness::new();
        let handle = h.add_with_network(false, validated_info());
        assert_eq!(h.writers.priority(), RequestPriority::Medium);

        h.writers
            .update_transaction_priority(handle, RequestPriority::Highest)
            .expect("known handle");
        assert_eq!(h.writers.priority(), RequestPriority::Highest);
    }

    #[tokio::test]
    async fn test_read_full_body() {
        let h = Harness::new();
        let handle = h.add_with_network(false, validated_info());

        let mut content = Vec::new();
        loop {
            let chunk = h.writers.read(handle, 256).await.expect("read");
            if chunk.is_empty() {
                break;
            }
            content.extend_from_slice(&chunk);
        }
        assert_eq!(content, BODY);
        assert_eq!(h.storage.data(), BODY);

        h.writers.remove_transaction(handle, true);
        assert!(h.writers.is_empty());
        assert_eq!(
            h.owner.events(),
            vec![OwnerEvent::DoneWriting {
                success: true,
                should_keep_entry: true
            }]
        );
    }

    #[tokio::test]
    async fn test_read_unknown_handle() {
        let h = Harness::new();
        h.add_with_network(false, validated_info());
        let err = h.writers.read(WriterHandle(99), 16).await.unwrap_err();
        assert_eq!(err, WritersError::UnknownWriter);
    }

    #[tokio::test]
    async fn test_second_read_while_pending() {
        let h = Harness::new();
        let handle = h.add_with_network(false, validated_info());

        let mut first = Box::pin(h.writers.read(handle, 16));
        assert!(futures::poll!(first.as_mut()).is_pending());

        let err = h.writers.read(handle, 16).await.unwrap_err();
        assert_eq!(err, WritersError::ReadAlreadyPending);

        let chunk = first.await.expect("first read");
        assert_eq!(chunk, &BODY[..16]);
    }

    #[tokio::test]
    async fn test_truncate_without_validators_discards() {
        let h = Harness::new();
        let handle = h.add_with_network(false, TransactionInfo::default());

        h.writers.remove_transaction(handle, false);
        assert!(h.writers.is_empty());
        h.writers.initiate_truncate_entry();
        run_until_idle().await;

        assert!(!h.writers.should_keep_entry());
        assert!(h.storage.truncations().is_empty());
    }

    #[tokio::test]
    async fn test_truncate_with_validators_keeps_entry() {
        let h = Harness::new();
        let handle = h.add_with_network(false, validated_info());

        let chunk = h.writers.read(handle, 5).await.expect("read");
        assert_eq!(chunk, &BODY[..5]);

        h.writers.remove_transaction(handle, false);
        run_until_idle().await;

        assert!(h.writers.should_keep_entry());
        assert_eq!(h.storage.truncations(), vec![5]);
        assert_eq!(
            h.owner.events(),
            vec![OwnerEvent::DoneWriting {
                success: false,
                should_keep_entry: true
            }]
        );
    }

    #[tokio::test]
    async fn test_resume_seeds_committed_offset() {
        let storage = MockStorageEntry::new();
        storage.preload(&BODY[..10]);
        let owner = RecordingCacheOwner::new();
        let writers = Writers::new(storage.shared(), owner);

        let mut info = validated_info();
        info.truncated = true;
        info.partial = Some(crate::response::PartialState {
            range_start: 0,
            range_end: None,
            current_offset: 10,
        });
        let handle = writers
            .add_transaction(false, RequestPriority::default(), info)
            .expect("add_transaction");
        writers.set_network_transaction(MockNetworkTransaction::new(&BODY[10..]).boxed());

        let mut content = Vec::new();
        loop {
            let chunk = writers.read(handle, 256).await.expect("read");
            if chunk.is_empty() {
                break;
            }
            content.extend_from_slice(&chunk);
        }
        assert_eq!(content, &BODY[10..]);
        // Resumed bytes landed after the previously committed prefix.
        assert_eq!(storage.data(), BODY);
    }
}
