//! Two-tier cache orchestrator.
//!
//! [`Cache`] puts an optional memory tier in front of a [`DiskStore`]:
//!
//! ```text
//! get(key) ─► memory ─hit─► value
//!               │ miss
//!               ▼
//!         disk I/O queue ─► processing context ─► memory ─► value
//!         (read bytes)      (decode + cost)       (insert)
//!
//! store(value, key) ─► memory (sync) ─► processing context ─► disk I/O queue
//!                                       (encode, optional)    (atomic write)
//! ```
//!
//! All disk work runs on a single serial I/O thread, so disk operations never
//! race with each other. Decode and encode transforms run on Tokio's blocking
//! pool and never hold up the I/O thread. A [`WriteSequencer`] makes removals
//! win over writes that were submitted earlier but reached the disk later,
//! and keeps a slow read from putting a stale value back into memory after
//! the key was stored again or removed.
//!
//! Filesystem failures are logged and counted, never returned: a failed
//! operation simply has no effect.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::cleanup::{self, CleanupScheduler};
use super::queue::DiskQueue;
use super::sequencer::{ReadTicket, WriteSequencer, WriteTicket};
use super::task::DiskTask;
use crate::config::{CacheConfig, CleanupConfig};
use crate::disk::{DiskStore, DiskStoreOptions, EvictionPlanner, EvictionResult, Metadata};
use crate::error::CacheError;
use crate::memory::{MemoryCache, MemoryTier};
use crate::stats::{CacheStats, CacheStatsSnapshot};

/// Name of the disk I/O thread.
pub const IO_THREAD_NAME: &str = "stratacache-io";

/// How often [`Cache::flush`] checks for in-flight transforms.
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Composite memory + disk cache for values of type `V`.
///
/// Cloning is cheap and shares the same tiers, queue and cleanup scheduler.
/// Background work stops when the last clone is dropped or
/// [`shutdown`](Self::shutdown) is called.
pub struct Cache<V> {
    inner: Arc<Shared<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Shared<V> {
    root: PathBuf,
    memory: Option<Arc<dyn MemoryTier<V>>>,
    queue: DiskQueue,
    sequencer: Arc<WriteSequencer>,
    stats: Arc<CacheStats>,
    planner: EvictionPlanner,
    scheduler: CleanupScheduler,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl<V> Drop for Shared<V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.queue.close();
    }
}

impl<V: Send + Sync + 'static> Cache<V> {
    /// Open a cache from `config`.
    ///
    /// Must be called from within a Tokio runtime; the cleanup scheduler and
    /// transform tasks run on it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty root path or outside a runtime,
    /// and `Io` if the root directory cannot be created.
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let options = DiskStoreOptions {
            metadata_mode: config.disk.metadata_mode,
            ..Default::default()
        };
        let store = DiskStore::open_with(&config.directory, options)?;

        let memory = config.memory.enabled.then(|| {
            Arc::new(MemoryCache::new(config.memory.limits)) as Arc<dyn MemoryTier<V>>
        });

        Self::with_parts(store, memory, &config)
    }

    /// Assemble a cache from an already opened store and an optional memory
    /// tier. The memory settings in `config` are ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate or when called
    /// outside a runtime.
    pub fn with_parts(
        store: DiskStore,
        memory: Option<Arc<dyn MemoryTier<V>>>,
        config: &CacheConfig,
    ) -> Result<Self, CacheError> {
        config.validate()?;

        let runtime = Handle::try_current().map_err(|_| {
            CacheError::InvalidConfig("cache must be opened within a Tokio runtime".to_string())
        })?;

        let root = store.root().to_path_buf();
        let queue = DiskQueue::spawn(store, IO_THREAD_NAME)?;
        let stats = Arc::new(CacheStats::new());
        let planner = EvictionPlanner::new(config.eviction_budget());
        let shutdown = CancellationToken::new();

        let (scheduler, scheduler_task) = CleanupScheduler::spawn(
            config.cleanup,
            queue.clone(),
            planner,
            Arc::clone(&stats),
            shutdown.clone(),
        );

        info!(
            root = %root.display(),
            memory_tier = memory.is_some(),
            disk_capacity_bytes = config.disk.capacity_bytes,
            cleanup_interval_secs = config.cleanup.interval.as_secs(),
            cleanup_enabled = config.cleanup.enabled,
            "Cache opened"
        );

        Ok(Self {
            inner: Arc::new(Shared {
                root,
                memory,
                queue,
                sequencer: Arc::new(WriteSequencer::new()),
                stats,
                planner,
                scheduler,
                scheduler_task: Mutex::new(Some(scheduler_task)),
                tracker: TaskTracker::new(),
                shutdown,
                runtime,
            }),
        })
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// The memory tier, if the cache has one.
    pub fn memory(&self) -> Option<&Arc<dyn MemoryTier<V>>> {
        self.inner.memory.as_ref()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Memory tier lookup only. Never touches the disk.
    pub fn cached(&self, key: &str) -> Option<Arc<V>> {
        if key.is_empty() {
            return None;
        }
        self.inner.memory.as_ref()?.get(key)
    }

    /// Look up `key` in memory, then on disk.
    ///
    /// On a disk hit, `decode` turns the bytes into a value on the processing
    /// context, and the value is added to the memory tier with the cost
    /// computed by `cost`. A failed decode is reported as not found and leaves
    /// the memory tier untouched.
    ///
    /// # Arguments
    ///
    /// * `key` - Entry key
    /// * `decode` - Bytes to value transform, `None` on failure
    /// * `cost` - Memory cost of the decoded value
    pub async fn get<D, C>(&self, key: &str, decode: D, cost: C) -> Option<Arc<V>>
    where
        D: FnOnce(&[u8]) -> Option<V> + Send + 'static,
        C: FnOnce(&V) -> u64 + Send + 'static,
    {
        if key.is_empty() {
            return None;
        }
        if let Some(value) = self.memory_lookup(key) {
            return Some(value);
        }

        let ticket = self.inner.sequencer.begin_read(key);
        let bytes = self.read_disk(key).await?;

        let decoded = self
            .inner
            .tracker
            .spawn_blocking_on(
                move || {
                    decode(&bytes).map(|value| {
                        let cost = cost(&value);
                        (value, cost)
                    })
                },
                &self.inner.runtime,
            )
            .await;

        match decoded {
            Ok(Some((value, cost))) => Some(self.remember_read(key, ticket, value, cost)),
            Ok(None) => {
                self.inner.stats.record_decode_failure();
                debug!(key = key, "Decode failed, treating as not found");
                None
            }
            Err(e) => {
                warn!(key = key, error = %e, "Decode task failed");
                None
            }
        }
    }

    /// Blocking variant of [`get`](Self::get).
    ///
    /// Performs the disk read and decode on the calling thread. Must not be
    /// called from within an async context.
    pub fn get_blocking<D, C>(&self, key: &str, decode: D, cost: C) -> Option<Arc<V>>
    where
        D: FnOnce(&[u8]) -> Option<V> + Send + 'static,
        C: FnOnce(&V) -> u64 + Send + 'static,
    {
        if key.is_empty() {
            return None;
        }
        if let Some(value) = self.memory_lookup(key) {
            return Some(value);
        }

        let ticket = self.inner.sequencer.begin_read(key);
        let bytes = match self.submit_read(key).wait() {
            Ok(Some(bytes)) => bytes,
            _ => return None,
        };

        match decode(&bytes) {
            Some(value) => {
                let cost = cost(&value);
                Some(self.remember_read(key, ticket, value, cost))
            }
            None => {
                self.inner.stats.record_decode_failure();
                debug!(key = key, "Decode failed, treating as not found");
                None
            }
        }
    }

    fn memory_lookup(&self, key: &str) -> Option<Arc<V>> {
        let memory = self.inner.memory.as_ref()?;
        match memory.get(key) {
            Some(value) => {
                self.inner.stats.record_memory_hit();
                Some(value)
            }
            None => {
                self.inner.stats.record_memory_miss();
                None
            }
        }
    }

    /// Put a newly stored value into memory.
    fn remember(&self, key: &str, value: V, cost: u64) -> Arc<V> {
        self.inner.sequencer.note_store(key);
        let value = Arc::new(value);
        if let Some(memory) = &self.inner.memory {
            memory.insert(key, Arc::clone(&value), cost);
        }
        value
    }

    /// Put a value decoded from disk into memory, unless the key was stored
    /// or removed while it was being read.
    fn remember_read(&self, key: &str, ticket: ReadTicket, value: V, cost: u64) -> Arc<V> {
        let value = Arc::new(value);
        if let Some(memory) = &self.inner.memory {
            let cached = ticket.commit(|| memory.insert(key, Arc::clone(&value), cost));
            if !cached {
                debug!(key = key, "Key changed during read, not caching");
            }
        }
        value
    }

    async fn read_disk(&self, key: &str) -> Option<Vec<u8>> {
        self.submit_read(key).await.ok().flatten()
    }

    fn submit_read(&self, key: &str) -> DiskTask<Option<Vec<u8>>> {
        let stats = Arc::clone(&self.inner.stats);
        let key = key.to_string();
        self.inner.queue.submit(move |store| {
            match absorb(&stats, "read", &key, store.get(&key)) {
                Some(bytes) => {
                    stats.record_disk_hit();
                    Some(bytes)
                }
                None => {
                    stats.record_disk_miss();
                    None
                }
            }
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────

    /// Store `object` in memory and its already encoded `data` on disk.
    ///
    /// The memory insert happens before this returns. The returned task
    /// resolves to `true` once the bytes are on disk, or `false` if nothing
    /// was written (empty data, superseded by a removal, I/O failure).
    pub fn store_data(&self, object: V, key: &str, cost: u64, data: Vec<u8>) -> DiskTask<bool> {
        if key.is_empty() {
            return DiskTask::ready(false);
        }
        self.remember(key, object, cost);

        if data.is_empty() {
            return DiskTask::ready(false);
        }

        let ticket = self.inner.sequencer.begin_write(key);
        self.submit_write(ticket, data)
    }

    /// Store `object` in memory and its encoded form on disk.
    ///
    /// `encode` runs on the processing context. Returning `None` from it means
    /// "do not persist"; the memory entry stays.
    pub fn store_encoded<E>(&self, object: V, key: &str, cost: u64, encode: E) -> DiskTask<bool>
    where
        E: FnOnce(&V) -> Option<Vec<u8>> + Send + 'static,
    {
        if key.is_empty() {
            return DiskTask::ready(false);
        }
        let object = self.remember(key, object, cost);

        // Taken now so a removal submitted while encoding supersedes this write
        let ticket = self.inner.sequencer.begin_write(key);

        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        let tracker = self.inner.tracker.clone();
        tracker.spawn_on(
            async move {
                let encoded = this
                    .inner
                    .tracker
                    .spawn_blocking_on(move || encode(&*object), &this.inner.runtime)
                    .await;

                let written = match encoded {
                    Ok(Some(data)) if !data.is_empty() => {
                        this.submit_write(ticket, data).await.unwrap_or(false)
                    }
                    Ok(_) => {
                        this.inner.stats.record_encode_failure();
                        debug!(key = ticket.key(), "Encode produced no data, not persisting");
                        drop(ticket);
                        false
                    }
                    Err(e) => {
                        warn!(key = ticket.key(), error = %e, "Encode task failed");
                        drop(ticket);
                        false
                    }
                };
                let _ = tx.send(written);
            },
            &self.inner.runtime,
        );

        DiskTask::new(rx)
    }

    /// Store `object` in the memory tier only.
    pub fn store_in_memory(&self, object: V, key: &str, cost: u64) {
        if !key.is_empty() {
            self.remember(key, object, cost);
        }
    }

    /// Queue the disk write. The ticket retires when the job runs, or when
    /// a closed queue drops it.
    fn submit_write(&self, ticket: WriteTicket, data: Vec<u8>) -> DiskTask<bool> {
        let stats = Arc::clone(&self.inner.stats);

        self.inner.queue.submit(move |store| {
            let written = if ticket.is_current() {
                let written = absorb(&stats, "write", ticket.key(), store.put(ticket.key(), &data));
                if written {
                    stats.record_disk_write();
                }
                written
            } else {
                stats.record_skipped_write();
                debug!(key = ticket.key(), "Write superseded by removal, skipping");
                false
            };
            drop(ticket);
            written
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Removal
    // ─────────────────────────────────────────────────────────────────────

    /// Remove `key` from both tiers.
    ///
    /// The memory entry is gone when this returns. The task resolves to
    /// whether a disk entry was deleted.
    pub fn remove(&self, key: &str) -> DiskTask<bool> {
        if key.is_empty() {
            return DiskTask::ready(false);
        }
        self.inner.sequencer.note_removal(key);
        if let Some(memory) = &self.inner.memory {
            memory.remove(key);
        }

        let stats = Arc::clone(&self.inner.stats);
        let key = key.to_string();
        self.inner
            .queue
            .submit(move |store| absorb(&stats, "remove", &key, store.remove(&key)))
    }

    /// Remove several keys from both tiers in one disk job.
    ///
    /// The task resolves to the number of disk entries deleted.
    pub fn remove_many<I, K>(&self, keys: I) -> DiskTask<usize>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.as_ref().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        for key in &keys {
            self.inner.sequencer.note_removal(key);
            if let Some(memory) = &self.inner.memory {
                memory.remove(key);
            }
        }

        let stats = Arc::clone(&self.inner.stats);
        self.inner.queue.submit(move |store| {
            keys.iter()
                .filter(|key| absorb(&stats, "remove", key, store.remove(key)))
                .count()
        })
    }

    /// Remove everything from both tiers and reset the cache root.
    pub fn remove_all(&self) -> DiskTask<bool> {
        self.inner.sequencer.note_remove_all();
        if let Some(memory) = &self.inner.memory {
            memory.clear();
        }

        let stats = Arc::clone(&self.inner.stats);
        self.inner.queue.submit(move |store| {
            absorb(&stats, "remove all", "*", store.remove_all().map(|_| true))
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Metadata
    // ─────────────────────────────────────────────────────────────────────

    /// Metadata of the disk entry for `key`, `None` if there is no entry.
    pub fn metadata(&self, key: &str) -> DiskTask<Option<Metadata>> {
        self.disk_op("metadata", key, |store, key| store.metadata(key))
    }

    /// Replace the metadata of an existing disk entry.
    pub fn set_metadata(&self, key: &str, metadata: Metadata) -> DiskTask<bool> {
        self.disk_op("set metadata", key, move |store, key| {
            store.set_metadata(key, &metadata)
        })
    }

    /// Update only the given metadata keys of an existing disk entry.
    pub fn merge_metadata(&self, key: &str, values: Metadata) -> DiskTask<bool> {
        self.disk_op("merge metadata", key, move |store, key| {
            store.merge_metadata(key, &values)
        })
    }

    /// Clear the metadata of a disk entry, keeping its data.
    pub fn remove_metadata(&self, key: &str) -> DiskTask<bool> {
        self.disk_op("remove metadata", key, |store, key| store.remove_metadata(key))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Disk introspection
    // ─────────────────────────────────────────────────────────────────────

    pub fn contains_on_disk(&self, key: &str) -> DiskTask<bool> {
        self.disk_op("contains", key, |store, key| Ok(store.contains(key)))
    }

    /// Total allocated size of the disk tier in bytes.
    pub fn disk_size(&self) -> DiskTask<u64> {
        let stats = Arc::clone(&self.inner.stats);
        self.inner
            .queue
            .submit(move |store| absorb(&stats, "size", "*", store.total_size()))
    }

    /// Number of entries in the disk tier.
    pub fn disk_entry_count(&self) -> DiskTask<usize> {
        let stats = Arc::clone(&self.inner.stats);
        self.inner
            .queue
            .submit(move |store| absorb(&stats, "count", "*", store.entry_count()))
    }

    fn disk_op<T, F>(&self, op: &'static str, key: &str, f: F) -> DiskTask<T>
    where
        T: Default + Send + 'static,
        F: FnOnce(&DiskStore, &str) -> Result<T, CacheError> + Send + 'static,
    {
        if key.is_empty() {
            return DiskTask::ready(T::default());
        }
        let stats = Arc::clone(&self.inner.stats);
        let key = key.to_string();
        self.inner
            .queue
            .submit(move |store| absorb(&stats, op, &key, f(store, &key)))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cleanup and lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Run an eviction pass now, queued behind pending disk work.
    pub async fn cleanup_disk(&self) -> Option<EvictionResult> {
        cleanup::run_pass(&self.inner.queue, self.inner.planner, &self.inner.stats).await
    }

    pub fn cleanup_settings(&self) -> CleanupConfig {
        self.inner.scheduler.settings()
    }

    /// Change the interval of the recurring cleanup. Restarts the timer.
    pub fn set_cleanup_interval(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("Ignoring zero cleanup interval");
            return;
        }
        self.inner.scheduler.set_interval(interval);
    }

    /// Enable or disable the recurring cleanup. A pass already running
    /// completes.
    pub fn set_cleanup_enabled(&self, enabled: bool) {
        self.inner.scheduler.set_enabled(enabled);
    }

    /// Wait until every store, removal and metadata operation submitted
    /// before this call has reached the disk.
    pub async fn flush(&self) {
        while !self.inner.tracker.is_empty() {
            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }
        let _ = self.inner.queue.flush().await;
    }

    /// Stop background work: the cleanup scheduler exits, in-flight
    /// transforms finish, and the disk queue drains.
    ///
    /// Operations submitted afterwards have no effect.
    pub async fn shutdown(&self) {
        info!(root = %self.inner.root.display(), "Cache shutting down");

        self.inner.shutdown.cancel();
        let scheduler_task = self.inner.scheduler_task.lock().take();
        if let Some(task) = scheduler_task {
            let _ = task.await;
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        let queue = self.inner.queue.clone();
        let _ = tokio::task::spawn_blocking(move || queue.join()).await;

        info!(root = %self.inner.root.display(), "Cache shut down");
    }
}

/// Convert a store error into "no effect", logging and counting it.
fn absorb<T: Default>(
    stats: &CacheStats,
    op: &str,
    key: &str,
    result: Result<T, CacheError>,
) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            stats.record_io_failure();
            warn!(op = op, key = key, error = %e, "Disk operation failed");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MetadataMode;
    use crate::memory::MemoryLimits;
    use serde_json::json;
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir) -> CacheConfig {
        CacheConfig::new(temp_dir.path().join("cache"))
            .with_metadata_mode(MetadataMode::Sidecar)
            .with_cleanup_enabled(false)
    }

    fn decode(bytes: &[u8]) -> Option<String> {
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn cost(value: &String) -> u64 {
        value.len() as u64
    }

    fn encode(value: &String) -> Option<Vec<u8>> {
        Some(value.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_open_creates_root() {
        let temp_dir = TempDir::new().unwrap();
        let cache: Cache<String> = Cache::open(config(&temp_dir)).unwrap();
        assert!(cache.root().is_dir());
    }

    #[tokio::test]
    async fn test_open_empty_root_is_fatal() {
        let result = Cache::<String>::open(CacheConfig::new(""));
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_open_outside_runtime_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let result = Cache::<String>::open(config(&temp_dir));
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_store_data_then_get() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        let written = cache
            .store_data("hello".to_string(), "k", 5, b"hello".to_vec())
            .await
            .unwrap();
        assert!(written);

        // Visible in memory immediately
        assert_eq!(cache.cached("k").as_deref(), Some(&"hello".to_string()));
        assert!(cache.contains_on_disk("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_falls_back_to_disk_and_repopulates_memory() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        cache
            .store_data("hello".to_string(), "k", 5, b"hello".to_vec())
            .await
            .unwrap();
        cache.memory().unwrap().clear();
        assert!(cache.cached("k").is_none());

        let value = cache.get("k", decode, cost).await;
        assert_eq!(value.as_deref(), Some(&"hello".to_string()));
        assert!(cache.cached("k").is_some());
        assert_eq!(cache.memory().unwrap().total_cost(), 5);

        let stats = cache.stats();
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.memory_misses, 1);
    }

    #[tokio::test]
    async fn test_decode_failure_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let cache: Cache<String> = Cache::open(config(&temp_dir)).unwrap();

        cache
            .store_data("x".to_string(), "k", 1, vec![0xff, 0xfe])
            .await
            .unwrap();
        cache.memory().unwrap().clear();

        assert!(cache.get("k", decode, cost).await.is_none());
        assert!(cache.cached("k").is_none());
        assert_eq!(cache.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let temp_dir = TempDir::new().unwrap();
        let cache: Cache<String> = Cache::open(config(&temp_dir)).unwrap();
        assert!(cache.get("nope", decode, cost).await.is_none());
        assert!(cache.get("", decode, cost).await.is_none());
        assert_eq!(cache.stats().disk_misses, 1);
    }

    #[tokio::test]
    async fn test_store_encoded_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir).without_memory()).unwrap();

        let written = cache
            .store_encoded("payload".to_string(), "k", 7, encode)
            .await
            .unwrap();
        assert!(written);

        let value = cache.get("k", decode, cost).await;
        assert_eq!(value.as_deref(), Some(&"payload".to_string()));
    }

    #[tokio::test]
    async fn test_encode_failure_keeps_memory_entry() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        let written = cache
            .store_encoded("v".to_string(), "k", 1, |_: &String| None)
            .await
            .unwrap();

        assert!(!written);
        assert!(cache.cached("k").is_some());
        assert!(!cache.contains_on_disk("k").await.unwrap());
        assert_eq!(cache.stats().encode_failures, 1);
        assert_eq!(cache.inner.sequencer.pending_keys(), 0);
    }

    #[tokio::test]
    async fn test_empty_data_and_key_are_noops() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        assert!(!cache
            .store_data("v".to_string(), "k", 1, Vec::new())
            .await
            .unwrap());
        assert!(!cache.contains_on_disk("k").await.unwrap());

        assert!(!cache
            .store_data("v".to_string(), "", 1, b"v".to_vec())
            .await
            .unwrap());
        assert!(cache.cached("").is_none());
        assert_eq!(cache.disk_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_slow_encode_does_not_resurrect_removed_entry() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        let write = cache.store_encoded("v".to_string(), "k", 1, |v: &String| {
            std::thread::sleep(Duration::from_millis(100));
            Some(v.as_bytes().to_vec())
        });
        let removed = cache.remove("k");

        assert!(!removed.await.unwrap());
        assert!(!write.await.unwrap());
        cache.flush().await;

        assert!(!cache.contains_on_disk("k").await.unwrap());
        assert!(cache.cached("k").is_none());
        assert_eq!(cache.stats().skipped_writes, 1);
    }

    #[tokio::test]
    async fn test_store_after_remove_is_written() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        let _ = cache.store_data("a".to_string(), "k", 1, b"a".to_vec());
        let _ = cache.remove("k");
        let last = cache.store_data("b".to_string(), "k", 1, b"b".to_vec());

        assert!(last.await.unwrap());
        cache.memory().unwrap().clear();
        let value = cache.get("k", decode, cost).await;
        assert_eq!(value.as_deref(), Some(&"b".to_string()));
    }

    fn slow_decode(bytes: &[u8]) -> Option<String> {
        std::thread::sleep(Duration::from_millis(200));
        decode(bytes)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_store_during_get_keeps_newer_value() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        cache
            .store_data("v1".to_string(), "k", 2, b"v1".to_vec())
            .await
            .unwrap();
        cache.memory().unwrap().clear();

        let reader = cache.clone();
        let read = tokio::spawn(async move { reader.get("k", slow_decode, cost).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(cache
            .store_data("v2".to_string(), "k", 2, b"v2".to_vec())
            .await
            .unwrap());
        let _ = read.await.unwrap();

        assert_eq!(cache.cached("k").as_deref(), Some(&"v2".to_string()));
        cache.memory().unwrap().clear();
        let value = cache.get("k", decode, cost).await;
        assert_eq!(value.as_deref(), Some(&"v2".to_string()));
        assert_eq!(cache.inner.sequencer.pending_reads(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remove_during_get_does_not_resurrect_memory_entry() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        cache
            .store_data("v1".to_string(), "k", 2, b"v1".to_vec())
            .await
            .unwrap();
        cache.memory().unwrap().clear();

        let reader = cache.clone();
        let read = tokio::spawn(async move { reader.get("k", slow_decode, cost).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(cache.remove("k").await.unwrap());
        let _ = read.await.unwrap();

        assert!(cache.cached("k").is_none());
        assert!(!cache.contains_on_disk("k").await.unwrap());
        assert_eq!(cache.inner.sequencer.pending_reads(), 0);
    }

    #[tokio::test]
    async fn test_remove_many() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        for key in ["a", "b", "c"] {
            cache
                .store_data(key.to_string(), key, 1, key.as_bytes().to_vec())
                .await
                .unwrap();
        }
        let removed = cache.remove_many(["a", "c", "missing"]).await.unwrap();

        assert_eq!(removed, 2);
        assert!(cache.cached("a").is_none());
        assert!(cache.cached("b").is_some());
        assert!(cache.contains_on_disk("b").await.unwrap());
        assert!(!cache.contains_on_disk("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_all_clears_both_tiers() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        for key in ["a", "b"] {
            let _ = cache.store_data(key.to_string(), key, 1, vec![1u8; 2048]);
        }
        assert!(cache.remove_all().await.unwrap());

        assert!(cache.memory().unwrap().is_empty());
        assert_eq!(cache.disk_size().await.unwrap(), 0);
        assert!(cache.root().is_dir());

        assert!(cache
            .store_data("c".to_string(), "c", 1, b"c".to_vec())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_metadata_passthrough() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        let mut m = Metadata::new();
        m.insert("etag".to_string(), json!("v1"));

        // No entry yet: no effect
        assert!(!cache.set_metadata("k", m.clone()).await.unwrap());
        assert_eq!(cache.metadata("k").await.unwrap(), None);

        let _ = cache.store_data("v".to_string(), "k", 1, b"v".to_vec());
        assert!(cache.set_metadata("k", m.clone()).await.unwrap());

        let mut extra = Metadata::new();
        extra.insert("width".to_string(), json!(640));
        assert!(cache.merge_metadata("k", extra).await.unwrap());

        let stored = cache.metadata("k").await.unwrap().unwrap();
        assert_eq!(stored.get("etag"), Some(&json!("v1")));
        assert_eq!(stored.get("width"), Some(&json!(640)));

        assert!(cache.remove_metadata("k").await.unwrap());
        assert_eq!(cache.metadata("k").await.unwrap(), Some(Metadata::new()));

        let _ = cache.remove("k");
        assert_eq!(cache.metadata("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_limits_apply() {
        let temp_dir = TempDir::new().unwrap();
        let memory: Arc<dyn MemoryTier<String>> =
            Arc::new(MemoryCache::new(MemoryLimits::unbounded().with_cost_limit(10)));
        let cfg = config(&temp_dir);
        let store = DiskStore::open(&cfg.directory).unwrap();
        let cache = Cache::with_parts(store, Some(memory), &cfg).unwrap();

        for i in 0..5 {
            cache.store_in_memory(format!("value{}", i), &format!("k{}", i), 4);
        }

        let memory = cache.memory().unwrap();
        assert!(memory.total_cost() <= 10);
        assert!(cache.cached("k4").is_some());
        assert!(cache.cached("k0").is_none());
    }

    #[tokio::test]
    async fn test_with_parts_rejects_zero_cleanup_interval() {
        let temp_dir = TempDir::new().unwrap();
        let cfg = config(&temp_dir)
            .with_cleanup_enabled(true)
            .with_cleanup_interval(Duration::ZERO);
        let store = DiskStore::open(&cfg.directory).unwrap();

        let result = Cache::<String>::with_parts(store, None, &cfg);
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_manual_cleanup() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir).with_disk_capacity(0)).unwrap();

        for key in ["a", "b", "c"] {
            let _ = cache.store_data(key.to_string(), key, 1, vec![7u8; 1024]);
        }

        let result = cache.cleanup_disk().await.unwrap();
        assert_eq!(result.files_deleted, 3);
        assert_eq!(cache.disk_size().await.unwrap(), 0);
        assert_eq!(cache.stats().cleanup_runs, 1);
    }

    #[tokio::test]
    async fn test_cleanup_settings_update() {
        let temp_dir = TempDir::new().unwrap();
        let cache: Cache<String> = Cache::open(config(&temp_dir)).unwrap();

        assert!(!cache.cleanup_settings().enabled);
        cache.set_cleanup_enabled(true);
        cache.set_cleanup_interval(Duration::from_secs(5));
        cache.set_cleanup_interval(Duration::ZERO);

        let settings = cache.cleanup_settings();
        assert!(settings.enabled);
        assert_eq!(settings.interval, Duration::from_secs(5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_blocking_from_blocking_context() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir).without_memory()).unwrap();
        cache
            .store_data("v".to_string(), "k", 1, b"v".to_vec())
            .await
            .unwrap();

        let blocking = cache.clone();
        let value = tokio::task::spawn_blocking(move || blocking.get_blocking("k", decode, cost))
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some(&"v".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_writes() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();

        for i in 0..10 {
            let _ = cache.store_encoded(format!("v{}", i), &format!("k{}", i), 1, encode);
        }
        cache.shutdown().await;

        let store = DiskStore::open_with(
            temp_dir.path().join("cache"),
            DiskStoreOptions {
                metadata_mode: MetadataMode::Sidecar,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(store.entry_count().unwrap(), 10);

        // Submissions after shutdown have no effect
        assert!(cache
            .store_data("late".to_string(), "late", 1, b"late".to_vec())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_writes_dropped_by_closed_queue_leave_no_state() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::open(config(&temp_dir)).unwrap();
        cache.shutdown().await;

        for i in 0..5 {
            let key = format!("k{}", i);
            let result = cache
                .store_data(format!("v{}", i), &key, 1, b"v".to_vec())
                .await;
            assert!(matches!(result, Err(CacheError::QueueClosed)));

            let encoded = cache.store_encoded(format!("v{}", i), &key, 1, encode).await;
            assert!(matches!(encoded, Ok(false)));
        }

        assert_eq!(cache.inner.sequencer.pending_keys(), 0);
        assert_eq!(cache.inner.sequencer.pending_reads(), 0);
    }
}
