//! Recurring disk cleanup.
//!
//! The scheduler sleeps for the configured interval, then queues an eviction
//! pass on the disk I/O queue and waits for it. Interval and enabled flag are
//! published through a `watch` channel so changes apply to the running loop:
//! a change restarts the wait with the new settings, and disabling only stops
//! future passes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::DiskQueue;
use crate::config::CleanupConfig;
use crate::disk::{EvictionPlanner, EvictionResult};
use crate::stats::CacheStats;

/// Queue one eviction pass and wait for it.
///
/// Returns `None` if the pass failed or the queue is closed.
pub(crate) async fn run_pass(
    queue: &DiskQueue,
    planner: EvictionPlanner,
    stats: &CacheStats,
) -> Option<EvictionResult> {
    match queue.submit(move |store| planner.run(store)).await {
        Ok(Ok(result)) => {
            stats.record_cleanup(result.files_deleted, result.bytes_freed);
            Some(result)
        }
        Ok(Err(e)) => {
            stats.record_io_failure();
            warn!(error = %e, "Disk cleanup pass failed");
            None
        }
        Err(e) => {
            debug!(error = %e, "Disk cleanup pass not run");
            None
        }
    }
}

/// Handle to the background cleanup loop.
pub(crate) struct CleanupScheduler {
    settings: watch::Sender<CleanupConfig>,
}

impl CleanupScheduler {
    /// Spawn the cleanup loop on the current Tokio runtime.
    pub(crate) fn spawn(
        initial: CleanupConfig,
        queue: DiskQueue,
        planner: EvictionPlanner,
        stats: Arc<CacheStats>,
        shutdown: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = watch::channel(initial);
        let handle = tokio::spawn(run(rx, queue, planner, stats, shutdown));
        (Self { settings: tx }, handle)
    }

    pub(crate) fn settings(&self) -> CleanupConfig {
        *self.settings.borrow()
    }

    pub(crate) fn set_interval(&self, interval: Duration) {
        self.settings.send_modify(|s| s.interval = interval);
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.settings.send_modify(|s| s.enabled = enabled);
    }
}

async fn run(
    mut settings: watch::Receiver<CleanupConfig>,
    queue: DiskQueue,
    planner: EvictionPlanner,
    stats: Arc<CacheStats>,
    shutdown: CancellationToken,
) {
    let initial = *settings.borrow();
    info!(
        interval_secs = initial.interval.as_secs(),
        enabled = initial.enabled,
        max_size_bytes = ?planner.budget().max_size_bytes,
        "Disk cleanup scheduler starting"
    );

    loop {
        let current = *settings.borrow_and_update();

        if !current.enabled {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                changed = settings.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            changed = settings.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!("Cleanup settings changed, restarting timer");
            }

            _ = tokio::time::sleep(current.interval) => {
                run_pass(&queue, planner, &stats).await;
            }
        }
    }

    info!("Disk cleanup scheduler shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DiskStore, EvictionBudget};
    use tempfile::TempDir;

    fn setup() -> (TempDir, DiskQueue) {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskStore::open(temp_dir.path()).unwrap();
        for i in 0..4 {
            store.put(&format!("key{}", i), &[i as u8; 1024]).unwrap();
        }
        let queue = DiskQueue::spawn(store, "stratacache-io-test").unwrap();
        (temp_dir, queue)
    }

    /// Budget that forces every entry out.
    fn evict_everything() -> EvictionPlanner {
        EvictionPlanner::new(EvictionBudget {
            max_size_bytes: Some(0),
            target_size_bytes: Some(0),
            max_age: None,
        })
    }

    fn enabled(secs: u64) -> CleanupConfig {
        CleanupConfig {
            enabled: true,
            interval: Duration::from_secs(secs),
        }
    }

    async fn entry_count(queue: &DiskQueue) -> usize {
        queue
            .submit(|store| store.entry_count().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_pass_records_stats() {
        let (_temp_dir, queue) = setup();
        let stats = CacheStats::new();

        let result = run_pass(&queue, evict_everything(), &stats).await.unwrap();

        assert_eq!(result.files_deleted, 4);
        assert_eq!(entry_count(&queue).await, 0);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cleanup_runs, 1);
        assert_eq!(snapshot.evicted_entries, 4);
    }

    #[tokio::test]
    async fn test_run_pass_on_closed_queue() {
        let (_temp_dir, queue) = setup();
        queue.close();
        let stats = CacheStats::new();
        assert!(run_pass(&queue, evict_everything(), &stats).await.is_none());
        assert_eq!(stats.snapshot().cleanup_runs, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_after_interval() {
        let (_temp_dir, queue) = setup();
        let stats = Arc::new(CacheStats::new());
        let shutdown = CancellationToken::new();

        let (_scheduler, handle) = CleanupScheduler::spawn(
            enabled(60),
            queue.clone(),
            evict_everything(),
            Arc::clone(&stats),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(stats.snapshot().cleanup_runs, 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        // The pass itself runs on the I/O thread; wait for it off the clock
        queue.flush().await.unwrap();
        while stats.snapshot().cleanup_runs == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(entry_count(&queue).await, 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_scheduler_never_runs() {
        let (_temp_dir, queue) = setup();
        let stats = Arc::new(CacheStats::new());
        let shutdown = CancellationToken::new();

        let config = CleanupConfig {
            enabled: false,
            interval: Duration::from_secs(1),
        };
        let (scheduler, handle) = CleanupScheduler::spawn(
            config,
            queue.clone(),
            evict_everything(),
            Arc::clone(&stats),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(stats.snapshot().cleanup_runs, 0);
        assert_eq!(entry_count(&queue).await, 4);
        assert!(!scheduler.settings().enabled);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_apply_to_running_scheduler() {
        let (_temp_dir, queue) = setup();
        let stats = Arc::new(CacheStats::new());
        let shutdown = CancellationToken::new();

        let (scheduler, handle) = CleanupScheduler::spawn(
            enabled(3600),
            queue.clone(),
            evict_everything(),
            Arc::clone(&stats),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.set_interval(Duration::from_secs(5));
        assert_eq!(scheduler.settings().interval, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        while stats.snapshot().cleanup_runs == 0 {
            tokio::task::yield_now().await;
        }

        scheduler.set_enabled(false);
        shutdown.cancel();
        handle.await.unwrap();
    }
}
