//! Cache statistics tracking and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::format_size_approx;

/// Live counters updated by the cache orchestrator.
///
/// Lock-free; every field is an independent relaxed counter, so a
/// [`snapshot`](Self::snapshot) taken during activity may be slightly skewed.
#[derive(Debug)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    decode_failures: AtomicU64,
    disk_writes: AtomicU64,
    skipped_writes: AtomicU64,
    encode_failures: AtomicU64,
    io_failures: AtomicU64,
    evicted_entries: AtomicU64,
    bytes_freed: AtomicU64,
    cleanup_runs: AtomicU64,
    created_at: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            memory_hits: AtomicU64::new(0),
            memory_misses: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            disk_misses: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            disk_writes: AtomicU64::new(0),
            skipped_writes: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            io_failures: AtomicU64::new(0),
            evicted_entries: AtomicU64::new(0),
            bytes_freed: AtomicU64::new(0),
            cleanup_runs: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_miss(&self) {
        self.disk_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_write(&self) {
        self.disk_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// A write superseded by a later removal before it reached the disk.
    pub fn record_skipped_write(&self) {
        self.skipped_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_io_failure(&self) {
        self.io_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed cleanup pass.
    pub fn record_cleanup(&self, files_deleted: usize, bytes_freed: u64) {
        self.cleanup_runs.fetch_add(1, Ordering::Relaxed);
        self.evicted_entries
            .fetch_add(files_deleted as u64, Ordering::Relaxed);
        self.bytes_freed.fetch_add(bytes_freed, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            memory_misses: self.memory_misses.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            disk_misses: self.disk_misses.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            skipped_writes: self.skipped_writes.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            io_failures: self.io_failures.load(Ordering::Relaxed),
            evicted_entries: self.evicted_entries.load(Ordering::Relaxed),
            bytes_freed: self.bytes_freed.load(Ordering::Relaxed),
            cleanup_runs: self.cleanup_runs.load(Ordering::Relaxed),
            uptime: self.created_at.elapsed(),
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    // Memory tier
    pub memory_hits: u64,
    pub memory_misses: u64,

    // Disk tier
    pub disk_hits: u64,
    pub disk_misses: u64,
    pub decode_failures: u64,
    pub disk_writes: u64,
    pub skipped_writes: u64,
    pub encode_failures: u64,
    pub io_failures: u64,

    // Cleanup
    pub evicted_entries: u64,
    pub bytes_freed: u64,
    pub cleanup_runs: u64,

    #[serde(rename = "uptime_secs", serialize_with = "serialize_secs")]
    pub uptime: Duration,
}

fn serialize_secs<S>(duration: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_u64(duration.as_secs())
}

impl CacheStatsSnapshot {
    /// Memory tier hit rate (0.0 to 1.0).
    pub fn memory_hit_rate(&self) -> f64 {
        rate(self.memory_hits, self.memory_misses)
    }

    /// Disk tier hit rate (0.0 to 1.0), over lookups that missed memory.
    pub fn disk_hit_rate(&self) -> f64 {
        rate(self.disk_hits, self.disk_misses)
    }

    /// Overall hit rate (0.0 to 1.0).
    ///
    /// A lookup is a miss only when both tiers miss.
    pub fn overall_hit_rate(&self) -> f64 {
        rate(self.memory_hits + self.disk_hits, self.disk_misses)
    }

    /// Multi-line human-readable report.
    pub fn format(&self) -> String {
        format!(
            "Cache Statistics:\n\
             \n\
             Memory:\n\
             \x20 Hits: {} ({:.1}%)\n\
             \x20 Misses: {}\n\
             \n\
             Disk:\n\
             \x20 Hits: {} ({:.1}%)\n\
             \x20 Misses: {}\n\
             \x20 Decode failures: {}\n\
             \x20 Writes: {} ({} skipped, {} encode failures)\n\
             \x20 I/O failures: {}\n\
             \n\
             Cleanup:\n\
             \x20 Runs: {}\n\
             \x20 Evicted: {} entries ({})\n\
             \n\
             Overall hit rate: {:.1}%\n\
             Uptime: {}s",
            self.memory_hits,
            self.memory_hit_rate() * 100.0,
            self.memory_misses,
            self.disk_hits,
            self.disk_hit_rate() * 100.0,
            self.disk_misses,
            self.decode_failures,
            self.disk_writes,
            self.skipped_writes,
            self.encode_failures,
            self.io_failures,
            self.cleanup_runs,
            self.evicted_entries,
            format_size_approx(self.bytes_freed),
            self.overall_hit_rate() * 100.0,
            self.uptime.as_secs(),
        )
    }
}

fn rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
