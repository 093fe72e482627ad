//! LRU eviction for the disk store.
//!
//! Eviction is split into a pure planning step and a pass that applies the
//! plan to a [`DiskStore`]:
//!
//! 1. Entries are ordered by last access, oldest first, file name breaking
//!    ties so the order is deterministic.
//! 2. Every entry older than the age limit is a victim.
//! 3. If what remains is still over the size limit, further victims are taken
//!    from the front until the remainder is at or below the target size.
//!
//! The target is normally below the limit (90% by default) so a pass leaves
//! headroom for new writes before the next one is needed.

use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;
use tracing::{debug, info};

use super::store::{DiskStore, EntryFields};
use crate::error::CacheError;

/// Default fraction of the size limit a pass trims down to.
pub const DEFAULT_TRIM_RATIO: f64 = 0.9;

/// Size and age limits for the disk tier.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvictionBudget {
    /// Total allocated size that triggers size-based eviction.
    pub max_size_bytes: Option<u64>,
    /// Size a triggered pass trims down to. Defaults to `max_size_bytes`.
    pub target_size_bytes: Option<u64>,
    /// Entries not accessed for longer than this are always evicted.
    pub max_age: Option<Duration>,
}

impl EvictionBudget {
    /// Budget with a size limit and a target of `trim_ratio * max_size`.
    pub fn with_trim_ratio(max_size_bytes: u64, trim_ratio: f64) -> Self {
        let ratio = trim_ratio.clamp(0.0, 1.0);
        Self {
            max_size_bytes: Some(max_size_bytes),
            target_size_bytes: Some((max_size_bytes as f64 * ratio) as u64),
            max_age: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Effective target, never above the limit.
    fn target(&self) -> Option<u64> {
        let max = self.max_size_bytes?;
        Some(self.target_size_bytes.map_or(max, |t| t.min(max)))
    }
}

/// An entry considered for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub file_name: String,
    pub size: u64,
    pub last_access: SystemTime,
}

/// Outcome of planning, before anything is deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Entries to delete, oldest first.
    pub victims: Vec<EvictionCandidate>,
    /// Total size of all candidates.
    pub size_before: u64,
    /// Total size once every victim is deleted.
    pub size_after: u64,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }
}

/// Result of an eviction pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvictionResult {
    /// Number of files deleted
    pub files_deleted: usize,
    /// Total bytes freed
    pub bytes_freed: u64,
    /// Cache size before eviction
    pub size_before: u64,
    /// Cache size after eviction
    pub size_after: u64,
    /// Leftover temp and sidecar files removed
    pub orphans_removed: usize,
    /// Duration of eviction in milliseconds
    pub duration_ms: u64,
}

/// Plans and runs eviction passes under a fixed budget.
#[derive(Debug, Clone, Copy)]
pub struct EvictionPlanner {
    budget: EvictionBudget,
}

impl EvictionPlanner {
    pub fn new(budget: EvictionBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> &EvictionBudget {
        &self.budget
    }

    /// Choose which candidates to delete.
    ///
    /// Pure: the same candidates and `now` always give the same plan.
    pub fn plan(&self, mut candidates: Vec<EvictionCandidate>, now: SystemTime) -> EvictionPlan {
        candidates.sort_by(|a, b| {
            a.last_access
                .cmp(&b.last_access)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });

        let size_before: u64 = candidates.iter().map(|c| c.size).sum();

        let expired = match self.budget.max_age {
            Some(max_age) => candidates.partition_point(|c| {
                now.duration_since(c.last_access).unwrap_or_default() > max_age
            }),
            None => 0,
        };

        let mut remaining = size_before - candidates[..expired].iter().map(|c| c.size).sum::<u64>();
        let mut cut = expired;

        if let (Some(max), Some(target)) = (self.budget.max_size_bytes, self.budget.target()) {
            if remaining > max {
                while cut < candidates.len() && remaining > target {
                    remaining -= candidates[cut].size;
                    cut += 1;
                }
            }
        }

        candidates.truncate(cut);
        EvictionPlan {
            victims: candidates,
            size_before,
            size_after: remaining,
        }
    }

    /// Run one pass against `store`.
    ///
    /// Blocking. Entries that disappear between listing and deletion are
    /// skipped without error.
    pub fn run(&self, store: &DiskStore) -> Result<EvictionResult, CacheError> {
        let start = Instant::now();

        let candidates: Vec<_> = store
            .enumerate(EntryFields::ALL)?
            .map(|entry| EvictionCandidate {
                file_name: entry.file_name,
                size: entry.size.unwrap_or(0),
                last_access: entry.last_access.unwrap_or(SystemTime::UNIX_EPOCH),
            })
            .collect();

        let file_count = candidates.len();
        let plan = self.plan(candidates, SystemTime::now());

        let mut result = EvictionResult {
            size_before: plan.size_before,
            size_after: plan.size_before,
            ..Default::default()
        };

        if !plan.is_empty() {
            info!(
                current_size_bytes = plan.size_before,
                limit_bytes = ?self.budget.max_size_bytes,
                target_bytes = ?self.budget.target(),
                file_count = file_count,
                victims = plan.victims.len(),
                "Disk cache over budget, starting eviction"
            );
        }

        let mut delete_failures = 0usize;
        for victim in &plan.victims {
            match store.remove_file_name(&victim.file_name) {
                Ok(true) => {
                    result.files_deleted += 1;
                    result.bytes_freed += victim.size;
                    result.size_after = result.size_after.saturating_sub(victim.size);
                }
                Ok(false) => {
                    result.size_after = result.size_after.saturating_sub(victim.size);
                }
                Err(e) => {
                    delete_failures += 1;
                    debug!(
                        file = %victim.file_name,
                        error = %e,
                        "Failed to delete cache file during eviction"
                    );
                }
            }
        }

        result.orphans_removed = store.sweep_orphans()?;
        result.duration_ms = start.elapsed().as_millis() as u64;

        if delete_failures > 0 {
            info!(
                delete_failures = delete_failures,
                "Some files could not be deleted during eviction"
            );
        }
        log_eviction_result(&result);

        Ok(result)
    }
}

fn log_eviction_result(result: &EvictionResult) {
    if result.files_deleted == 0 && result.orphans_removed == 0 {
        debug!(
            size_bytes = result.size_before,
            "Disk cache within budget, nothing evicted"
        );
        return;
    }

    info!(
        files_deleted = result.files_deleted,
        bytes_freed = result.bytes_freed,
        size_before = result.size_before,
        size_after = result.size_after,
        orphans_removed = result.orphans_removed,
        duration_ms = result.duration_ms,
        "Disk cache eviction complete"
    );
}
