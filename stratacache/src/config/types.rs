//! Configuration types for the cache.

use std::path::PathBuf;
use std::time::Duration;

use crate::disk::{EvictionBudget, MetadataMode, DEFAULT_TRIM_RATIO};
use crate::error::CacheError;
use crate::memory::MemoryLimits;

/// Default disk capacity: 100 MB.
pub const DEFAULT_DISK_CAPACITY: u64 = 100 * 1024 * 1024;

/// Default interval between cleanup passes.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Memory tier configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// Whether the cache gets a memory tier at all.
    pub enabled: bool,
    pub limits: MemoryLimits,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limits: MemoryLimits::default(),
        }
    }
}

/// Disk tier configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskConfig {
    /// Allocated size above which cleanup evicts entries.
    pub capacity_bytes: u64,
    /// Fraction of capacity a cleanup pass trims down to (0.0-1.0).
    pub trim_ratio: f64,
    /// Entries not accessed for this long are evicted regardless of size.
    pub max_age: Option<Duration>,
    pub metadata_mode: MetadataMode,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_DISK_CAPACITY,
            trim_ratio: DEFAULT_TRIM_RATIO,
            max_age: None,
            metadata_mode: MetadataMode::Auto,
        }
    }
}

/// Recurring cleanup configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

/// Complete cache configuration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stratacache::config::CacheConfig;
///
/// let config = CacheConfig::new("/tmp/thumbnails")
///     .with_disk_capacity(500 * 1024 * 1024)
///     .with_memory_count_limit(256)
///     .with_cleanup_interval(Duration::from_secs(300));
///
/// assert_eq!(config.disk.capacity_bytes, 500 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Cache root directory.
    pub directory: PathBuf,
    pub memory: MemoryConfig,
    pub disk: DiskConfig,
    pub cleanup: CleanupConfig,
}

impl CacheConfig {
    /// Configuration rooted at `directory` with default settings.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            memory: MemoryConfig::default(),
            disk: DiskConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }

    /// Configuration rooted at `name` under the platform cache directory
    /// (e.g. `~/.cache/name` on Linux).
    pub fn named(name: &str) -> Result<Self, CacheError> {
        if name.trim().is_empty() {
            return Err(CacheError::InvalidConfig(
                "cache name must not be empty".to_string(),
            ));
        }
        let base = dirs::cache_dir().ok_or_else(|| {
            CacheError::InvalidConfig("no platform cache directory available".to_string())
        })?;
        Ok(Self::new(base.join(name)))
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_memory_cost_limit(mut self, limit: u64) -> Self {
        self.memory.limits.cost_limit = Some(limit);
        self
    }

    pub fn with_memory_count_limit(mut self, limit: usize) -> Self {
        self.memory.limits.count_limit = Some(limit);
        self
    }

    /// Run without a memory tier; every lookup goes to disk.
    pub fn without_memory(mut self) -> Self {
        self.memory.enabled = false;
        self
    }

    pub fn with_disk_capacity(mut self, bytes: u64) -> Self {
        self.disk.capacity_bytes = bytes;
        self
    }

    /// Sets the fraction of capacity a cleanup pass trims down to (0.0-1.0).
    pub fn with_trim_ratio(mut self, ratio: f64) -> Self {
        self.disk.trim_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.disk.max_age = max_age;
        self
    }

    pub fn with_metadata_mode(mut self, mode: MetadataMode) -> Self {
        self.disk.metadata_mode = mode;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup.interval = interval;
        self
    }

    pub fn with_cleanup_enabled(mut self, enabled: bool) -> Self {
        self.cleanup.enabled = enabled;
        self
    }

    /// Eviction budget derived from the disk settings.
    pub fn eviction_budget(&self) -> EvictionBudget {
        EvictionBudget::with_trim_ratio(self.disk.capacity_bytes, self.disk.trim_ratio)
            .with_max_age(self.disk.max_age)
    }

    /// Check settings that would make the cache unusable.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.directory.as_os_str().is_empty() {
            return Err(CacheError::InvalidConfig(
                "disk cache root path must not be empty".to_string(),
            ));
        }
        if self.cleanup.interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "cleanup interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
