//! Cache configuration.
//!
//! - [`CacheConfig`]: programmatic configuration with builder methods
//! - [`load_config`]: INI configuration file
//! - [`parse_size`]: human-readable sizes ("500MB")

mod file;
mod size;
mod types;

pub use file::{
    default_cache_directory, load_config, parse_config_str, ConfigFileError, DEFAULT_CACHE_NAME,
};
pub use size::{format_size, format_size_approx, parse_size, Size, SizeParseError};
pub use types::{
    CacheConfig, CleanupConfig, DiskConfig, MemoryConfig, DEFAULT_CLEANUP_INTERVAL,
    DEFAULT_DISK_CAPACITY,
};
