//! CLI command implementations.
//!
//! - [`cache`] - Entry and maintenance commands (stats, list, get, put, ...)
//! - [`metadata`] - Per-entry metadata (get, set, remove)

pub mod cache;
pub mod metadata;

use std::path::{Path, PathBuf};

use stratacache::config::{load_config, CacheConfig};
use stratacache::disk::{DiskStore, DiskStoreOptions};
use stratacache::{Cache, DiskTask};

use crate::error::CliError;

/// Default config file: `{platform config dir}/stratacache/config.ini`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stratacache")
        .join("config.ini")
}

/// Load the configuration and apply command-line overrides.
pub fn resolve_config(
    config_path: Option<&Path>,
    directory: Option<PathBuf>,
) -> Result<CacheConfig, CliError> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    let mut config = load_config(&path)?;

    if let Some(dir) = directory {
        config.directory = dir;
    }

    // One-shot commands: no memory tier, no background cleanup
    Ok(config.without_memory().with_cleanup_enabled(false))
}

/// Open the cache described by `config`.
pub fn open_cache(config: &CacheConfig) -> Result<Cache<Vec<u8>>, CliError> {
    Cache::open(config.clone()).map_err(CliError::CacheOpen)
}

/// Open only the disk store, for read-only inspection.
pub fn open_store(config: &CacheConfig) -> Result<DiskStore, CliError> {
    let options = DiskStoreOptions {
        metadata_mode: config.disk.metadata_mode,
        ..Default::default()
    };
    DiskStore::open_with(&config.directory, options).map_err(CliError::CacheOpen)
}

/// Await a disk task, turning a closed queue into a CLI error.
pub async fn finish<T>(task: DiskTask<T>) -> Result<T, CliError> {
    task.await.map_err(CliError::CacheTask)
}
