//! Cache entry and maintenance commands.

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use clap::Subcommand;
use stratacache::config::{format_size_approx, CacheConfig, Size};
use stratacache::disk::EntryFields;
use tracing::info;

use super::{finish, open_cache, open_store};
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show disk usage of the cache
    Stats,
    /// List entries on disk, most recently used first
    List {
        /// Show at most this many entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the bytes stored under a key
    Get {
        key: String,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Store the contents of a file under a key
    Put { key: String, file: PathBuf },
    /// Remove the entry for a key
    Remove { key: String },
    /// Remove every entry
    Clear,
    /// Run an eviction pass now
    Gc {
        /// Override the configured disk capacity (e.g. "500MB")
        #[arg(long)]
        max_size: Option<Size>,
        /// Also evict entries not accessed for this many days
        #[arg(long)]
        max_age_days: Option<u64>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Run a cache subcommand.
pub async fn run(action: CacheAction, config: CacheConfig) -> Result<(), CliError> {
    match action {
        CacheAction::Stats => stats(&config),
        CacheAction::List { limit } => list(&config, limit),
        CacheAction::Get { key, output } => get(&config, &key, output).await,
        CacheAction::Put { key, file } => put(&config, &key, file).await,
        CacheAction::Remove { key } => remove(&config, &key).await,
        CacheAction::Clear => clear(&config).await,
        CacheAction::Gc {
            max_size,
            max_age_days,
            json,
        } => gc(config, max_size, max_age_days, json).await,
    }
}

fn stats(config: &CacheConfig) -> Result<(), CliError> {
    let store = open_store(config)?;
    let (count, size) = store
        .enumerate(EntryFields::SIZE)
        .map_err(CliError::CacheOpen)?
        .fold((0usize, 0u64), |(count, size), entry| {
            (count + 1, size + entry.size.unwrap_or(0))
        });

    let capacity = config.disk.capacity_bytes;
    let used_pct = if capacity == 0 {
        0.0
    } else {
        size as f64 / capacity as f64 * 100.0
    };

    println!("Disk cache: {}", store.root().display());
    println!("  Entries:  {}", count);
    println!("  Size:     {}", format_size_approx(size));
    println!(
        "  Capacity: {} ({:.1}% used)",
        format_size_approx(capacity),
        used_pct
    );
    println!("  Metadata: {:?}", store.metadata_backend());
    Ok(())
}

fn list(config: &CacheConfig, limit: Option<usize>) -> Result<(), CliError> {
    let store = open_store(config)?;
    let mut entries: Vec<_> = store
        .enumerate(EntryFields::ALL)
        .map_err(CliError::CacheOpen)?
        .collect();
    entries.sort_by(|a, b| b.last_access.cmp(&a.last_access));

    let now = SystemTime::now();
    for entry in entries.iter().take(limit.unwrap_or(usize::MAX)) {
        let age = entry
            .last_access
            .and_then(|t| now.duration_since(t).ok())
            .map(format_age)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:>10}  {:>8}",
            entry.file_name,
            format_size_approx(entry.size.unwrap_or(0)),
            age
        );
    }
    Ok(())
}

async fn get(config: &CacheConfig, key: &str, output: Option<PathBuf>) -> Result<(), CliError> {
    let cache = open_cache(config)?;
    let value = cache.get(key, |bytes| Some(bytes.to_vec()), |v| v.len() as u64).await;
    cache.shutdown().await;

    let bytes = value.ok_or_else(|| CliError::NotFound(key.to_string()))?;
    match output {
        Some(path) => {
            std::fs::write(&path, bytes.as_slice())
                .map_err(|error| CliError::FileWrite { path: path.clone(), error })?;
            eprintln!("Wrote {} to {}", format_size_approx(bytes.len() as u64), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&bytes)
                .and_then(|_| stdout.flush())
                .map_err(|error| CliError::FileWrite {
                    path: PathBuf::from("<stdout>"),
                    error,
                })?;
        }
    }
    Ok(())
}

async fn put(config: &CacheConfig, key: &str, file: PathBuf) -> Result<(), CliError> {
    let data = std::fs::read(&file).map_err(|error| CliError::FileRead {
        path: file.clone(),
        error,
    })?;
    if key.is_empty() {
        return Err(CliError::InvalidArgument("key must not be empty".to_string()));
    }
    if data.is_empty() {
        return Err(CliError::InvalidArgument(format!(
            "'{}' is empty, nothing to store",
            file.display()
        )));
    }

    let cache = open_cache(config)?;
    let size = data.len() as u64;
    let written = finish(cache.store_data(Vec::new(), key, size, data)).await?;
    cache.shutdown().await;

    if written {
        info!(key = key, bytes = size, "Entry stored from CLI");
        println!("Stored {} under '{}'", format_size_approx(size), key);
        Ok(())
    } else {
        Err(CliError::InvalidArgument(format!(
            "could not store '{}', see log for details",
            key
        )))
    }
}

async fn remove(config: &CacheConfig, key: &str) -> Result<(), CliError> {
    let cache = open_cache(config)?;
    let removed = finish(cache.remove(key)).await?;
    cache.shutdown().await;

    if removed {
        println!("Removed '{}'", key);
        Ok(())
    } else {
        Err(CliError::NotFound(key.to_string()))
    }
}

async fn clear(config: &CacheConfig) -> Result<(), CliError> {
    println!("Clearing disk cache at: {}", config.directory.display());

    let cache = open_cache(config)?;
    let before = finish(cache.disk_size()).await?;
    let count = finish(cache.disk_entry_count()).await?;
    finish(cache.remove_all()).await?;
    cache.shutdown().await;

    println!(
        "Deleted {} entries, freed {}",
        count,
        format_size_approx(before)
    );
    Ok(())
}

async fn gc(
    config: CacheConfig,
    max_size: Option<Size>,
    max_age_days: Option<u64>,
    json: bool,
) -> Result<(), CliError> {
    let mut config = config;
    if let Some(size) = max_size {
        config = config.with_disk_capacity(size.bytes());
    }
    if let Some(days) = max_age_days {
        let secs = days.checked_mul(86_400).ok_or_else(|| {
            CliError::InvalidArgument(format!("--max-age-days {} is too large", days))
        })?;
        config = config.with_max_age(Some(Duration::from_secs(secs)));
    }

    if !json {
        println!(
            "Running eviction at: {} (capacity {})",
            config.directory.display(),
            format_size_approx(config.disk.capacity_bytes)
        );
    }

    let cache = open_cache(&config)?;
    let result = cache.cleanup_disk().await;
    cache.shutdown().await;

    let result = result.ok_or(CliError::CleanupFailed)?;

    if json {
        let text = serde_json::to_string_pretty(&result)
            .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    println!(
        "Deleted {} files, freed {} ({} -> {}), {} leftover files removed in {} ms",
        result.files_deleted,
        format_size_approx(result.bytes_freed),
        format_size_approx(result.size_before),
        format_size_approx(result.size_after),
        result.orphans_removed,
        result.duration_ms
    );
    Ok(())
}

/// Compact age such as "42s", "5m", "3h" or "12d".
fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}
