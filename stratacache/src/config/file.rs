//! INI configuration file support.
//!
//! All settings live in a single `[cache]` section:
//!
//! ```ini
//! [cache]
//! directory = ~/.cache/thumbnails
//! disk_size = 500MB
//! trim_ratio = 0.9
//! max_age_days = 30
//! memory_cost_limit = 64MB
//! memory_count_limit = 1000
//! memory_enabled = true
//! cleanup_interval_secs = 60
//! cleanup_enabled = true
//! metadata = auto
//! ```
//!
//! Every key is optional. Missing keys keep their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::size::parse_size;
use super::types::CacheConfig;
use crate::disk::MetadataMode;

/// Name of the cache directory under the platform cache directory when the
/// file does not set one.
pub const DEFAULT_CACHE_NAME: &str = "stratacache";

const SECTION: &str = "cache";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Errors from loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigFileError {
    fn invalid(key: &str, value: &str, reason: &str) -> Self {
        Self::InvalidValue {
            section: SECTION.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Default cache directory: `{platform cache dir}/stratacache`, or
/// `.stratacache` in the working directory if the platform has none.
pub fn default_cache_directory() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(DEFAULT_CACHE_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", DEFAULT_CACHE_NAME)))
}

/// Load configuration from `path`.
///
/// A missing file yields the default configuration.
pub fn load_config(path: &Path) -> Result<CacheConfig, ConfigFileError> {
    if !path.exists() {
        return Ok(CacheConfig::new(default_cache_directory()));
    }

    let ini = Ini::load_from_file(path)?;
    parse_ini(&ini)
}

/// Parse configuration from INI text.
pub fn parse_config_str(content: &str) -> Result<CacheConfig, ConfigFileError> {
    let ini = Ini::load_from_str(content)
        .map_err(|e| ConfigFileError::ReadError(ini::Error::Parse(e)))?;
    parse_ini(&ini)
}

fn parse_ini(ini: &Ini) -> Result<CacheConfig, ConfigFileError> {
    let mut config = CacheConfig::new(default_cache_directory());

    let Some(section) = ini.section(Some(SECTION)) else {
        return Ok(config);
    };

    if let Some(v) = section.get("directory") {
        let v = v.trim();
        if !v.is_empty() {
            config.directory = expand_tilde(v);
        }
    }
    if let Some(v) = section.get("disk_size") {
        config.disk.capacity_bytes = parse_size(v).map_err(|_| {
            ConfigFileError::invalid(
                "disk_size",
                v,
                "expected format like '20GB', '500MB', or '1024KB'",
            )
        })?;
    }
    if let Some(v) = section.get("trim_ratio") {
        let ratio: f64 = v
            .trim()
            .parse()
            .ok()
            .filter(|r: &f64| (0.0..=1.0).contains(r))
            .ok_or_else(|| {
                ConfigFileError::invalid("trim_ratio", v, "must be a number between 0.0 and 1.0")
            })?;
        config.disk.trim_ratio = ratio;
    }
    if let Some(v) = section.get("max_age_days") {
        let days: u64 = v.trim().parse().map_err(|_| {
            ConfigFileError::invalid("max_age_days", v, "must be a non-negative integer (days)")
        })?;
        let secs = days.checked_mul(SECS_PER_DAY).ok_or_else(|| {
            ConfigFileError::invalid("max_age_days", v, "too large")
        })?;
        config.disk.max_age = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Some(v) = section.get("memory_cost_limit") {
        let limit = parse_size(v).map_err(|_| {
            ConfigFileError::invalid(
                "memory_cost_limit",
                v,
                "expected format like '64MB', '1GB', or '4096'",
            )
        })?;
        config.memory.limits.cost_limit = Some(limit);
    }
    if let Some(v) = section.get("memory_count_limit") {
        let limit: usize = v.trim().parse().map_err(|_| {
            ConfigFileError::invalid("memory_count_limit", v, "must be a non-negative integer")
        })?;
        config.memory.limits.count_limit = Some(limit);
    }
    if let Some(v) = section.get("memory_enabled") {
        config.memory.enabled = parse_bool("memory_enabled", v)?;
    }
    if let Some(v) = section.get("cleanup_interval_secs") {
        let secs: u64 = v
            .trim()
            .parse()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| {
                ConfigFileError::invalid(
                    "cleanup_interval_secs",
                    v,
                    "must be a positive integer (seconds)",
                )
            })?;
        config.cleanup.interval = Duration::from_secs(secs);
    }
    if let Some(v) = section.get("cleanup_enabled") {
        config.cleanup.enabled = parse_bool("cleanup_enabled", v)?;
    }
    if let Some(v) = section.get("metadata") {
        config.disk.metadata_mode = v.parse::<MetadataMode>().map_err(|_| {
            ConfigFileError::invalid("metadata", v, "must be one of: auto, xattr, sidecar")
        })?;
    }

    Ok(config)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigFileError::invalid(key, value, "must be true or false")),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
