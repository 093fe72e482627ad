//! stratacache - two-tier memory and disk cache
//!
//! A [`Cache`] keeps decoded values in a bounded memory tier and their encoded
//! bytes in a flat, content-addressed directory on disk. Disk work runs on a
//! single serial I/O thread, transforms run on Tokio's blocking pool, and a
//! background scheduler evicts least recently used files to keep the disk tier
//! within its budget.
//!
//! # Example
//!
//! ```no_run
//! use stratacache::{Cache, CacheConfig};
//!
//! # async fn example() -> Result<(), stratacache::CacheError> {
//! let cache: Cache<String> = Cache::open(CacheConfig::named("thumbnails")?)?;
//!
//! cache
//!     .store_data("hello".to_string(), "greeting", 5, b"hello".to_vec())
//!     .await?;
//!
//! let value = cache
//!     .get(
//!         "greeting",
//!         |bytes| String::from_utf8(bytes.to_vec()).ok(),
//!         |s| s.len() as u64,
//!     )
//!     .await;
//! assert_eq!(value.as_deref().map(String::as_str), Some("hello"));
//! # Ok(())
//! # }
//! ```
//!
//! The disk tier can also be used on its own through [`disk::DiskStore`].

pub mod cache;
pub mod config;
pub mod disk;
pub mod error;
pub mod hasher;
pub mod logging;
pub mod memory;
pub mod stats;

pub use cache::{Cache, DiskTask};
pub use config::CacheConfig;
pub use disk::{DiskStore, Metadata};
pub use error::CacheError;
pub use hasher::{KeyHasher, Sha256Hasher};
pub use memory::{MemoryCache, MemoryLimits, MemoryTier};
pub use stats::{CacheStats, CacheStatsSnapshot};

/// Version of the library and CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
