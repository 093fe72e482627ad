//! Mapping from entry keys to on-disk file names.

use sha2::{Digest, Sha256};

/// Maps a cache key to a fixed-length, filesystem-safe file name.
///
/// Implementations must be deterministic and effectively collision-free,
/// since the file name is the only on-disk identity of an entry.
pub trait KeyHasher: Send + Sync {
    /// Returns the file name for `key`. `key` is never empty.
    fn file_name(&self, key: &str) -> String;
}

/// Default hasher: lowercase hex SHA-256 of the key's UTF-8 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl KeyHasher for Sha256Hasher {
    fn file_name(&self, key: &str) -> String {
        format!("{:x}", Sha256::digest(key.as_bytes()))
    }
}

impl<F> KeyHasher for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn file_name(&self, key: &str) -> String {
        self(key)
    }
}
