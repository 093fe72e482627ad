//! Flat, content-addressed file store.
//!
//! Each entry is a single regular file in the cache root, named by hashing
//! its key. The filesystem is the index: a missing file is the only "not
//! cached" signal, and there is no separate index file to keep in sync.
//!
//! # File Layout
//!
//! ```text
//! {root}/{hash(key)}              entry bytes
//! {root}/.{hash(key)}.*.tmp       in-progress atomic write
//! {root}/.{hash(key)}.meta        sidecar metadata (sidecar backend only)
//! ```
//!
//! Names beginning with `.` are never treated as entries.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use tracing::{debug, info};

use super::metadata::{sidecar_owner, Metadata, MetadataBackend, MetadataMode, MetadataStore};
use crate::error::CacheError;
use crate::hasher::{KeyHasher, Sha256Hasher};

/// Temporary files older than this are leftovers from an interrupted write.
const STALE_TEMP_AGE: Duration = Duration::from_secs(300);

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique hidden temp path next to `path`.
pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}-{}.tmp", name, std::process::id(), n))
}

/// Options for opening a [`DiskStore`].
#[derive(Clone)]
pub struct DiskStoreOptions {
    /// Key to file name mapping.
    pub hasher: Arc<dyn KeyHasher>,
    /// Metadata storage strategy.
    pub metadata_mode: MetadataMode,
}

impl Default for DiskStoreOptions {
    fn default() -> Self {
        Self {
            hasher: Arc::new(Sha256Hasher),
            metadata_mode: MetadataMode::Auto,
        }
    }
}

impl std::fmt::Debug for DiskStoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStoreOptions")
            .field("metadata_mode", &self.metadata_mode)
            .finish_non_exhaustive()
    }
}

/// Which filesystem attributes [`DiskStore::enumerate`] should load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFields {
    pub size: bool,
    pub last_access: bool,
}

impl EntryFields {
    pub const NONE: Self = Self {
        size: false,
        last_access: false,
    };
    pub const SIZE: Self = Self {
        size: true,
        last_access: false,
    };
    pub const ALL: Self = Self {
        size: true,
        last_access: true,
    };

    fn needs_metadata(self) -> bool {
        self.size || self.last_access
    }
}

/// One entry found in the cache root.
#[derive(Debug, Clone)]
pub struct DiskEntry {
    /// Hashed file name.
    pub file_name: String,
    /// Full path of the data file.
    pub path: PathBuf,
    /// Allocated size on disk, if requested.
    pub size: Option<u64>,
    /// Last access time, if requested.
    pub last_access: Option<SystemTime>,
}

/// Content-addressed on-disk byte store with out-of-band metadata.
///
/// All methods are blocking. [`crate::cache::Cache`] funnels every call
/// through its serial I/O queue; direct users sharing a store between
/// threads get per-call atomicity only.
pub struct DiskStore {
    root: PathBuf,
    hasher: Arc<dyn KeyHasher>,
    metadata: MetadataStore,
}

impl DiskStore {
    /// Open a store at `root` with the default hasher and metadata mode.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::open_with(root, DiskStoreOptions::default())
    }

    /// Open a store at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty root path and `Io` if the root
    /// cannot be created.
    pub fn open_with(root: impl Into<PathBuf>, options: DiskStoreOptions) -> Result<Self, CacheError> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(CacheError::InvalidConfig(
                "disk cache root path must not be empty".to_string(),
            ));
        }

        fs::create_dir_all(&root)?;
        let metadata = MetadataStore::resolve(options.metadata_mode, &root)?;

        info!(
            root = %root.display(),
            metadata = ?metadata.backend(),
            "Disk store opened"
        );

        Ok(Self {
            root,
            hasher: options.hasher,
            metadata,
        })
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_backend(&self) -> MetadataBackend {
        self.metadata.backend()
    }

    /// File name for `key`, `None` for an empty key.
    pub fn file_name(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            None
        } else {
            Some(self.hasher.file_name(key))
        }
    }

    /// Data file path for `key`, `None` for an empty key.
    pub fn path_for(&self, key: &str) -> Option<PathBuf> {
        self.file_name(key).map(|name| self.root.join(name))
    }

    /// Write `data` under `key`, replacing any previous content.
    ///
    /// The write goes to a hidden temp file that is renamed into place, so
    /// readers see either the old or the new content. Metadata attached to
    /// the previous content is kept.
    ///
    /// Returns `Ok(false)` without touching the disk when `key` or `data` is
    /// empty.
    pub fn put(&self, key: &str, data: &[u8]) -> Result<bool, CacheError> {
        let Some(path) = self.path_for(key) else {
            return Ok(false);
        };
        if data.is_empty() {
            return Ok(false);
        }

        self.ensure_root()?;

        let temp = temp_path_for(&path);
        let result = fs::write(&temp, data)
            .map_err(CacheError::from)
            .and_then(|_| {
                if path.is_file() {
                    self.metadata.carry_over(&path, &temp)
                } else {
                    // Orphaned sidecar from an externally deleted file
                    self.metadata.discard(&path)
                }
            })
            .and_then(|_| fs::rename(&temp, &path).map_err(CacheError::from));

        if let Err(e) = result {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }

        debug!(key = key, bytes = data.len(), "Disk entry written");
        Ok(true)
    }

    /// Read the bytes stored under `key`.
    ///
    /// A successful read marks the entry as just accessed.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(path) = self.path_for(key) else {
            return Ok(None);
        };

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = filetime::set_file_atime(&path, FileTime::now()) {
            debug!(path = %path.display(), error = %e, "Failed to update access time");
        }

        Ok(Some(data))
    }

    /// Check if an entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_some_and(|path| path.is_file())
    }

    /// Delete the entry for `key` and its metadata.
    ///
    /// Returns whether a file was deleted. Absence is not an error.
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        match self.file_name(key) {
            Some(name) => self.remove_file_name(&name),
            None => Ok(false),
        }
    }

    /// Delete an entry by its file name.
    pub fn remove_file_name(&self, file_name: &str) -> Result<bool, CacheError> {
        let path = self.root.join(file_name);
        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        self.metadata.discard(&path)?;
        Ok(removed)
    }

    /// Delete everything under the root and recreate it empty.
    pub fn remove_all(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.root) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        fs::create_dir_all(&self.root)?;
        info!(root = %self.root.display(), "Disk store wiped");
        Ok(())
    }

    /// Total allocated size of all entries in bytes.
    pub fn total_size(&self) -> Result<u64, CacheError> {
        Ok(self
            .enumerate(EntryFields::SIZE)?
            .filter_map(|entry| entry.size)
            .sum())
    }

    /// Number of entries.
    pub fn entry_count(&self) -> Result<usize, CacheError> {
        Ok(self.enumerate(EntryFields::NONE)?.count())
    }

    /// Lazily list all entries, loading the requested attributes.
    pub fn enumerate(&self, fields: EntryFields) -> Result<Entries, CacheError> {
        self.ensure_root()?;
        Ok(Entries {
            inner: fs::read_dir(&self.root)?,
            fields,
        })
    }

    /// Metadata for `key`, `None` if the entry does not exist.
    pub fn metadata(&self, key: &str) -> Result<Option<Metadata>, CacheError> {
        let Some(path) = self.existing_path(key) else {
            return Ok(None);
        };
        Ok(Some(self.metadata.load(&path)?.unwrap_or_default()))
    }

    /// Replace the metadata of an existing entry.
    ///
    /// Returns `Ok(false)` and does nothing if the entry does not exist.
    pub fn set_metadata(&self, key: &str, metadata: &Metadata) -> Result<bool, CacheError> {
        let Some(path) = self.existing_path(key) else {
            return Ok(false);
        };
        self.metadata.save(&path, metadata)?;
        Ok(true)
    }

    /// Update only the given metadata keys of an existing entry.
    pub fn merge_metadata(&self, key: &str, values: &Metadata) -> Result<bool, CacheError> {
        let Some(path) = self.existing_path(key) else {
            return Ok(false);
        };
        let mut merged = self.metadata.load(&path)?.unwrap_or_default();
        merged.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.metadata.save(&path, &merged)?;
        Ok(true)
    }

    /// Clear the metadata of an existing entry without deleting it.
    pub fn remove_metadata(&self, key: &str) -> Result<bool, CacheError> {
        let Some(path) = self.existing_path(key) else {
            return Ok(false);
        };
        self.metadata.clear(&path)?;
        Ok(true)
    }

    /// Remove leftovers of interrupted operations: stale temp files and
    /// sidecars whose data file is gone.
    ///
    /// Returns the number of files removed.
    pub fn sweep_orphans(&self) -> Result<usize, CacheError> {
        self.ensure_root()?;
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.root)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                continue;
            }

            let orphaned = if name.ends_with(".tmp") {
                entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .map(|mtime| now.duration_since(mtime).unwrap_or_default() > STALE_TEMP_AGE)
                    .unwrap_or(false)
            } else if let Some(owner) = sidecar_owner(&name) {
                !self.root.join(owner).exists()
            } else {
                false
            };

            if orphaned && fs::remove_file(entry.path()).is_ok() {
                debug!(file = %name, "Removed orphaned cache file");
                removed += 1;
            }
        }

        Ok(removed)
    }

    fn existing_path(&self, key: &str) -> Option<PathBuf> {
        self.path_for(key).filter(|path| path.is_file())
    }

    /// Recreate the root if something wiped it from under us.
    fn ensure_root(&self) -> Result<(), CacheError> {
        if !self.root.is_dir() {
            fs::create_dir_all(&self.root)?;
        }
        Ok(())
    }
}

/// Iterator over entries in a cache root.
pub struct Entries {
    inner: fs::ReadDir,
    fields: EntryFields,
}

impl Iterator for Entries {
    type Item = DiskEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Failed to read cache directory entry");
                    continue;
                }
            };

            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }

            let (size, last_access) = if self.fields.needs_metadata() {
                match entry.metadata() {
                    Ok(meta) => (
                        self.fields.size.then(|| allocated_size(&meta)),
                        self.fields
                            .last_access
                            .then(|| meta.accessed().or_else(|_| meta.modified()).ok())
                            .flatten(),
                    ),
                    // Deleted between listing and stat
                    Err(_) => continue,
                }
            } else {
                (None, None)
            };

            return Some(DiskEntry {
                file_name,
                path: entry.path(),
                size,
                last_access,
            });
        }
    }
}

/// Space the file occupies on disk, never less than its length.
#[cfg(unix)]
fn allocated_size(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    (meta.blocks() * 512).max(meta.len())
}

#[cfg(not(unix))]
fn allocated_size(meta: &fs::Metadata) -> u64 {
    meta.len()
}
