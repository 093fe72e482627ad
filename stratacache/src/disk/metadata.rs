//! Per-entry metadata stored out-of-band from the entry bytes.
//!
//! Metadata is a small JSON object attached to the data file, either as an
//! extended attribute or, where the filesystem refuses extended attributes,
//! as a hidden sidecar file next to it:
//!
//! ```text
//! {root}/{file_name}          entry bytes
//! {root}/.{file_name}.meta    sidecar metadata (sidecar backend only)
//! ```
//!
//! Neither form outlives the data file: the store deletes the sidecar
//! together with the data file, and an extended attribute disappears with the
//! inode it is attached to.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::CacheError;

/// Metadata mapping attached to a disk entry.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Extended attribute holding the serialized metadata.
pub const METADATA_ATTRIBUTE: &str = "user.stratacache.metadata";

/// Suffix of sidecar metadata files.
pub const SIDECAR_SUFFIX: &str = ".meta";

/// Requested metadata storage strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataMode {
    /// Use extended attributes when the cache root supports them.
    #[default]
    Auto,
    /// Require extended attributes.
    ExtendedAttributes,
    /// Always use sidecar files.
    Sidecar,
}

impl FromStr for MetadataMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "xattr" | "extended_attributes" => Ok(Self::ExtendedAttributes),
            "sidecar" => Ok(Self::Sidecar),
            other => Err(format!("unknown metadata mode '{}'", other)),
        }
    }
}

/// Storage strategy actually in use for a cache root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataBackend {
    ExtendedAttributes,
    Sidecar,
}

/// Reads and writes metadata for data files under one cache root.
///
/// All methods take the data file path; whether the entry exists is the
/// caller's concern.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    backend: MetadataBackend,
}

impl MetadataStore {
    /// Resolve `mode` against the filesystem holding `root`.
    ///
    /// `root` must already exist. Requiring extended attributes on a
    /// filesystem without them is a configuration error.
    pub fn resolve(mode: MetadataMode, root: &Path) -> Result<Self, CacheError> {
        let backend = match mode {
            MetadataMode::Sidecar => MetadataBackend::Sidecar,
            MetadataMode::ExtendedAttributes => {
                if !xattrs::supported(root) {
                    return Err(CacheError::InvalidConfig(format!(
                        "extended attributes are not supported at {}",
                        root.display()
                    )));
                }
                MetadataBackend::ExtendedAttributes
            }
            MetadataMode::Auto => {
                if xattrs::supported(root) {
                    MetadataBackend::ExtendedAttributes
                } else {
                    MetadataBackend::Sidecar
                }
            }
        };

        debug!(root = %root.display(), backend = ?backend, "Metadata backend selected");
        Ok(Self { backend })
    }

    pub fn backend(&self) -> MetadataBackend {
        self.backend
    }

    /// Load the stored mapping, `None` if nothing is stored.
    pub fn load(&self, data_path: &Path) -> Result<Option<Metadata>, CacheError> {
        let raw = match self.backend {
            MetadataBackend::ExtendedAttributes => xattrs::get(data_path)?,
            MetadataBackend::Sidecar => match fs::read(sidecar_path(data_path)) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            },
        };

        match raw {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Replace the stored mapping.
    pub fn save(&self, data_path: &Path, metadata: &Metadata) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(metadata)?;
        match self.backend {
            MetadataBackend::ExtendedAttributes => xattrs::set(data_path, &bytes)?,
            MetadataBackend::Sidecar => {
                let sidecar = sidecar_path(data_path);
                let temp = super::store::temp_path_for(&sidecar);
                if let Err(e) = fs::write(&temp, &bytes).and_then(|_| fs::rename(&temp, &sidecar))
                {
                    let _ = fs::remove_file(&temp);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Remove the stored mapping, keeping the data file.
    pub fn clear(&self, data_path: &Path) -> Result<(), CacheError> {
        match self.backend {
            MetadataBackend::ExtendedAttributes => xattrs::remove(data_path)?,
            MetadataBackend::Sidecar => remove_if_present(&sidecar_path(data_path))?,
        }
        Ok(())
    }

    /// Drop whatever out-of-band state belongs to a data file that is being
    /// deleted or created from scratch.
    pub(crate) fn discard(&self, data_path: &Path) -> Result<(), CacheError> {
        if self.backend == MetadataBackend::Sidecar {
            remove_if_present(&sidecar_path(data_path))?;
        }
        Ok(())
    }

    /// Copy metadata from the file being replaced onto its replacement.
    pub(crate) fn carry_over(&self, from: &Path, to: &Path) -> Result<(), CacheError> {
        if self.backend == MetadataBackend::ExtendedAttributes {
            if let Some(bytes) = xattrs::get(from)? {
                xattrs::set(to, &bytes)?;
            }
        }
        Ok(())
    }
}

/// Sidecar file for a data file: `.{name}.meta` in the same directory.
pub fn sidecar_path(data_path: &Path) -> PathBuf {
    let name = data_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    data_path.with_file_name(format!(".{}{}", name, SIDECAR_SUFFIX))
}

/// Data file name a sidecar belongs to, if `name` is a sidecar name.
pub(crate) fn sidecar_owner(name: &str) -> Option<&str> {
    name.strip_prefix('.')?
        .strip_suffix(SIDECAR_SUFFIX)
        .filter(|owner| !owner.is_empty())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(unix)]
mod xattrs {
    use std::fs;
    use std::io;
    use std::path::Path;

    use super::METADATA_ATTRIBUTE;

    pub(super) fn supported(root: &Path) -> bool {
        let marker = root.join(".xattr-check");
        if fs::write(&marker, b"").is_err() {
            return false;
        }
        let supported = xattr::set(&marker, METADATA_ATTRIBUTE, b"{}").is_ok();
        let _ = fs::remove_file(&marker);
        supported
    }

    pub(super) fn get(path: &Path) -> io::Result<Option<Vec<u8>>> {
        xattr::get(path, METADATA_ATTRIBUTE)
    }

    pub(super) fn set(path: &Path, value: &[u8]) -> io::Result<()> {
        xattr::set(path, METADATA_ATTRIBUTE, value)
    }

    pub(super) fn remove(path: &Path) -> io::Result<()> {
        // Removing an absent attribute is ENODATA/ENOATTR depending on OS.
        if xattr::get(path, METADATA_ATTRIBUTE)?.is_some() {
            xattr::remove(path, METADATA_ATTRIBUTE)?;
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod xattrs {
    use std::io;
    use std::path::Path;

    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            "extended attributes are not available on this platform",
        )
    }

    pub(super) fn supported(_root: &Path) -> bool {
        false
    }

    pub(super) fn get(_path: &Path) -> io::Result<Option<Vec<u8>>> {
        Err(unsupported())
    }

    pub(super) fn set(_path: &Path, _value: &[u8]) -> io::Result<()> {
        Err(unsupported())
    }

    pub(super) fn remove(_path: &Path) -> io::Result<()> {
        Err(unsupported())
    }
}
