//! Blob storage over named disks.
//!
//! A [`Disk`] is one backend (local directory, memory). The
//! [`StorageAdapter`] owns every configured disk by name and resolves
//! `None` to the configured default, so callers never need to know which
//! backend holds a file.
//!
//! ## Failure modes
//!
//! | Operation | Missing key | Backend failure |
//! |---|---|---|
//! | `get` | `Err(StorageError::NotFound)` | `Err(StorageError::Io)` |
//! | `store` | n/a (existing key → `AlreadyExists`) | `Err` |
//! | `put`, `copy`, `move_to`, `delete` | `false` | `false`, logged at `warn` |
//! | `exists` | `false` | `false`, logged at `warn` |
//! | `size`, `mime_type` | `None` | `None`, logged at `warn` |
//! | `modified` | `Ok(None)` | `Err(StorageError::Io)` |
//!
//! Every key is validated before it reaches a disk: non-empty, relative,
//! `/`-separated, without `..` segments, backslashes, or control characters.

mod local;
mod memory;

pub use local::LocalDisk;
pub use memory::MemoryDisk;

use crate::config::{DiskDriver, StorageConfig};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Unknown disk `{0}`")]
    UnknownDisk(String),
    #[error("Invalid storage key `{key}`: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("`{key}` not found on disk `{disk}`")]
    NotFound { disk: String, key: String },
    #[error("`{key}` already exists on disk `{disk}`")]
    AlreadyExists { disk: String, key: String },
    #[error("Storage I/O error on disk `{disk}`: {source}")]
    Io {
        disk: String,
        #[source]
        source: io::Error,
    },
    #[error("Disk `{disk}` is misconfigured: {reason}")]
    Config { disk: String, reason: String },
}

/// One storage backend.
///
/// Keys handed to a disk are already validated by the adapter.
pub trait Disk: Send + Sync {
    /// Read a whole blob. `Ok(None)` when the key does not exist.
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Write a blob, replacing any existing content.
    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;

    /// Write a blob only if the key is free. Returns `false` when taken.
    fn create(&self, key: &str, bytes: &[u8]) -> io::Result<bool>;

    fn exists(&self, key: &str) -> io::Result<bool>;

    /// Remove a blob. Returns `false` when there was nothing to remove.
    fn remove(&self, key: &str) -> io::Result<bool>;

    /// Blob size in bytes. `Ok(None)` when the key does not exist.
    fn size(&self, key: &str) -> io::Result<Option<u64>>;

    /// Last time the blob was written. `Ok(None)` when the key does not exist.
    fn modified(&self, key: &str) -> io::Result<Option<SystemTime>>;

    /// Every stored key.
    fn keys(&self) -> io::Result<Vec<String>>;

    /// Public URL for a key.
    fn url(&self, key: &str) -> String;

    /// Rename a blob. Returns `false` when `from` does not exist.
    fn rename(&self, from: &str, to: &str) -> io::Result<bool> {
        let Some(bytes) = self.read(from)? else {
            return Ok(false);
        };
        self.write(to, &bytes)?;
        self.remove(from)?;
        Ok(true)
    }
}

/// Join a URL prefix and a key with exactly one `/`.
pub(crate) fn join_url(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), key)
    }
}

/// Check that `key` is a safe relative storage key.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let reason = if key.is_empty() {
        Some("empty key")
    } else if key.starts_with('/') {
        Some("absolute key")
    } else if key.contains('\\') {
        Some("backslash in key")
    } else if key.chars().any(char::is_control) {
        Some("control character in key")
    } else if key.split('/').any(|seg| seg == ".." || seg == ".") {
        Some("relative path segment")
    } else if key.split('/').any(str::is_empty) {
        Some("empty path segment")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Named disks plus the default used when an operation names none.
#[derive(Clone)]
pub struct StorageAdapter {
    disks: BTreeMap<String, Arc<dyn Disk>>,
    default_disk: String,
}

impl StorageAdapter {
    /// An adapter with no disks yet; add them with [`with_disk`](Self::with_disk).
    pub fn new(default_disk: impl Into<String>) -> Self {
        Self {
            disks: BTreeMap::new(),
            default_disk: default_disk.into(),
        }
    }

    pub fn with_disk(mut self, name: impl Into<String>, disk: impl Disk + 'static) -> Self {
        self.disks.insert(name.into(), Arc::new(disk));
        self
    }

    /// Build every disk named in `[storage.disks]`.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let mut adapter = Self::new(config.default_disk.clone());
        for (name, disk) in &config.disks {
            adapter = match disk.driver {
                DiskDriver::Local => {
                    let root = disk.root.clone().ok_or_else(|| StorageError::Config {
                        disk: name.clone(),
                        reason: "the local driver needs a root".into(),
                    })?;
                    adapter.with_disk(name.clone(), LocalDisk::new(root, disk.url.clone()))
                }
                DiskDriver::Memory => {
                    adapter.with_disk(name.clone(), MemoryDisk::with_url(disk.url.clone()))
                }
            };
        }
        if !adapter.disks.contains_key(&adapter.default_disk) {
            return Err(StorageError::UnknownDisk(adapter.default_disk));
        }
        Ok(adapter)
    }

    pub fn default_disk(&self) -> &str {
        &self.default_disk
    }

    pub fn disk_names(&self) -> impl Iterator<Item = &str> {
        self.disks.keys().map(String::as_str)
    }

    /// Resolve a disk name, `None` meaning the default disk.
    pub fn resolve_name<'a>(&'a self, disk: Option<&'a str>) -> &'a str {
        disk.unwrap_or(&self.default_disk)
    }

    fn disk<'a>(&'a self, disk: Option<&'a str>) -> Result<(&'a str, &'a dyn Disk), StorageError> {
        let name = self.resolve_name(disk);
        self.disks
            .get(name)
            .map(|d| (name, d.as_ref()))
            .ok_or_else(|| StorageError::UnknownDisk(name.to_string()))
    }

    fn checked<'a>(
        &'a self,
        key: &str,
        disk: Option<&'a str>,
    ) -> Result<(&'a str, &'a dyn Disk), StorageError> {
        validate_key(key)?;
        self.disk(disk)
    }

    /// Store new bytes at `key`, refusing to overwrite. Returns the key.
    pub fn store(
        &self,
        bytes: &[u8],
        key: &str,
        disk: Option<&str>,
    ) -> Result<String, StorageError> {
        let (name, d) = self.checked(key, disk)?;
        let created = d.create(key, bytes).map_err(|source| io_error(name, source))?;
        if !created {
            return Err(StorageError::AlreadyExists {
                disk: name.to_string(),
                key: key.to_string(),
            });
        }
        Ok(key.to_string())
    }

    /// Read the blob at `key`.
    pub fn get(&self, key: &str, disk: Option<&str>) -> Result<Vec<u8>, StorageError> {
        let (name, d) = self.checked(key, disk)?;
        d.read(key)
            .map_err(|source| io_error(name, source))?
            .ok_or_else(|| StorageError::NotFound {
                disk: name.to_string(),
                key: key.to_string(),
            })
    }

    /// Write `content` at `key`, replacing any existing blob.
    pub fn write(&self, key: &str, content: &[u8], disk: Option<&str>) -> Result<(), StorageError> {
        let (name, d) = self.checked(key, disk)?;
        d.write(key, content).map_err(|source| io_error(name, source))
    }

    /// Like [`write`](Self::write), reporting failure as `false`.
    pub fn put(&self, key: &str, content: &[u8], disk: Option<&str>) -> bool {
        self.write(key, content, disk)
            .inspect_err(|e| tracing::warn!(key, error = %e, "put failed"))
            .is_ok()
    }

    pub fn exists(&self, key: &str, disk: Option<&str>) -> bool {
        self.checked(key, disk)
            .and_then(|(name, d)| d.exists(key).map_err(|source| io_error(name, source)))
            .inspect_err(|e| tracing::warn!(key, error = %e, "exists check failed"))
            .unwrap_or(false)
    }

    /// Remove the blob at `key`. `false` when nothing was deleted.
    pub fn delete(&self, key: &str, disk: Option<&str>) -> bool {
        self.checked(key, disk)
            .and_then(|(name, d)| d.remove(key).map_err(|source| io_error(name, source)))
            .inspect_err(|e| tracing::warn!(key, error = %e, "delete failed"))
            .unwrap_or(false)
    }

    /// Copy `from` to `to` on the same disk. `false` when `from` is missing.
    pub fn copy(&self, from: &str, to: &str, disk: Option<&str>) -> bool {
        let result = validate_key(to).and_then(|_| self.checked(from, disk)).and_then(
            |(name, d)| {
                let Some(bytes) = d.read(from).map_err(|source| io_error(name, source))? else {
                    return Ok(false);
                };
                d.write(to, &bytes).map_err(|source| io_error(name, source))?;
                Ok(true)
            },
        );
        result
            .inspect_err(|e| tracing::warn!(from, to, error = %e, "copy failed"))
            .unwrap_or(false)
    }

    /// Move `from` to `to` on the same disk. `false` when `from` is missing.
    pub fn move_to(&self, from: &str, to: &str, disk: Option<&str>) -> bool {
        validate_key(to)
            .and_then(|_| self.checked(from, disk))
            .and_then(|(name, d)| d.rename(from, to).map_err(|source| io_error(name, source)))
            .inspect_err(|e| tracing::warn!(from, to, error = %e, "move failed"))
            .unwrap_or(false)
    }

    /// Public URL for `key`. Fails only for an invalid key or unknown disk.
    pub fn url(&self, key: &str, disk: Option<&str>) -> Result<String, StorageError> {
        let (_, d) = self.checked(key, disk)?;
        Ok(d.url(key))
    }

    /// Size in bytes, `None` when the key is missing.
    pub fn size(&self, key: &str, disk: Option<&str>) -> Option<u64> {
        self.checked(key, disk)
            .and_then(|(name, d)| d.size(key).map_err(|source| io_error(name, source)))
            .inspect_err(|e| tracing::warn!(key, error = %e, "size lookup failed"))
            .ok()
            .flatten()
    }

    /// Last write time of `key`, `None` when the key is missing.
    pub fn modified(
        &self,
        key: &str,
        disk: Option<&str>,
    ) -> Result<Option<SystemTime>, StorageError> {
        let (name, d) = self.checked(key, disk)?;
        d.modified(key).map_err(|source| io_error(name, source))
    }

    /// MIME type sniffed from the stored content, `None` when missing.
    pub fn mime_type(&self, key: &str, disk: Option<&str>) -> Option<String> {
        match self.get(key, disk) {
            Ok(bytes) => Some(crate::mime::detect(&bytes, key)),
            Err(StorageError::NotFound { .. }) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "mime type lookup failed");
                None
            }
        }
    }

    /// Every key stored on the disk, sorted.
    pub fn keys(&self, disk: Option<&str>) -> Result<Vec<String>, StorageError> {
        let (name, d) = self.disk(disk)?;
        let mut keys = d.keys().map_err(|source| io_error(name, source))?;
        keys.sort();
        Ok(keys)
    }
}

fn io_error(disk: &str, source: io::Error) -> StorageError {
    StorageError::Io {
        disk: disk.to_string(),
        source,
    }
}
