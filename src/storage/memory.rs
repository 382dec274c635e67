//! In-memory disk for tests and throwaway libraries.

use super::{Disk, join_url};
use std::collections::BTreeMap;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

struct Blob {
    bytes: Vec<u8>,
    modified: SystemTime,
}

impl Blob {
    fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            modified: SystemTime::now(),
        }
    }
}

#[derive(Default)]
pub struct MemoryDisk {
    blobs: Mutex<BTreeMap<String, Blob>>,
    url: String,
}

impl MemoryDisk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            blobs: Mutex::default(),
            url: url.into(),
        }
    }

    fn blobs(&self) -> MutexGuard<'_, BTreeMap<String, Blob>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Disk for MemoryDisk {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.blobs().get(key).map(|b| b.bytes.clone()))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.blobs().insert(key.to_string(), Blob::new(bytes));
        Ok(())
    }

    fn create(&self, key: &str, bytes: &[u8]) -> io::Result<bool> {
        let mut blobs = self.blobs();
        if blobs.contains_key(key) {
            return Ok(false);
        }
        blobs.insert(key.to_string(), Blob::new(bytes));
        Ok(true)
    }

    fn exists(&self, key: &str) -> io::Result<bool> {
        Ok(self.blobs().contains_key(key))
    }

    fn remove(&self, key: &str) -> io::Result<bool> {
        Ok(self.blobs().remove(key).is_some())
    }

    fn size(&self, key: &str) -> io::Result<Option<u64>> {
        Ok(self.blobs().get(key).map(|b| b.bytes.len() as u64))
    }

    fn modified(&self, key: &str) -> io::Result<Option<SystemTime>> {
        Ok(self.blobs().get(key).map(|b| b.modified))
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        Ok(self.blobs().keys().cloned().collect())
    }

    fn url(&self, key: &str) -> String {
        join_url(&self.url, key)
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<bool> {
        let mut blobs = self.blobs();
        match blobs.remove(from) {
            Some(blob) => {
                blobs.insert(to.to_string(), blob);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
