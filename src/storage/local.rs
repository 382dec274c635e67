//! Filesystem disk rooted at a directory.

use super::{Disk, join_url};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Prefix of in-flight temporary files, never reported as keys.
const TEMP_PREFIX: &str = ".tmp";

/// Stores each key as a file under `root`.
///
/// Writes land in a temporary file in the destination directory first and
/// are renamed into place, so readers never observe a partial blob.
pub struct LocalDisk {
    root: PathBuf,
    url: String,
}

impl LocalDisk {
    pub fn new(root: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url: url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |p, seg| p.join(seg))
    }

    fn temp_file_for(&self, path: &Path) -> io::Result<NamedTempFile> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)
    }
}

fn not_found_as<T>(result: io::Result<T>, fallback: T) -> io::Result<T> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(fallback),
        other => other,
    }
}

impl Disk for LocalDisk {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        not_found_as(fs::read(self.path(key)).map(Some), None)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path(key);
        let mut tmp = self.temp_file_for(&path)?;
        tmp.write_all(bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn create(&self, key: &str, bytes: &[u8]) -> io::Result<bool> {
        let path = self.path(key);
        let mut tmp = self.temp_file_for(&path)?;
        tmp.write_all(bytes)?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error),
        }
    }

    fn exists(&self, key: &str) -> io::Result<bool> {
        self.path(key).try_exists()
    }

    fn remove(&self, key: &str) -> io::Result<bool> {
        not_found_as(fs::remove_file(self.path(key)).map(|()| true), false)
    }

    fn size(&self, key: &str) -> io::Result<Option<u64>> {
        not_found_as(fs::metadata(self.path(key)).map(|m| Some(m.len())), None)
    }

    fn modified(&self, key: &str) -> io::Result<Option<SystemTime>> {
        not_found_as(fs::metadata(self.path(key)).and_then(|m| m.modified()).map(Some), None)
    }

    fn keys(&self) -> io::Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file()
                || entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
            {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            keys.push(key.join("/"));
        }
        Ok(keys)
    }

    fn url(&self, key: &str) -> String {
        join_url(&self.url, key)
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<bool> {
        let src = self.path(from);
        if !src.try_exists()? {
            return Ok(false);
        }
        let dst = self.path(to);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(src, dst)?;
        Ok(true)
    }
}
