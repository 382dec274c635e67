//! Shared test utilities for the media-library test suite.
//!
//! Synthetic images are generated with the `image` crate so tests never
//! depend on fixture files, and every record/storage fixture is in memory.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = tempfile::TempDir::new().unwrap();
//! create_test_jpeg(&tmp.path().join("photo.jpg"), 800, 600);
//!
//! let storage = memory_storage();
//! storage.store(&jpeg_bytes(64, 48), "a/cat.jpg", None).unwrap();
//! let record = sample_record("a/cat.jpg", "image/jpeg");
//! ```

use crate::records::{RecordError, RecordStore};
use crate::storage::{MemoryDisk, StorageAdapter};
use crate::types::MediaRecord;
use chrono::Utc;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use uuid::Uuid;

// =========================================================================
// Synthetic images
// =========================================================================

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    }))
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    gradient(width, height).write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// JPEG bytes of a `width` × `height` gradient.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Jpeg)
}

/// PNG bytes of a `width` × `height` gradient.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

/// Write a JPEG gradient to `path`, whatever its extension.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::write(path, jpeg_bytes(width, height)).unwrap();
}

/// A tiny valid SVG document.
pub fn svg_bytes() -> Vec<u8> {
    br#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="24" height="24" viewBox="0 0 24 24">
  <circle cx="12" cy="12" r="10" fill="teal"/>
</svg>
"#
    .to_vec()
}

// =========================================================================
// Records and storage
// =========================================================================

/// A record for `file_path` on the `mem` disk with no dimensions or metadata.
pub fn sample_record(file_path: &str, mime_type: &str) -> MediaRecord {
    let now = Utc::now();
    let file_name = file_path.rsplit('/').next().unwrap_or(file_path).to_string();
    MediaRecord {
        id: Uuid::new_v4(),
        original_file_name: file_name.clone(),
        file_name,
        file_path: file_path.to_string(),
        disk: "mem".to_string(),
        mime_type: mime_type.to_string(),
        file_size_bytes: 0,
        checksum: String::new(),
        width: None,
        height: None,
        title: None,
        alt_text: None,
        caption: None,
        description: None,
        folder_id: None,
        tag_ids: Default::default(),
        metadata: Default::default(),
        uploaded_by: "tester".to_string(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

/// Storage with a single in-memory disk named `mem`, the default.
pub fn memory_storage() -> StorageAdapter {
    StorageAdapter::new("mem").with_disk("mem", MemoryDisk::new())
}

/// A record store whose writes always fail. Reads see an empty store.
pub struct FailingRecordStore;

impl RecordStore for FailingRecordStore {
    fn load(&self, id: Uuid) -> Result<MediaRecord, RecordError> {
        Err(RecordError::NotFound(id))
    }

    fn insert(&self, _record: &MediaRecord) -> Result<(), RecordError> {
        Err(RecordError::Unavailable("database is down".into()))
    }

    fn update(
        &self,
        _id: Uuid,
        _apply: &mut dyn FnMut(&mut MediaRecord),
    ) -> Result<MediaRecord, RecordError> {
        Err(RecordError::Unavailable("database is down".into()))
    }

    fn remove(&self, id: Uuid) -> Result<MediaRecord, RecordError> {
        Err(RecordError::NotFound(id))
    }

    fn list(&self) -> Result<Vec<MediaRecord>, RecordError> {
        Ok(Vec::new())
    }
}
