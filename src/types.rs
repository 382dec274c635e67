//! The media record data model shared by every stage.
//!
//! Records are serialized as camelCase JSON, both by the JSON record store
//! and by `media-library show`.
//!
//! ## Processing state
//!
//! A record has no status field. Its processing state is the presence of two
//! reserved keys in the [`MediaRecord::metadata`] bag:
//!
//! | Key | Value | Written by |
//! |---|---|---|
//! | `thumbnails` | size name → derived storage key | thumbnail generation |
//! | `modernFormats` | format name → derived storage key | modern-format conversion |
//!
//! An absent key means "not generated yet (or skipped)". Entries are merged
//! additively, so a later partial run never removes a size an earlier run
//! produced, and re-running overwrites the same keys with the same values.

use crate::imaging::Dimensions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Metadata key holding generated thumbnail keys by size name.
pub const THUMBNAILS_KEY: &str = "thumbnails";
/// Metadata key holding converted-format keys by format name.
pub const MODERN_FORMATS_KEY: &str = "modernFormats";

const SVG_MIME: &str = "image/svg+xml";

/// Whether a MIME type names a raster image the pipeline can derive from.
///
/// Everything under `image/` qualifies except SVG.
pub fn is_processable_image(mime_type: &str) -> bool {
    mime_type.starts_with("image/") && mime_type != SVG_MIME
}

/// A stored media file and everything known about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub id: Uuid,
    /// Sanitized, storage-unique file name.
    pub file_name: String,
    /// Name the file was uploaded with.
    pub original_file_name: String,
    /// Storage key of the primary blob.
    pub file_path: String,
    /// Disk holding the primary blob and every derivative.
    pub disk: String,
    pub mime_type: String,
    pub file_size_bytes: u64,
    /// SHA-256 of the uploaded bytes, lowercase hex.
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tag_ids: BTreeSet<String>,
    /// Open extensibility bag. See the module docs for the reserved keys.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MediaRecord {
    pub fn is_processable_image(&self) -> bool {
        is_processable_image(&self.mime_type)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Intrinsic size, when both width and height are known.
    pub fn dimensions(&self) -> Option<Dimensions> {
        Some(Dimensions {
            width: self.width?,
            height: self.height?,
        })
    }

    /// Generated thumbnails: size name → storage key.
    pub fn thumbnails(&self) -> BTreeMap<String, String> {
        self.string_map(THUMBNAILS_KEY)
    }

    /// Converted copies: format name → storage key.
    pub fn modern_formats(&self) -> BTreeMap<String, String> {
        self.string_map(MODERN_FORMATS_KEY)
    }

    /// Storage keys of every derivative referenced from metadata.
    pub fn derived_keys(&self) -> Vec<String> {
        self.thumbnails()
            .into_values()
            .chain(self.modern_formats().into_values())
            .collect()
    }

    /// Merge derivative keys into the reserved metadata maps.
    ///
    /// Existing entries not named in `thumbnails`/`modern_formats` are kept.
    /// An empty input leaves its metadata key untouched (absent stays
    /// absent). Returns whether anything changed.
    pub fn merge_derivatives(
        &mut self,
        thumbnails: &BTreeMap<String, String>,
        modern_formats: &BTreeMap<String, String>,
    ) -> bool {
        let a = self.merge_string_map(THUMBNAILS_KEY, thumbnails);
        let b = self.merge_string_map(MODERN_FORMATS_KEY, modern_formats);
        a || b
    }

    fn string_map(&self, key: &str) -> BTreeMap<String, String> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn merge_string_map(&mut self, key: &str, entries: &BTreeMap<String, String>) -> bool {
        if entries.is_empty() {
            return false;
        }
        let mut merged = self.string_map(key);
        let before = merged.clone();
        merged.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        if merged == before && self.metadata.contains_key(key) {
            return false;
        }
        let object = merged
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        self.metadata
            .insert(key.to_string(), serde_json::Value::Object(object));
        true
    }
}

/// An incoming file: the name the client sent and its bytes.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Declared size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lowercased extension without the dot.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// Caller-supplied facts attached to an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub title: Option<String>,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
    pub description: Option<String>,
    pub folder_id: Option<String>,
    pub tag_ids: BTreeSet<String>,
    /// Disk override; the configured default disk otherwise.
    pub disk: Option<String>,
    /// Recorded as `uploadedBy` instead of the acting principal.
    pub uploaded_by: Option<String>,
}
