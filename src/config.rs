//! Library configuration module.
//!
//! Handles loading, validating, and merging the `media.toml` file. Stock
//! defaults are the base layer; a user file overrides any subset of keys.
//! The loaded [`LibraryConfig`] is passed explicitly to the components that
//! need it, nothing reads configuration from global state.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [storage]
//! default_disk = "local"
//! orphan_grace_secs = 3600  # Sweep leaves younger unreferenced blobs alone
//!
//! [storage.disks.local]
//! driver = "local"          # "local" or "memory"
//! root = "storage/media"    # Directory for the local driver
//! url = "/media"            # Public URL prefix for stored keys
//!
//! [records]
//! path = "storage/records.json"
//!
//! [upload]
//! max_file_size = 10485760  # Bytes
//! allowed_mime_types = ["image/jpeg", "image/png", ...]
//! allowed_extensions = ["jpg", "jpeg", "png", ...]
//! path_format = "{year}/{month}"   # Tokens: {year} {month} {day} {user_id}
//!
//! [upload.sanitize]
//! separator = "-"
//! unsafe_characters = [" ", "(", ")", "&", "@", "#", "%", "^", ...]
//!
//! [images]
//! quality = 85
//! enable_thumbnails = true
//! enable_modern_formats = true
//! modern_format = "webp"
//! sharpen_thumbnails = true
//!
//! [[images.sizes]]
//! name = "thumbnail"
//! width = 150
//! height = 150
//! crop = true
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! timeout_secs = 60         # Per-derivative time limit (0 disables)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::OutputFormat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Library configuration loaded from `media.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    /// Named storage disks and the default disk.
    pub storage: StorageConfig,
    /// Where media records are persisted.
    pub records: RecordsConfig,
    /// Upload validation and naming.
    pub upload: UploadConfig,
    /// Thumbnail and modern-format generation.
    pub images: ImagesConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl LibraryConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.storage.disks.contains_key(&self.storage.default_disk) {
            return Err(ConfigError::Validation(format!(
                "storage.default_disk `{}` is not a configured disk",
                self.storage.default_disk
            )));
        }
        for (name, disk) in &self.storage.disks {
            if disk.driver == DiskDriver::Local && disk.root.is_none() {
                return Err(ConfigError::Validation(format!(
                    "storage.disks.{name}: the local driver needs a root"
                )));
            }
        }
        if self.images.quality == 0 || self.images.quality > 100 {
            return Err(ConfigError::Validation(
                "images.quality must be 1-100".into(),
            ));
        }
        if OutputFormat::from_name(&self.images.modern_format).is_none() {
            return Err(ConfigError::Validation(format!(
                "images.modern_format `{}` is not a known format",
                self.images.modern_format
            )));
        }
        let mut seen = HashSet::new();
        for size in &self.images.sizes {
            if size.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "images.sizes entries need a name".into(),
                ));
            }
            if !size
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(ConfigError::Validation(format!(
                    "images.sizes.{}: names may only use letters, digits, `-` and `_`",
                    size.name
                )));
            }
            if !seen.insert(size.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "images.sizes: duplicate size name `{}`",
                    size.name
                )));
            }
            if size.width.is_none() && size.height.is_none() {
                return Err(ConfigError::Validation(format!(
                    "images.sizes.{}: set a width, a height, or both",
                    size.name
                )));
            }
            if size.width == Some(0) || size.height == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "images.sizes.{}: dimensions must be non-zero",
                    size.name
                )));
            }
        }
        if !matches!(self.upload.sanitize.separator, '-' | '_') {
            return Err(ConfigError::Validation(
                "upload.sanitize.separator must be `-` or `_`".into(),
            ));
        }
        Ok(())
    }
}

/// Storage disks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Disk used when an operation names none.
    pub default_disk: String,
    /// Unreferenced blobs younger than this many seconds are not swept.
    /// Uploads and processing runs write blobs before their record points
    /// at them; the window has to outlast the slowest of those.
    pub orphan_grace_secs: u64,
    /// Disks by name.
    pub disks: BTreeMap<String, DiskConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let mut disks = BTreeMap::new();
        disks.insert(
            "local".to_string(),
            DiskConfig {
                driver: DiskDriver::Local,
                root: Some(PathBuf::from("storage/media")),
                url: "/media".to_string(),
            },
        );
        Self {
            default_disk: "local".to_string(),
            orphan_grace_secs: 3600,
            disks,
        }
    }
}

/// Which [`Disk`](crate::storage::Disk) implementation backs a named disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskDriver {
    Local,
    Memory,
}

/// One named disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskConfig {
    pub driver: DiskDriver,
    /// Root directory (local driver only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Public URL prefix for keys on this disk.
    #[serde(default)]
    pub url: String,
}

/// Record persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordsConfig {
    /// JSON file holding all media records.
    pub path: PathBuf,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("storage/records.json"),
        }
    }
}

/// Upload validation and naming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Largest accepted file in bytes (inclusive).
    pub max_file_size: u64,
    /// Accepted MIME types, as detected from content. Empty allows all.
    pub allowed_mime_types: Vec<String>,
    /// Accepted lowercase extensions without the dot. Empty allows all.
    pub allowed_extensions: Vec<String>,
    /// Directory template for stored files.
    pub path_format: String,
    /// Filename sanitization rules.
    pub sanitize: SanitizeConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            allowed_mime_types: [
                "image/jpeg",
                "image/png",
                "image/gif",
                "image/webp",
                "image/avif",
                "image/svg+xml",
                "application/pdf",
                "video/mp4",
                "audio/mpeg",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowed_extensions: [
                "jpg", "jpeg", "png", "gif", "webp", "avif", "svg", "pdf", "mp4", "mp3",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            path_format: "{year}/{month}".to_string(),
            sanitize: SanitizeConfig::default(),
        }
    }
}

/// Filename sanitization rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SanitizeConfig {
    /// Replacement for unsafe characters (`-` or `_`).
    pub separator: char,
    /// Characters replaced by the separator.
    pub unsafe_characters: Vec<char>,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            separator: '-',
            unsafe_characters: vec![
                ' ', '(', ')', '[', ']', '{', '}', '&', '@', '#', '%', '^', '!', '$', '*', '+',
                '=', ',', ';', ':', '\'', '"', '<', '>', '?', '|', '~', '`',
            ],
        }
    }
}

/// Thumbnail and modern-format settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Encoding quality (1 = worst, 100 = best).
    pub quality: u32,
    pub enable_thumbnails: bool,
    pub enable_modern_formats: bool,
    /// Format name for the modern variant (`webp`, `avif`).
    pub modern_format: String,
    /// Apply light unsharp masking to cropped thumbnails.
    pub sharpen_thumbnails: bool,
    /// Named sizes, generated in this order.
    pub sizes: Vec<ImageSize>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            quality: 85,
            enable_thumbnails: true,
            enable_modern_formats: true,
            modern_format: "webp".to_string(),
            sharpen_thumbnails: true,
            sizes: vec![
                ImageSize {
                    name: "thumbnail".to_string(),
                    width: Some(150),
                    height: Some(150),
                    crop: true,
                },
                ImageSize {
                    name: "medium".to_string(),
                    width: Some(300),
                    height: Some(300),
                    crop: false,
                },
                ImageSize {
                    name: "large".to_string(),
                    width: Some(1024),
                    height: Some(1024),
                    crop: false,
                },
            ],
        }
    }
}

/// A named thumbnail size.
///
/// A missing bound leaves that axis free: `{ width = 300 }` scales to 300px
/// wide whatever the height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageSize {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub crop: bool,
}

/// Parallel processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel image processing workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
    /// Time limit for one derivative (thumbnail or conversion), in seconds.
    /// `0` disables the limit.
    pub timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_processes: None,
            timeout_secs: 60,
        }
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(LibraryConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config does not serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay (arrays included) replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Parse TOML text on top of the stock defaults and validate the result.
pub fn parse_config(content: &str) -> Result<LibraryConfig, ConfigError> {
    let overlay: toml::Value = toml::from_str(content)?;
    let merged = merge_toml(stock_defaults_value()?, overlay);
    let config: LibraryConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`.
///
/// A missing file yields the validated stock defaults.
pub fn load_config(path: &Path) -> Result<LibraryConfig, ConfigError> {
    if !path.exists() {
        let config = LibraryConfig::default();
        config.validate()?;
        return Ok(config);
    }
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Returns a fully-commented stock `media.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Media Library Configuration
# ===========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Storage disks
# ---------------------------------------------------------------------------
[storage]
# Disk used when an upload does not name one.
default_disk = "local"

# `sweep` never deletes an unreferenced file younger than this (seconds).
# In-flight uploads and processing runs write files before their record
# points at them. 0 is only safe while nothing else uses the library.
orphan_grace_secs = 3600

[storage.disks.local]
# "local" stores files under `root`; "memory" keeps them in RAM (tests).
driver = "local"
root = "storage/media"
# Prefix used to build public URLs for stored files.
url = "/media"

# ---------------------------------------------------------------------------
# Media records
# ---------------------------------------------------------------------------
[records]
path = "storage/records.json"

# ---------------------------------------------------------------------------
# Uploads
# ---------------------------------------------------------------------------
[upload]
# Largest accepted file, in bytes (10 MiB).
max_file_size = 10485760

# MIME types are detected from file content, not trusted from the client.
allowed_mime_types = [
    "image/jpeg", "image/png", "image/gif", "image/webp", "image/avif",
    "image/svg+xml", "application/pdf", "video/mp4", "audio/mpeg",
]
allowed_extensions = ["jpg", "jpeg", "png", "gif", "webp", "avif", "svg", "pdf", "mp4", "mp3"]

# Directory for stored files. Tokens: {year} {month} {day} {user_id}
path_format = "{year}/{month}"

[upload.sanitize]
# Replacement for unsafe filename characters: "-" or "_".
separator = "-"
unsafe_characters = [
    " ", "(", ")", "[", "]", "{", "}", "&", "@", "#", "%", "^", "!", "$", "*", "+",
    "=", ",", ";", ":", "'", "\"", "<", ">", "?", "|", "~", "`",
]

# ---------------------------------------------------------------------------
# Image processing
# ---------------------------------------------------------------------------
[images]
# Encoding quality for thumbnails and conversions (1 = worst, 100 = best).
quality = 85

enable_thumbnails = true

# Store a modern-format copy next to the original.
enable_modern_formats = true
modern_format = "webp"

# Light unsharp mask on cropped thumbnails.
sharpen_thumbnails = true

# Named sizes, generated in this order. A missing width or height leaves
# that axis free. crop = true produces exactly width x height.
[[images.sizes]]
name = "thumbnail"
width = 150
height = 150
crop = true

[[images.sizes]]
name = "medium"
width = 300
height = 300

[[images.sizes]]
name = "large"
width = 1024
height = 1024

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel image-processing workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# Time limit for a single thumbnail or conversion, in seconds (0 = none).
timeout_secs = 60
"##
}
