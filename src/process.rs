//! Derivative generation for stored images.
//!
//! Given a persisted [`MediaRecord`], the pipeline produces one resized
//! variant per configured size and, optionally, a copy in a modern format,
//! then merges the new storage keys into the record's metadata.
//!
//! ## Flow
//!
//! ```text
//! guard ──skip──▶ report (no change)
//!   │
//!   ▼
//! fetch source once ─▶ workspace/source.jpg
//!   │
//!   ├──────────────────────────┐            rayon::join
//!   ▼                          ▼
//! sizes (par_iter, in order)   modern format
//!   │ resize → put            │ encode → put
//!   └──────────┬───────────────┘
//!              ▼
//! RecordStore::update: merge successes into metadata (one atomic step)
//! ```
//!
//! ## Guards
//!
//! | Condition | Thumbnails | Modern format |
//! |---|---|---|
//! | MIME not `image/*` | skipped | skipped |
//! | `image/svg+xml` | skipped | skipped |
//! | feature disabled | skipped | skipped |
//! | MIME equals target format | n/a | skipped (`None`) |
//! | unknown or unsupported target | n/a | skipped (`None`) |
//!
//! ## Failure policy
//!
//! A missing record or source blob is an error: the caller asked to process
//! something that does not exist. Everything that goes wrong with a single
//! derivative (decode error, bad size, storage write, timeout) is logged at
//! `warn`, reported in the [`ProcessReport`], and otherwise ignored. Other
//! sizes and the conversion still run, and the call still succeeds.
//!
//! Pixel work happens in a private working directory. A derivative is
//! written to storage only after its job finished inside the time limit, and
//! its key reaches metadata only after that write succeeded. A job that
//! times out keeps running on its helper thread but can no longer reach
//! storage or metadata.

use crate::config::{ImageSize, LibraryConfig};
use crate::imaging::{
    BackendError, Dimensions, EncodeParams, ImageBackend, OutputFormat, Quality, Sharpening,
    plan_variant,
};
use crate::naming::derived_key;
use crate::records::{RecordError, RecordStore};
use crate::storage::{StorageAdapter, StorageError};
use crate::types::MediaRecord;
use chrono::Utc;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Record error: {0}")]
    Record(#[from] RecordError),
    #[error("Source file {key} not found on disk {disk}")]
    SourceNotFound { disk: String, key: String },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Why one derivative could not be produced.
#[derive(Error, Debug)]
pub enum DerivativeError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("worker thread failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for image processing
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub enable_thumbnails: bool,
    pub enable_modern_formats: bool,
    /// Format name for the modern copy, e.g. `webp`.
    pub modern_format: String,
    pub quality: Quality,
    /// Named sizes, in generation order.
    pub sizes: Vec<ImageSize>,
    /// Unsharp mask for cropped thumbnails.
    pub sharpening: Option<Sharpening>,
    /// Limit for one derivative job. `None` runs jobs inline, unbounded.
    pub timeout: Option<Duration>,
}

impl ProcessConfig {
    /// Build a ProcessConfig from LibraryConfig values.
    pub fn from_library_config(config: &LibraryConfig) -> Self {
        let images = &config.images;
        Self {
            enable_thumbnails: images.enable_thumbnails,
            enable_modern_formats: images.enable_modern_formats,
            modern_format: images.modern_format.clone(),
            quality: Quality::new(images.quality),
            sizes: images.sizes.clone(),
            sharpening: images.sharpen_thumbnails.then(Sharpening::light),
            timeout: match config.processing.timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::from_library_config(&LibraryConfig::default())
    }
}

/// Why a record or derivative was not processed. Not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// MIME type is not `image/*`.
    NotAnImage,
    /// Vector images are served as-is.
    Svg,
    /// The feature is switched off in config.
    Disabled,
    /// The source already is in the target format.
    AlreadyTargetFormat,
    /// No known format by this name.
    UnknownFormat(String),
    /// The engine cannot write this format.
    UnsupportedFormat(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnImage => f.write_str("not a raster image"),
            Self::Svg => f.write_str("SVG"),
            Self::Disabled => f.write_str("disabled"),
            Self::AlreadyTargetFormat => f.write_str("already in target format"),
            Self::UnknownFormat(name) => write!(f, "unknown format {name}"),
            Self::UnsupportedFormat(name) => write!(f, "unsupported format {name}"),
        }
    }
}

/// What happened to one derivative.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantOutcome {
    /// Written to storage under `key`.
    Stored {
        key: String,
        dimensions: Option<Dimensions>,
    },
    Skipped(SkipReason),
    Failed(String),
}

/// One size or format and its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantReport {
    /// Size name or format name.
    pub name: String,
    pub outcome: VariantOutcome,
}

impl VariantReport {
    fn skipped(name: &str, reason: SkipReason) -> Self {
        Self {
            name: name.to_string(),
            outcome: VariantOutcome::Skipped(reason),
        }
    }

    pub fn stored_key(&self) -> Option<&str> {
        match &self.outcome {
            VariantOutcome::Stored { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, VariantOutcome::Failed(_))
    }
}

/// Result of [`Pipeline::process_image`].
#[derive(Debug, Clone)]
pub struct ProcessReport {
    /// The record after merging, or as given when nothing changed.
    pub record: MediaRecord,
    /// Set when the whole record was skipped.
    pub skipped: Option<SkipReason>,
    /// One entry per configured size, in config order. Empty when
    /// thumbnails were skipped as a whole.
    pub thumbnails: Vec<VariantReport>,
    pub modern_format: Option<VariantReport>,
}

impl ProcessReport {
    /// Successfully stored variants (thumbnails and modern format).
    pub fn stored(&self) -> impl Iterator<Item = &VariantReport> {
        self.thumbnails
            .iter()
            .chain(self.modern_format.iter())
            .filter(|v| v.stored_key().is_some())
    }

    pub fn failures(&self) -> impl Iterator<Item = &VariantReport> {
        self.thumbnails
            .iter()
            .chain(self.modern_format.iter())
            .filter(|v| v.is_failure())
    }
}

/// Source bytes fetched once into a private directory.
struct Workspace {
    dir: TempDir,
    source: PathBuf,
}

impl Workspace {
    fn output_for(&self, key: &str) -> PathBuf {
        self.dir.path().join(key.rsplit('/').next().unwrap_or(key))
    }
}

/// Storage key of the `format` copy of `source_key`.
///
/// Normally the source key with the format's extension. When the source
/// already carries that extension (JPEG bytes uploaded as `photo.webp`),
/// the format name is appended to the stem so the copy never replaces the
/// original.
fn modern_key(source_key: &str, format: OutputFormat) -> String {
    let key = derived_key(source_key, None, format.extension());
    if key.eq_ignore_ascii_case(source_key) {
        derived_key(source_key, Some(format.name()), format.extension())
    } else {
        key
    }
}

/// Record-level guard shared by every entry point.
fn record_guard(record: &MediaRecord) -> Option<SkipReason> {
    if record.mime_type == "image/svg+xml" {
        Some(SkipReason::Svg)
    } else if !record.is_processable_image() {
        Some(SkipReason::NotAnImage)
    } else {
        None
    }
}

/// Run `job`, on a helper thread when a limit is set.
///
/// A job that outlives the limit is abandoned: its result is dropped when it
/// finally arrives.
fn run_bounded<T, F>(timeout: Option<Duration>, job: F) -> Result<T, DerivativeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
{
    let Some(limit) = timeout else {
        return Ok(job()?);
    };
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("media-derivative".into())
        .spawn(move || {
            // The receiver is gone after a timeout; nothing to report to.
            let _ = tx.send(job());
        })?;
    match rx.recv_timeout(limit) {
        Ok(result) => Ok(result?),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(DerivativeError::Timeout(limit)),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(DerivativeError::Worker("job panicked".into()))
        }
    }
}

/// Produces and records derivatives for stored images.
pub struct Pipeline<B: ImageBackend + 'static> {
    config: ProcessConfig,
    storage: Arc<StorageAdapter>,
    records: Arc<dyn RecordStore>,
    backend: Arc<B>,
}

impl<B: ImageBackend + 'static> Pipeline<B> {
    pub fn new(
        config: ProcessConfig,
        storage: Arc<StorageAdapter>,
        records: Arc<dyn RecordStore>,
        backend: Arc<B>,
    ) -> Self {
        Self {
            config,
            storage,
            records,
            backend,
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Load the record `id` and process it.
    pub fn process_by_id(&self, id: Uuid) -> Result<ProcessReport, ProcessError> {
        let record = self.records.load(id)?;
        self.process_image(&record)
    }

    /// Generate every enabled derivative for `record` and merge the results
    /// into its stored metadata.
    ///
    /// Only a missing source blob or a failed metadata merge is an error.
    pub fn process_image(&self, record: &MediaRecord) -> Result<ProcessReport, ProcessError> {
        if let Some(reason) = record_guard(record) {
            tracing::debug!(
                id = %record.id,
                mime = %record.mime_type,
                %reason,
                "processing skipped"
            );
            return Ok(ProcessReport {
                record: record.clone(),
                skipped: Some(reason),
                thumbnails: Vec::new(),
                modern_format: None,
            });
        }

        let want_thumbnails = self.config.enable_thumbnails && !self.config.sizes.is_empty();
        let modern_skip = if self.config.enable_modern_formats {
            self.modern_guard(record, &self.config.modern_format).err()
        } else {
            Some(SkipReason::Disabled)
        };

        let (thumbnails, modern_format) = if want_thumbnails || modern_skip.is_none() {
            let ws = self.fetch_source(record)?;
            let (thumbnails, modern) = rayon::join(
                || {
                    if want_thumbnails {
                        self.thumbnail_reports(record, &ws)
                    } else {
                        Vec::new()
                    }
                },
                || match &modern_skip {
                    Some(reason) => {
                        VariantReport::skipped(&self.config.modern_format, reason.clone())
                    }
                    None => self.modern_report(record, &self.config.modern_format, &ws),
                },
            );
            (thumbnails, modern)
        } else {
            let reason = modern_skip.unwrap_or(SkipReason::Disabled);
            (
                Vec::new(),
                VariantReport::skipped(&self.config.modern_format, reason),
            )
        };

        let new_thumbnails = stored_map(&thumbnails);
        let new_formats = stored_map(std::slice::from_ref(&modern_format));
        let record = if new_thumbnails.is_empty() && new_formats.is_empty() {
            record.clone()
        } else {
            self.records.update(record.id, &mut |r| {
                if r.merge_derivatives(&new_thumbnails, &new_formats) {
                    r.updated_at = Utc::now();
                }
            })?
        };

        let report = ProcessReport {
            record,
            skipped: None,
            thumbnails,
            modern_format: Some(modern_format),
        };
        tracing::info!(
            id = %report.record.id,
            stored = report.stored().count(),
            failed = report.failures().count(),
            "processed"
        );
        Ok(report)
    }

    /// Generate every configured size for `record`.
    ///
    /// Returns size name → storage key for the sizes that succeeded; failed
    /// sizes are logged and left out. Empty for records that are not raster
    /// images. Does not touch the stored record.
    pub fn generate_thumbnails(
        &self,
        record: &MediaRecord,
    ) -> Result<BTreeMap<String, String>, ProcessError> {
        if let Some(reason) = record_guard(record) {
            tracing::debug!(id = %record.id, %reason, "thumbnails skipped");
            return Ok(BTreeMap::new());
        }
        if self.config.sizes.is_empty() {
            return Ok(BTreeMap::new());
        }
        let ws = self.fetch_source(record)?;
        Ok(stored_map(&self.thumbnail_reports(record, &ws)))
    }

    /// Store a copy of `record` in `format` (e.g. `"webp"`).
    ///
    /// Returns the new storage key, or `None` when the record is not a raster
    /// image, is already in that format, the format is unknown or
    /// unsupported, or the conversion failed. Does not touch the stored
    /// record.
    pub fn convert_to_modern_format(
        &self,
        record: &MediaRecord,
        format: &str,
    ) -> Result<Option<String>, ProcessError> {
        if let Some(reason) = record_guard(record) {
            tracing::debug!(id = %record.id, %reason, "conversion skipped");
            return Ok(None);
        }
        if let Err(reason) = self.modern_guard(record, format) {
            tracing::debug!(id = %record.id, format, %reason, "conversion skipped");
            return Ok(None);
        }
        let ws = self.fetch_source(record)?;
        Ok(self
            .modern_report(record, format, &ws)
            .stored_key()
            .map(String::from))
    }

    fn modern_guard(&self, record: &MediaRecord, name: &str) -> Result<OutputFormat, SkipReason> {
        let format =
            OutputFormat::from_name(name).ok_or_else(|| SkipReason::UnknownFormat(name.into()))?;
        if record.mime_type == format.mime_type() {
            return Err(SkipReason::AlreadyTargetFormat);
        }
        if !self.backend.supports(format) {
            return Err(SkipReason::UnsupportedFormat(format.name().into()));
        }
        Ok(format)
    }

    fn fetch_source(&self, record: &MediaRecord) -> Result<Workspace, ProcessError> {
        let bytes = self
            .storage
            .get(&record.file_path, Some(&record.disk))
            .map_err(|e| match e {
                StorageError::NotFound { disk, key } => ProcessError::SourceNotFound { disk, key },
                other => ProcessError::Storage(other),
            })?;
        let dir = tempfile::Builder::new().prefix("media-process-").tempdir()?;
        let ext = Path::new(&record.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let source = dir.path().join(format!("source.{ext}"));
        std::fs::write(&source, bytes)?;
        Ok(Workspace { dir, source })
    }

    /// Format thumbnails of `record` are written in: the source format when
    /// the engine can write it, PNG otherwise (GIF, TIFF).
    fn thumbnail_format(&self, record: &MediaRecord) -> OutputFormat {
        OutputFormat::from_mime_type(&record.mime_type)
            .filter(|f| self.backend.supports(*f))
            .unwrap_or(OutputFormat::Png)
    }

    fn thumbnail_reports(&self, record: &MediaRecord, ws: &Workspace) -> Vec<VariantReport> {
        let format = self.thumbnail_format(record);
        self.config
            .sizes
            .par_iter()
            .map(|size| {
                let key = derived_key(&record.file_path, Some(&size.name), format.extension());
                let output = ws.output_for(&key);
                let params = plan_variant(
                    &ws.source,
                    &output,
                    size,
                    format,
                    self.config.quality,
                    self.config.sharpening,
                );
                let backend = Arc::clone(&self.backend);
                let result = run_bounded(self.config.timeout, move || backend.resize(&params))
                    .and_then(|dims| {
                        self.store_output(record, &output, &key)?;
                        Ok(dims)
                    });
                self.outcome(record, &size.name, key, result.map(Some))
            })
            .collect()
    }

    fn modern_report(&self, record: &MediaRecord, name: &str, ws: &Workspace) -> VariantReport {
        let format = match self.modern_guard(record, name) {
            Ok(format) => format,
            Err(reason) => return VariantReport::skipped(name, reason),
        };
        let key = modern_key(&record.file_path, format);
        let output = ws.output_for(&key);
        let params = EncodeParams {
            source: ws.source.clone(),
            output: output.clone(),
            format,
            quality: self.config.quality,
        };
        let backend = Arc::clone(&self.backend);
        let result = run_bounded(self.config.timeout, move || backend.encode(&params))
            .and_then(|()| self.store_output(record, &output, &key));
        self.outcome(record, format.name(), key, result.map(|()| None))
    }

    fn store_output(
        &self,
        record: &MediaRecord,
        output: &Path,
        key: &str,
    ) -> Result<(), DerivativeError> {
        let bytes = std::fs::read(output)?;
        self.storage.write(key, &bytes, Some(&record.disk))?;
        Ok(())
    }

    fn outcome(
        &self,
        record: &MediaRecord,
        name: &str,
        key: String,
        result: Result<Option<Dimensions>, DerivativeError>,
    ) -> VariantReport {
        let outcome = match result {
            Ok(dimensions) => {
                tracing::debug!(id = %record.id, variant = name, %key, "derivative stored");
                VariantOutcome::Stored { key, dimensions }
            }
            Err(e) => {
                tracing::warn!(id = %record.id, variant = name, error = %e, "derivative failed");
                VariantOutcome::Failed(e.to_string())
            }
        };
        VariantReport {
            name: name.to_string(),
            outcome,
        }
    }
}

fn stored_map(reports: &[VariantReport]) -> BTreeMap<String, String> {
    reports
        .iter()
        .filter_map(|r| r.stored_key().map(|k| (r.name.clone(), k.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::RustBackend;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::imaging::ResizeMode;
    use crate::records::MemoryRecordStore;
    use crate::test_helpers::{jpeg_bytes, memory_storage, png_bytes, sample_record};
    use crate::types::{MODERN_FORMATS_KEY, THUMBNAILS_KEY};

    fn size(name: &str, width: Option<u32>, height: Option<u32>, crop: bool) -> ImageSize {
        ImageSize {
            name: name.to_string(),
            width,
            height,
            crop,
        }
    }

    fn config(sizes: Vec<ImageSize>) -> ProcessConfig {
        ProcessConfig {
            enable_thumbnails: true,
            enable_modern_formats: true,
            modern_format: "webp".into(),
            quality: Quality::new(80),
            sizes,
            sharpening: Some(Sharpening::light()),
            timeout: Some(Duration::from_secs(30)),
        }
    }

    struct Fixture<B: ImageBackend + 'static> {
        storage: Arc<StorageAdapter>,
        records: Arc<MemoryRecordStore>,
        pipeline: Pipeline<B>,
    }

    fn fixture<B: ImageBackend + 'static>(config: ProcessConfig, backend: B) -> Fixture<B> {
        let storage = Arc::new(memory_storage());
        let records = Arc::new(MemoryRecordStore::new());
        let pipeline = Pipeline::new(
            config,
            Arc::clone(&storage),
            records.clone(),
            Arc::new(backend),
        );
        Fixture {
            storage,
            records,
            pipeline,
        }
    }

    /// Store `bytes` and a matching record, returning the record.
    fn seed<B: ImageBackend + 'static>(
        f: &Fixture<B>,
        key: &str,
        mime: &str,
        bytes: &[u8],
    ) -> MediaRecord {
        f.storage.store(bytes, key, None).unwrap();
        let record = sample_record(key, mime);
        f.records.insert(&record).unwrap();
        record
    }

    // =========================================================================
    // ProcessConfig
    // =========================================================================

    #[test]
    fn process_config_default_values() {
        let config = ProcessConfig::default();
        assert!(config.enable_thumbnails);
        assert!(config.enable_modern_formats);
        assert_eq!(config.modern_format, "webp");
        assert_eq!(config.quality.value(), 85);
        assert_eq!(config.sizes.len(), 3);
        assert_eq!(config.sharpening, Some(Sharpening::light()));
        assert_eq!(config.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn process_config_zero_timeout_is_unbounded() {
        let mut library = LibraryConfig::default();
        library.processing.timeout_secs = 0;
        library.images.sharpen_thumbnails = false;
        let config = ProcessConfig::from_library_config(&library);
        assert_eq!(config.timeout, None);
        assert_eq!(config.sharpening, None);
    }

    // =========================================================================
    // Guards
    // =========================================================================

    #[test]
    fn non_raster_records_are_skipped_without_io() {
        let f = fixture(config(vec![size("thumb", Some(10), Some(10), true)]), MockBackend::new());
        for mime in ["image/svg+xml", "application/pdf", "video/mp4", "audio/mpeg"] {
            // No blob stored: any fetch would fail with SourceNotFound.
            let record = sample_record("missing/file.bin", mime);
            assert!(f.pipeline.generate_thumbnails(&record).unwrap().is_empty());
            assert_eq!(f.pipeline.convert_to_modern_format(&record, "webp").unwrap(), None);
            let report = f.pipeline.process_image(&record).unwrap();
            assert!(report.skipped.is_some());
            assert!(report.record.metadata.is_empty());
        }
        assert!(f.pipeline.backend.get_operations().is_empty());
    }

    #[test]
    fn svg_skip_reason_is_svg() {
        let f = fixture(config(vec![]), MockBackend::new());
        let report = f
            .pipeline
            .process_image(&sample_record("logo.svg", "image/svg+xml"))
            .unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Svg));
    }

    #[test]
    fn conversion_to_same_format_is_none() {
        let f = fixture(config(vec![]), MockBackend::new());
        let record = seed(&f, "a/photo.webp", "image/webp", b"RIFF....WEBP");
        assert_eq!(f.pipeline.convert_to_modern_format(&record, "webp").unwrap(), None);
        assert!(f.pipeline.backend.get_operations().is_empty());
    }

    #[test]
    fn conversion_to_unknown_or_unsupported_format_is_none() {
        let f = fixture(config(vec![]), MockBackend::new().without_format(OutputFormat::Avif));
        let record = seed(&f, "a/photo.jpg", "image/jpeg", &jpeg_bytes(8, 8));
        assert_eq!(f.pipeline.convert_to_modern_format(&record, "jxl").unwrap(), None);
        assert_eq!(f.pipeline.convert_to_modern_format(&record, "avif").unwrap(), None);
        assert!(f.pipeline.backend.get_operations().is_empty());
    }

    #[test]
    fn missing_source_is_an_error() {
        let f = fixture(config(vec![size("thumb", Some(10), Some(10), true)]), MockBackend::new());
        let record = sample_record("a/gone.jpg", "image/jpeg");
        f.records.insert(&record).unwrap();
        assert!(matches!(
            f.pipeline.process_image(&record),
            Err(ProcessError::SourceNotFound { .. })
        ));
        assert!(matches!(
            f.pipeline.generate_thumbnails(&record),
            Err(ProcessError::SourceNotFound { .. })
        ));
    }

    #[test]
    fn missing_record_is_an_error() {
        let f = fixture(config(vec![]), MockBackend::new());
        assert!(matches!(
            f.pipeline.process_by_id(Uuid::new_v4()),
            Err(ProcessError::Record(RecordError::NotFound(_)))
        ));
    }

    // =========================================================================
    // Thumbnails with the mock backend
    // =========================================================================

    #[test]
    fn sizes_are_planned_in_config_order() {
        let f = fixture(
            config(vec![
                size("thumbnail", Some(150), Some(150), true),
                size("medium", Some(300), None, false),
            ]),
            MockBackend::new(),
        );
        let record = seed(&f, "2026/10/cat.jpg", "image/jpeg", b"jpeg");

        let thumbs = f.pipeline.generate_thumbnails(&record).unwrap();
        assert_eq!(thumbs["thumbnail"], "2026/10/cat-thumbnail.jpg");
        assert_eq!(thumbs["medium"], "2026/10/cat-medium.jpg");

        let resizes: Vec<RecordedOp> = f
            .pipeline
            .backend
            .get_operations()
            .into_iter()
            .filter(|op| matches!(op, RecordedOp::Resize { .. }))
            .collect();
        assert_eq!(resizes.len(), 2);
        assert!(resizes.iter().any(|op| matches!(
            op,
            RecordedOp::Resize {
                width: Some(150),
                height: Some(150),
                mode: ResizeMode::Crop,
                quality: 80,
                sharpening: Some(_),
                ..
            }
        )));
        assert!(resizes.iter().any(|op| matches!(
            op,
            RecordedOp::Resize {
                width: Some(300),
                height: None,
                mode: ResizeMode::Fit,
                sharpening: None,
                ..
            }
        )));

        // Thumbnails alone never touch the record.
        assert!(f.records.load(record.id).unwrap().metadata.is_empty());
    }

    #[test]
    fn one_failing_size_does_not_stop_the_others() {
        let f = fixture(
            config(vec![
                size("thumbnail", Some(150), Some(150), true),
                size("medium", Some(300), Some(300), false),
            ]),
            MockBackend::new().failing_on("cat-medium.jpg"),
        );
        let record = seed(&f, "a/cat.jpg", "image/jpeg", b"jpeg");

        let report = f.pipeline.process_image(&record).unwrap();
        assert_eq!(report.thumbnails.len(), 2);
        assert_eq!(report.thumbnails[0].name, "thumbnail");
        assert!(report.thumbnails[0].stored_key().is_some());
        assert!(report.thumbnails[1].is_failure());
        assert_eq!(report.failures().count(), 1);

        let stored = f.records.load(record.id).unwrap();
        assert_eq!(stored.thumbnails().keys().collect::<Vec<_>>(), vec!["thumbnail"]);
        assert_eq!(stored.modern_formats()["webp"], "a/cat.webp");
        assert!(!f.storage.exists("a/cat-medium.jpg", None));
    }

    #[test]
    fn png_sources_get_png_thumbnails() {
        let f = fixture(config(vec![size("small", Some(10), Some(10), false)]), MockBackend::new());
        let record = seed(&f, "icons/app.png", "image/png", b"png");
        let thumbs = f.pipeline.generate_thumbnails(&record).unwrap();
        assert_eq!(thumbs["small"], "icons/app-small.png");
    }

    #[test]
    fn gif_sources_get_png_thumbnails() {
        let f = fixture(config(vec![size("small", Some(10), Some(10), false)]), MockBackend::new());
        let record = seed(&f, "fun/cat.gif", "image/gif", b"GIF89a");
        let thumbs = f.pipeline.generate_thumbnails(&record).unwrap();
        assert_eq!(thumbs["small"], "fun/cat-small.png");
    }

    // =========================================================================
    // Feature switches
    // =========================================================================

    #[test]
    fn disabled_thumbnails_leave_metadata_without_thumbnails() {
        let mut cfg = config(vec![size("thumbnail", Some(150), Some(150), true)]);
        cfg.enable_thumbnails = false;
        let f = fixture(cfg, MockBackend::new());
        let record = seed(&f, "a/cat.jpg", "image/jpeg", b"jpeg");

        let report = f.pipeline.process_image(&record).unwrap();
        assert!(report.thumbnails.is_empty());
        assert!(!report.record.metadata.contains_key(THUMBNAILS_KEY));
        assert!(report.record.metadata.contains_key(MODERN_FORMATS_KEY));
    }

    #[test]
    fn everything_disabled_fetches_nothing() {
        let mut cfg = config(vec![size("thumbnail", Some(150), Some(150), true)]);
        cfg.enable_thumbnails = false;
        cfg.enable_modern_formats = false;
        let f = fixture(cfg, MockBackend::new());
        // No blob stored, so a fetch would fail.
        let record = sample_record("a/cat.jpg", "image/jpeg");

        let report = f.pipeline.process_image(&record).unwrap();
        assert_eq!(
            report.modern_format.unwrap().outcome,
            VariantOutcome::Skipped(SkipReason::Disabled)
        );
        assert!(report.record.metadata.is_empty());
    }

    // =========================================================================
    // Idempotence and merging
    // =========================================================================

    #[test]
    fn rerun_yields_same_keys() {
        let f = fixture(
            config(vec![
                size("thumbnail", Some(150), Some(150), true),
                size("medium", Some(300), None, false),
            ]),
            MockBackend::new(),
        );
        let record = seed(&f, "a/cat.jpg", "image/jpeg", b"jpeg");

        let first = f.pipeline.process_image(&record).unwrap().record;
        let second = f.pipeline.process_by_id(record.id).unwrap().record;
        assert_eq!(first.thumbnails(), second.thumbnails());
        assert_eq!(first.modern_formats(), second.modern_formats());
        assert_eq!(second.thumbnails().len(), 2);
        assert_eq!(f.storage.keys(None).unwrap().len(), 4);
    }

    #[test]
    fn partial_rerun_keeps_earlier_sizes() {
        let sizes = vec![
            size("thumbnail", Some(150), Some(150), true),
            size("medium", Some(300), None, false),
        ];
        let storage = Arc::new(memory_storage());
        let records: Arc<MemoryRecordStore> = Arc::new(MemoryRecordStore::new());
        storage.store(b"jpeg", "a/cat.jpg", None).unwrap();
        let record = sample_record("a/cat.jpg", "image/jpeg");
        records.insert(&record).unwrap();

        let healthy = Pipeline::new(
            config(sizes.clone()),
            Arc::clone(&storage),
            records.clone(),
            Arc::new(MockBackend::new()),
        );
        healthy.process_image(&record).unwrap();

        let flaky = Pipeline::new(
            config(sizes),
            Arc::clone(&storage),
            records.clone(),
            Arc::new(MockBackend::new().failing_on("cat-medium.jpg")),
        );
        let report = flaky.process_image(&record).unwrap();
        assert_eq!(report.failures().count(), 1);
        assert_eq!(
            records.load(record.id).unwrap().thumbnails().len(),
            2,
            "a failed rerun must not drop the earlier medium entry"
        );
    }

    #[test]
    fn merge_preserves_foreign_metadata() {
        let f = fixture(config(vec![size("thumb", Some(10), Some(10), true)]), MockBackend::new());
        let record = seed(&f, "a/cat.jpg", "image/jpeg", b"jpeg");
        f.records
            .update(record.id, &mut |r| {
                r.metadata.insert("source".into(), serde_json::json!("scanner"));
            })
            .unwrap();

        let report = f.pipeline.process_image(&record).unwrap();
        assert_eq!(report.record.metadata["source"], "scanner");
        assert_eq!(report.record.thumbnails().len(), 1);
    }

    // =========================================================================
    // Real backend
    // =========================================================================

    #[test]
    fn real_images_end_to_end() {
        let f = fixture(
            config(vec![
                size("thumbnail", Some(150), Some(150), true),
                size("medium", Some(300), None, false),
                size("broken", Some(0), Some(0), false),
            ]),
            RustBackend::new(),
        );
        let record = seed(&f, "2026/10/photo.jpg", "image/jpeg", &jpeg_bytes(800, 600));

        let report = f.pipeline.process_image(&record).unwrap();
        let thumbs = report.record.thumbnails();
        assert_eq!(thumbs.keys().collect::<Vec<_>>(), vec!["medium", "thumbnail"]);
        assert_eq!(report.record.modern_formats()["webp"], "2026/10/photo.webp");

        let dims = |key: &str| {
            let bytes = f.storage.get(key, None).unwrap();
            let img = image::load_from_memory(&bytes).unwrap();
            (img.width(), img.height())
        };
        assert_eq!(dims(&thumbs["thumbnail"]), (150, 150));
        assert_eq!(dims(&thumbs["medium"]), (300, 225));
        assert_eq!(dims("2026/10/photo.webp"), (800, 600));

        let broken = report.thumbnails.iter().find(|v| v.name == "broken").unwrap();
        assert!(broken.is_failure());
    }

    #[test]
    fn corrupt_source_fails_every_derivative_but_not_the_call() {
        let f = fixture(config(vec![size("thumb", Some(10), Some(10), true)]), RustBackend::new());
        let record = seed(&f, "a/broken.png", "image/png", b"\x89PNG\r\n\x1a\n garbage");

        let report = f.pipeline.process_image(&record).unwrap();
        assert_eq!(report.failures().count(), 2);
        assert!(report.record.metadata.is_empty());
    }

    #[test]
    fn png_to_webp_conversion() {
        let f = fixture(config(vec![]), RustBackend::new());
        let record = seed(&f, "icons/logo.png", "image/png", &png_bytes(40, 30));
        let key = f.pipeline.convert_to_modern_format(&record, "webp").unwrap().unwrap();
        assert_eq!(key, "icons/logo.webp");
        assert_eq!(f.storage.mime_type(&key, None).as_deref(), Some("image/webp"));
    }

    #[test]
    fn modern_key_never_equals_the_source_key() {
        assert_eq!(modern_key("a/photo.jpg", OutputFormat::WebP), "a/photo.webp");
        assert_eq!(modern_key("a/photo.webp", OutputFormat::WebP), "a/photo-webp.webp");
        assert_eq!(modern_key("photo.avif", OutputFormat::Avif), "photo-avif.avif");
    }

    #[test]
    fn mislabelled_source_keeps_its_original_blob() {
        let f = fixture(config(vec![size("thumb", Some(16), Some(16), true)]), RustBackend::new());
        let original = jpeg_bytes(64, 48);
        // JPEG content stored under a .webp key
        let record = seed(&f, "a/photo.webp", "image/jpeg", &original);

        let report = f.pipeline.process_image(&record).unwrap();

        assert_eq!(report.failures().count(), 0);
        assert_eq!(report.record.modern_formats()["webp"], "a/photo-webp.webp");
        assert_eq!(report.record.thumbnails()["thumb"], "a/photo-thumb.jpg");
        assert_eq!(f.storage.get("a/photo.webp", None).unwrap(), original);
        assert_eq!(
            f.storage.mime_type("a/photo-webp.webp", None).as_deref(),
            Some("image/webp")
        );
    }

    // =========================================================================
    // Timeouts
    // =========================================================================

    /// Backend whose every operation sleeps longer than any test timeout.
    struct SlowBackend;

    impl ImageBackend for SlowBackend {
        fn identify(&self, _path: &Path) -> Result<Dimensions, BackendError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Dimensions { width: 1, height: 1 })
        }

        fn resize(
            &self,
            _params: &crate::imaging::ResizeParams,
        ) -> Result<Dimensions, BackendError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Dimensions { width: 1, height: 1 })
        }

        fn encode(&self, _params: &EncodeParams) -> Result<(), BackendError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        }

        fn supports(&self, _format: OutputFormat) -> bool {
            true
        }
    }

    #[test]
    fn timed_out_derivatives_are_failures() {
        let mut cfg = config(vec![size("thumb", Some(10), Some(10), true)]);
        cfg.timeout = Some(Duration::from_millis(20));
        let f = fixture(cfg, SlowBackend);
        let record = seed(&f, "a/cat.jpg", "image/jpeg", b"jpeg");

        let report = f.pipeline.process_image(&record).unwrap();
        assert_eq!(report.failures().count(), 2);
        let expected = DerivativeError::Timeout(Duration::from_millis(20)).to_string();
        assert_eq!(report.thumbnails[0].outcome, VariantOutcome::Failed(expected));
        assert!(report.record.metadata.is_empty());
        assert_eq!(f.storage.keys(None).unwrap(), vec!["a/cat.jpg"]);
    }

    #[test]
    fn run_bounded_inline_without_limit() {
        let value = run_bounded(None, || Ok::<_, BackendError>(42)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn run_bounded_propagates_job_errors() {
        let err = run_bounded(Some(Duration::from_secs(5)), || {
            Err::<(), _>(BackendError::ProcessingFailed("boom".into()))
        })
        .unwrap_err();
        assert!(matches!(err, DerivativeError::Backend(_)));
    }
}
