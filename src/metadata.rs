//! Intrinsic facts about uploaded files.
//!
//! ## Dimensions
//!
//! [`MetadataExtractor`] reads width and height from the image header
//! through the [`ImageBackend`]. The backend reports *why* a file could not
//! be read (`Result<Dimensions, BackendError>`); this module is the
//! boundary where that becomes `None`, because an upload never fails just
//! because a file could not be introspected. Misses are logged at `debug`.
//!
//! Only headers are read, never pixels, so identifying a large photo is
//! cheap. AVIF dimensions come from the container metadata.
//!
//! Audio and video durations are not extracted.
//!
//! ## Caller-supplied text
//!
//! [`resolve`] picks the first meaningful value from several optional
//! sources. Upload uses it for `uploadedBy` (override → acting principal)
//! and to turn blank descriptive fields into `None`.

use crate::imaging::{Dimensions, ImageBackend};
use std::io::Write;
use std::path::Path;

/// Reads image dimensions, mapping every failure to `None`.
pub struct MetadataExtractor<'a, B: ImageBackend> {
    backend: &'a B,
}

impl<'a, B: ImageBackend> MetadataExtractor<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Width and height of the image at `path`, or `None` when the file is
    /// missing, corrupt, or not an image.
    pub fn extract_image_dimensions(&self, path: &Path) -> Option<Dimensions> {
        match self.backend.identify(path) {
            Ok(dims) if dims.width > 0 && dims.height > 0 => Some(dims),
            Ok(dims) => {
                tracing::debug!(path = %path.display(), ?dims, "ignoring degenerate dimensions");
                None
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "dimensions unavailable");
                None
            }
        }
    }

    /// Like [`extract_image_dimensions`](Self::extract_image_dimensions) for
    /// in-memory bytes. `file_name` only supplies the extension hint.
    pub fn dimensions_of(&self, bytes: &[u8], file_name: &str) -> Option<Dimensions> {
        let suffix = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        let staged = tempfile::Builder::new()
            .prefix("media-identify-")
            .suffix(&suffix)
            .tempfile()
            .and_then(|mut tmp| tmp.write_all(bytes).map(|()| tmp));
        match staged {
            Ok(tmp) => self.extract_image_dimensions(tmp.path()),
            Err(e) => {
                tracing::debug!(file_name, error = %e, "could not stage bytes for identify");
                None
            }
        }
    }
}

/// Resolve a field from multiple sources.
///
/// Takes optional values in priority order and returns the first one that
/// is non-empty after trimming, trimmed.
///
/// ```text
/// uploadedBy: resolve(&[options.uploaded_by, Some(actor)])
/// title:      resolve(&[options.title])
/// ```
pub fn resolve(sources: &[Option<&str>]) -> Option<String> {
    sources
        .iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::RustBackend;
    use crate::test_helpers::{create_test_jpeg, jpeg_bytes, png_bytes, svg_bytes};
    use tempfile::TempDir;

    // =========================================================================
    // dimensions
    // =========================================================================

    #[test]
    fn extracts_jpeg_dimensions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photo.jpg");
        create_test_jpeg(&path, 800, 600);

        let backend = RustBackend::new();
        let dims = MetadataExtractor::new(&backend).extract_image_dimensions(&path);
        assert_eq!(dims, Some(Dimensions { width: 800, height: 600 }));
    }

    #[test]
    fn missing_file_is_none() {
        let backend = RustBackend::new();
        let dims = MetadataExtractor::new(&backend)
            .extract_image_dimensions(Path::new("/nonexistent/photo.jpg"));
        assert_eq!(dims, None);
    }

    #[test]
    fn corrupt_file_is_none() {
        let backend = RustBackend::new();
        let extractor = MetadataExtractor::new(&backend);
        assert_eq!(extractor.dimensions_of(b"\xFF\xD8\xFF garbage", "broken.jpg"), None);
        assert_eq!(extractor.dimensions_of(b"%PDF-1.4", "doc.pdf"), None);
    }

    #[test]
    fn svg_has_no_raster_dimensions() {
        let backend = RustBackend::new();
        assert_eq!(
            MetadataExtractor::new(&backend).dimensions_of(&svg_bytes(), "logo.svg"),
            None
        );
    }

    #[test]
    fn dimensions_of_bytes() {
        let backend = RustBackend::new();
        let extractor = MetadataExtractor::new(&backend);
        assert_eq!(
            extractor.dimensions_of(&jpeg_bytes(64, 48), "a.jpg"),
            Some(Dimensions { width: 64, height: 48 })
        );
        // Content wins over a wrong extension.
        assert_eq!(
            extractor.dimensions_of(&png_bytes(30, 20), "a.jpg"),
            Some(Dimensions { width: 30, height: 20 })
        );
    }

    // =========================================================================
    // resolve
    // =========================================================================

    #[test]
    fn resolve_picks_first_non_blank() {
        assert_eq!(
            resolve(&[None, Some("  "), Some(" alice "), Some("bob")]),
            Some("alice".to_string())
        );
    }

    #[test]
    fn resolve_returns_none_when_nothing_usable() {
        assert_eq!(resolve(&[]), None);
        assert_eq!(resolve(&[None, Some(""), Some("\t")]), None);
    }
}
