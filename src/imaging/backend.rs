//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the operations every backend must
//! support: identify, resize and encode, plus a capability check for output
//! formats.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), pure Rust and built on
//! the `image` crate. Everything is statically linked into the binary.

use super::params::{EncodeParams, OutputFormat, ResizeParams};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("Invalid target dimensions {width:?}x{height:?}")]
    InvalidDimensions {
        width: Option<u32>,
        height: Option<u32>,
    },
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// Backends are shared across rayon workers and helper threads, hence
/// `Send + Sync`.
pub trait ImageBackend: Send + Sync {
    /// Read intrinsic image dimensions.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Resize `params.source` into `params.output`. Returns the output size.
    fn resize(&self, params: &ResizeParams) -> Result<Dimensions, BackendError>;

    /// Decode `params.source` and re-encode it into `params.output`.
    fn encode(&self, params: &EncodeParams) -> Result<(), BackendError>;

    /// Whether this backend can write `format`.
    fn supports(&self, format: OutputFormat) -> bool;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::params::{Quality, ResizeMode, Sharpening};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Mock backend that records operations and copies the source to the
    /// output instead of touching pixels.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    #[derive(Default)]
    pub struct MockBackend {
        pub identify_results: Mutex<Vec<Dimensions>>,
        pub operations: Mutex<Vec<RecordedOp>>,
        /// Output file names (e.g. `"photo-medium.jpg"`) whose resize fails.
        pub failing_outputs: Mutex<HashSet<String>>,
        pub unsupported: Mutex<HashSet<OutputFormat>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify(String),
        Resize {
            source: String,
            output: String,
            width: Option<u32>,
            height: Option<u32>,
            mode: ResizeMode,
            quality: u32,
            sharpening: Option<(f32, i32)>,
        },
        Encode {
            source: String,
            output: String,
            format: OutputFormat,
            quality: u32,
        },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_dimensions(dims: Vec<Dimensions>) -> Self {
            Self {
                identify_results: Mutex::new(dims),
                ..Self::default()
            }
        }

        pub fn failing_on(self, output_name: &str) -> Self {
            self.failing_outputs
                .lock()
                .unwrap()
                .insert(output_name.to_string());
            self
        }

        pub fn without_format(self, format: OutputFormat) -> Self {
            self.unsupported.lock().unwrap().insert(format);
            self
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Identify(path.to_string_lossy().to_string()));

            self.identify_results
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| BackendError::ProcessingFailed("No mock dimensions".to_string()))
        }

        fn resize(&self, params: &ResizeParams) -> Result<Dimensions, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Resize {
                source: params.source.to_string_lossy().to_string(),
                output: params.output.to_string_lossy().to_string(),
                width: params.width,
                height: params.height,
                mode: params.mode,
                quality: params.quality.value(),
                sharpening: params.sharpening.map(|s| (s.sigma, s.threshold)),
            });

            let name = params
                .output
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if self.failing_outputs.lock().unwrap().contains(&name) {
                return Err(BackendError::ProcessingFailed(format!("mock failure: {name}")));
            }
            std::fs::copy(&params.source, &params.output)?;
            Ok(Dimensions {
                width: params.width.unwrap_or(1),
                height: params.height.unwrap_or(1),
            })
        }

        fn encode(&self, params: &EncodeParams) -> Result<(), BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Encode {
                source: params.source.to_string_lossy().to_string(),
                output: params.output.to_string_lossy().to_string(),
                format: params.format,
                quality: params.quality.value(),
            });
            std::fs::copy(&params.source, &params.output)?;
            Ok(())
        }

        fn supports(&self, format: OutputFormat) -> bool {
            !self.unsupported.lock().unwrap().contains(&format)
        }
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 800,
            height: 600,
        }]);

        let result = backend.identify(Path::new("/test/image.jpg")).unwrap();
        assert_eq!(result.width, 800);
        assert_eq!(result.height, 600);

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], RecordedOp::Identify(p) if p == "/test/image.jpg"));
    }

    #[test]
    fn mock_records_resize_and_copies_source() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        std::fs::write(&source, b"pixels").unwrap();
        let output = tmp.path().join("source-thumb.jpg");

        let backend = MockBackend::new();
        backend
            .resize(&ResizeParams {
                source,
                output: output.clone(),
                width: Some(150),
                height: Some(150),
                mode: ResizeMode::Crop,
                format: OutputFormat::Jpeg,
                quality: Quality::new(80),
                sharpening: Some(Sharpening::light()),
            })
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"pixels");
        assert!(matches!(
            &backend.get_operations()[0],
            RecordedOp::Resize {
                width: Some(150),
                mode: ResizeMode::Crop,
                quality: 80,
                sharpening: Some((0.5, 0)),
                ..
            }
        ));
    }

    #[test]
    fn mock_fails_configured_outputs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        std::fs::write(&source, b"pixels").unwrap();

        let backend = MockBackend::new().failing_on("broken.jpg");
        let result = backend.resize(&ResizeParams {
            source,
            output: tmp.path().join("broken.jpg"),
            width: Some(10),
            height: None,
            mode: ResizeMode::Fit,
            format: OutputFormat::Jpeg,
            quality: Quality::default(),
            sharpening: None,
        });
        assert!(result.is_err());
    }
}
