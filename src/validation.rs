//! Upload validation.
//!
//! Three checks, in order, stopping at the first failure:
//!
//! 1. Size: `bytes <= max_file_size` (the limit itself passes).
//! 2. MIME type, detected from content, must be in `allowed_mime_types`.
//! 3. Lowercased extension must be in `allowed_extensions`.
//!
//! Checking both type and extension catches a renamed executable as well
//! as a real image with a spoofed extension. An empty allow-list allows
//! everything.

use crate::config::UploadConfig;
use crate::types::UploadedFile;
use thiserror::Error;

/// Why a file was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    #[error("file is {size} bytes, the limit is {max}")]
    TooLarge { size: u64, max: u64 },
    #[error("type {0} is not allowed")]
    MimeTypeNotAllowed(String),
    #[error("extension {} is not allowed", dotted(.0))]
    ExtensionNotAllowed(Option<String>),
}

fn dotted(extension: &Option<String>) -> String {
    match extension {
        Some(ext) => format!(".{ext}"),
        None => "(none)".to_string(),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {kind}")]
pub struct ValidationError {
    pub field: &'static str,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    fn file(kind: ValidationErrorKind) -> Self {
        Self { field: "file", kind }
    }
}

/// Validates incoming files against the `[upload]` settings.
#[derive(Debug, Clone)]
pub struct Validator {
    max_file_size: u64,
    allowed_mime_types: Vec<String>,
    allowed_extensions: Vec<String>,
}

impl Validator {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            allowed_mime_types: config
                .allowed_mime_types
                .iter()
                .map(|m| m.trim().to_ascii_lowercase())
                .collect(),
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Validate `file`, returning its detected MIME type on success.
    pub fn validate(&self, file: &UploadedFile) -> Result<String, ValidationError> {
        if file.size() > self.max_file_size {
            return Err(ValidationError::file(ValidationErrorKind::TooLarge {
                size: file.size(),
                max: self.max_file_size,
            }));
        }

        let mime = crate::mime::detect(&file.bytes, &file.name);
        if !self.allowed_mime_types.is_empty() && !self.allowed_mime_types.contains(&mime) {
            return Err(ValidationError::file(
                ValidationErrorKind::MimeTypeNotAllowed(mime),
            ));
        }

        let extension = file.extension();
        let extension_ok = self.allowed_extensions.is_empty()
            || extension
                .as_ref()
                .is_some_and(|e| self.allowed_extensions.contains(e));
        if !extension_ok {
            return Err(ValidationError::file(
                ValidationErrorKind::ExtensionNotAllowed(extension),
            ));
        }

        Ok(mime)
    }
}
