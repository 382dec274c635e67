//! High-level image operations.
//!
//! [`ImageOptimizer`] is the engine's public face: in-place optimize,
//! resize and compress, plus format conversion into a sibling file. Its
//! methods never return errors; failures are logged and reported as
//! `false` / `None`, because callers treat every derived image as optional.
//!
//! The `plan_*` functions turn a named size into backend parameters and are
//! shared with the processing pipeline.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::params::{EncodeParams, OutputFormat, Quality, ResizeMode, ResizeParams, Sharpening};
use crate::config::ImageSize;
use std::path::{Path, PathBuf};

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Get image dimensions using the backend.
pub fn get_dimensions(backend: &impl ImageBackend, path: &Path) -> Result<(u32, u32)> {
    let dims = backend.identify(path)?;
    Ok((dims.width, dims.height))
}

/// Plan the resize for one configured size.
///
/// A crop size needs both bounds; with only one it degrades to a fit so
/// that `{ width = 300, crop = true }` still yields a 300px-wide variant.
/// Sharpening is applied to crops only, which are the heavily downscaled
/// grid thumbnails.
pub fn plan_variant(
    source: &Path,
    output: &Path,
    size: &ImageSize,
    format: OutputFormat,
    quality: Quality,
    sharpening: Option<Sharpening>,
) -> ResizeParams {
    let mode = if size.crop && size.width.is_some() && size.height.is_some() {
        ResizeMode::Crop
    } else {
        ResizeMode::Fit
    };

    ResizeParams {
        source: source.to_path_buf(),
        output: output.to_path_buf(),
        width: size.width,
        height: size.height,
        mode,
        format,
        quality,
        sharpening: match mode {
            ResizeMode::Crop => sharpening,
            ResizeMode::Fit => None,
        },
    }
}

/// Path a conversion of `path` into `format` is written to.
///
/// Never `path` itself: when the extension already matches the target
/// (`photo.webp` holding JPEG bytes), the format name is appended to the
/// stem instead, giving `photo-webp.webp`.
pub fn converted_path(path: &Path, format: OutputFormat) -> PathBuf {
    let swapped = path.with_extension(format.extension());
    if !swapped
        .to_string_lossy()
        .eq_ignore_ascii_case(&path.to_string_lossy())
    {
        return swapped;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}-{}.{}", format.name(), format.extension()))
}

/// Format an existing image file is written back in.
///
/// The content decides; the extension is only a fallback for files whose
/// magic bytes are not recognized.
fn format_of(path: &Path) -> Option<OutputFormat> {
    let sniffed = std::fs::read(path)
        .ok()
        .and_then(|bytes| image::guess_format(&bytes).ok())
        .and_then(|f| OutputFormat::from_mime_type(f.to_mime_type()));
    sniffed.or_else(|| OutputFormat::from_path(path))
}

/// Image engine over any [`ImageBackend`].
pub struct ImageOptimizer<'a, B: ImageBackend> {
    backend: &'a B,
}

impl<'a, B: ImageBackend> ImageOptimizer<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Re-encode the image at `path` in place at `quality`.
    ///
    /// Returns `false` when `path` is missing, unreadable, or not in a
    /// format the backend can write back.
    pub fn optimize(&self, path: &Path, quality: Quality) -> bool {
        let Some(format) = format_of(path).filter(|f| self.backend.supports(*f)) else {
            tracing::debug!(path = %path.display(), "optimize skipped: unsupported format");
            return false;
        };
        let params = EncodeParams {
            source: path.to_path_buf(),
            output: path.to_path_buf(),
            format,
            quality,
        };
        match self.backend.encode(&params) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "optimize failed");
                false
            }
        }
    }

    /// Alias of [`optimize`](Self::optimize) with an explicit quality.
    pub fn compress(&self, path: &Path, quality: u32) -> bool {
        self.optimize(path, Quality::new(quality))
    }

    /// Resize the image at `path` in place.
    ///
    /// `crop = false` fits within `width × height` (never enlarging);
    /// `crop = true` produces exactly `width × height`.
    pub fn resize(&self, path: &Path, width: u32, height: u32, crop: bool) -> bool {
        self.resize_to(path, width, height, crop).is_ok()
    }

    /// Like [`resize`](Self::resize), returning the output size or the error.
    pub fn resize_to(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        crop: bool,
    ) -> Result<Dimensions> {
        let format = format_of(path)
            .filter(|f| self.backend.supports(*f))
            .ok_or_else(|| BackendError::UnsupportedFormat(path.display().to_string()))?;
        let params = ResizeParams {
            source: path.to_path_buf(),
            output: path.to_path_buf(),
            width: Some(width),
            height: Some(height),
            mode: if crop { ResizeMode::Crop } else { ResizeMode::Fit },
            format,
            quality: Quality::default(),
            sharpening: None,
        };
        self.backend.resize(&params).inspect_err(|e| {
            tracing::warn!(
                path = %path.display(),
                width,
                height,
                crop,
                error = %e,
                "resize failed"
            );
        })
    }

    /// Convert the image at `path` to `format`, written next to it at
    /// [`converted_path`]. The source is never overwritten. Returns the new
    /// path, or `None` on invalid input or an unsupported target.
    pub fn convert(
        &self,
        path: &Path,
        format: OutputFormat,
        quality: Quality,
    ) -> Option<PathBuf> {
        self.convert_to(path, format, quality).ok()
    }

    /// Like [`convert`](Self::convert), keeping the error.
    pub fn convert_to(
        &self,
        path: &Path,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<PathBuf> {
        if !self.backend.supports(format) {
            return Err(BackendError::UnsupportedFormat(format.to_string()));
        }
        let output = converted_path(path, format);
        let params = EncodeParams {
            source: path.to_path_buf(),
            output: output.clone(),
            format,
            quality,
        };
        self.backend.encode(&params).inspect_err(|e| {
            tracing::warn!(path = %path.display(), %format, error = %e, "conversion failed");
        })?;
        Ok(output)
    }
}
