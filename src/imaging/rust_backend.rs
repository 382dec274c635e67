//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Identify (AVIF) | `avif-parse` container metadata, no pixel decode |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` |
//! | Crop | fill-resize + `crop_imm` around the center |
//! | Sharpening | `image::DynamicImage::unsharpen` |
//! | Encode → JPEG / PNG / WebP / AVIF | `image::codecs::*` encoders |
//!
//! WebP output uses the `image` crate's lossless encoder, so the quality
//! setting only affects JPEG and AVIF.
//!
//! All writes go through a temporary file in the destination directory that
//! is renamed over the target, so an in-place optimize never leaves a
//! half-written image behind.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::{
    calculate_crop_offset, calculate_fill_dimensions, calculate_fit_dimensions,
};
use super::params::{EncodeParams, OutputFormat, ResizeMode, ResizeParams};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::io::Write;
use std::path::Path;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn is_avif(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("avif"))
}

fn decode_error(path: &Path, reason: impl ToString) -> BackendError {
    BackendError::Decode {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Load and decode an image from disk, sniffing the format from content.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    if is_avif(path) {
        return Err(decode_error(path, "AVIF decoding is not available"));
    }
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| decode_error(path, e))
}

/// Extract dimensions from an AVIF file's container metadata.
fn identify_avif(path: &Path) -> Result<Dimensions, BackendError> {
    let file_data = std::fs::read(path)?;
    let avif = avif_parse::read_avif(&mut std::io::Cursor::new(&file_data))
        .map_err(|e| decode_error(path, format!("{e:?}")))?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| decode_error(path, format!("{e:?}")))?;
    Ok(Dimensions {
        width: meta.max_frame_width.get(),
        height: meta.max_frame_height.get(),
    })
}

/// Reject bounds that cannot produce an image before paying for a decode.
fn check_bounds(params: &ResizeParams) -> Result<(), BackendError> {
    let invalid = BackendError::InvalidDimensions {
        width: params.width,
        height: params.height,
    };
    if params.width == Some(0) || params.height == Some(0) {
        return Err(invalid);
    }
    match params.mode {
        ResizeMode::Fit if params.width.is_none() && params.height.is_none() => Err(invalid),
        ResizeMode::Crop if params.width.is_none() || params.height.is_none() => Err(invalid),
        _ => Ok(()),
    }
}

/// Drop channels the target encoder cannot take.
fn prepare_for(img: DynamicImage, format: OutputFormat) -> DynamicImage {
    match format {
        OutputFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        OutputFormat::WebP | OutputFormat::Avif if img.color().has_alpha() => {
            DynamicImage::ImageRgba8(img.to_rgba8())
        }
        OutputFormat::WebP | OutputFormat::Avif => DynamicImage::ImageRgb8(img.to_rgb8()),
        OutputFormat::Png => img,
    }
}

/// Encode `img` as `format` and atomically replace `path`.
fn save_image(
    img: DynamicImage,
    path: &Path,
    format: OutputFormat,
    quality: u32,
) -> Result<(), BackendError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let img = prepare_for(img, format);
    let mut buf = Vec::new();
    let encoded = match format {
        OutputFormat::Jpeg => img.write_with_encoder(
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality as u8),
        ),
        OutputFormat::Png => img.write_with_encoder(image::codecs::png::PngEncoder::new(&mut buf)),
        OutputFormat::WebP => {
            img.write_with_encoder(image::codecs::webp::WebPEncoder::new_lossless(&mut buf))
        }
        OutputFormat::Avif => img.write_with_encoder(
            image::codecs::avif::AvifEncoder::new_with_speed_quality(&mut buf, 6, quality as u8),
        ),
    };
    encoded.map_err(|e| BackendError::ProcessingFailed(format!("{format} encode failed: {e}")))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&buf)?;
    tmp.persist(path).map_err(|e| BackendError::Io(e.error))?;
    Ok(())
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        if is_avif(path) {
            return identify_avif(path);
        }
        let (width, height) = ImageReader::open(path)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| decode_error(path, e))?;
        Ok(Dimensions { width, height })
    }

    fn resize(&self, params: &ResizeParams) -> Result<Dimensions, BackendError> {
        check_bounds(params)?;
        let img = load_image(&params.source)?;
        let source = (img.width(), img.height());

        let resized = match params.mode {
            ResizeMode::Fit => {
                let (w, h) = calculate_fit_dimensions(source, (params.width, params.height))
                    .ok_or(BackendError::InvalidDimensions {
                        width: params.width,
                        height: params.height,
                    })?;
                if (w, h) == source {
                    img
                } else {
                    img.resize_exact(w, h, FilterType::Lanczos3)
                }
            }
            ResizeMode::Crop => {
                // check_bounds guarantees both are present and non-zero
                let target = (params.width.unwrap_or(1), params.height.unwrap_or(1));
                let filled = calculate_fill_dimensions(source, target);
                let (x, y) = calculate_crop_offset(filled, target);
                img.resize_exact(filled.0, filled.1, FilterType::Lanczos3)
                    .crop_imm(x, y, target.0, target.1)
            }
        };

        let final_img = match params.sharpening {
            Some(s) => resized.unsharpen(s.sigma, s.threshold),
            None => resized,
        };

        let dims = Dimensions {
            width: final_img.width(),
            height: final_img.height(),
        };
        save_image(
            final_img,
            &params.output,
            params.format,
            params.quality.value(),
        )?;
        Ok(dims)
    }

    fn encode(&self, params: &EncodeParams) -> Result<(), BackendError> {
        let img = load_image(&params.source)?;
        save_image(img, &params.output, params.format, params.quality.value())
    }

    fn supports(&self, format: OutputFormat) -> bool {
        matches!(
            format,
            OutputFormat::Jpeg | OutputFormat::Png | OutputFormat::WebP | OutputFormat::Avif
        )
    }
}
