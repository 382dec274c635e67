//! MIME type detection from file content.
//!
//! Client-declared types are never trusted. Detection runs in this order:
//!
//! 1. Raster formats via `image::guess_format` magic bytes.
//! 2. SVG by content (an `<svg` root after an optional XML prolog).
//! 3. A small signature table for documents, audio and video.
//! 4. The file extension.
//! 5. `application/octet-stream`.

use std::path::Path;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const SVG: &str = "image/svg+xml";

/// Leading signatures not covered by the `image` crate.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"ID3", "audio/mpeg"),
    (&[0xFF, 0xFB], "audio/mpeg"),
    (&[0xFF, 0xF3], "audio/mpeg"),
    (&[0xFF, 0xF2], "audio/mpeg"),
    (b"OggS", "audio/ogg"),
    (b"fLaC", "audio/flac"),
    (b"PK\x03\x04", "application/zip"),
    (&[0x1A, 0x45, 0xDF, 0xA3], "video/webm"),
];

/// Detect the MIME type of `bytes`, using `name` only as a fallback.
pub fn detect(bytes: &[u8], name: &str) -> String {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type().to_string();
    }
    if looks_like_svg(bytes) {
        return SVG.to_string();
    }
    if let Some(mime) = sniff(bytes) {
        return mime.to_string();
    }
    from_extension(name).unwrap_or(OCTET_STREAM).to_string()
}

fn sniff(bytes: &[u8]) -> Option<&'static str> {
    if let Some((_, mime)) = SIGNATURES.iter().find(|(sig, _)| bytes.starts_with(sig)) {
        return Some(mime);
    }
    // RIFF containers: WAVE audio or AVI video (WebP is handled by `image`).
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" {
        return match &bytes[8..12] {
            b"WAVE" => Some("audio/wav"),
            b"AVI " => Some("video/x-msvideo"),
            _ => None,
        };
    }
    // ISO base media: `....ftyp<brand>`
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return match &bytes[8..12] {
            b"qt  " => Some("video/quicktime"),
            b"M4A " => Some("audio/mp4"),
            _ => Some("video/mp4"),
        };
    }
    None
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if text.starts_with("<svg") {
        return true;
    }
    (text.starts_with("<?xml") || text.starts_with("<!DOCTYPE svg")) && text.contains("<svg")
}

/// MIME type implied by a file name's extension.
pub fn from_extension(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        "svg" => SVG,
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{jpeg_bytes, png_bytes, svg_bytes};

    #[test]
    fn detects_raster_formats_from_content() {
        assert_eq!(detect(&jpeg_bytes(8, 8), "photo.jpg"), "image/jpeg");
        assert_eq!(detect(&png_bytes(8, 8), "photo.png"), "image/png");
    }

    #[test]
    fn content_beats_extension() {
        assert_eq!(detect(&png_bytes(4, 4), "sneaky.jpg"), "image/png");
        assert_eq!(detect(b"%PDF-1.7\n...", "invoice.jpg"), "application/pdf");
    }

    #[test]
    fn detects_svg_with_and_without_prolog() {
        assert_eq!(detect(&svg_bytes(), "logo.svg"), SVG);
        assert_eq!(
            detect(b"<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\"/>", "x"),
            SVG
        );
        assert_eq!(detect(b"<svg/>", "no-extension"), SVG);
    }

    #[test]
    fn detects_audio_and_video_signatures() {
        assert_eq!(detect(b"ID3\x03\x00\x00\x00", "song"), "audio/mpeg");
        assert_eq!(
            detect(b"\x00\x00\x00\x18ftypmp42\x00\x00\x00\x00", "clip"),
            "video/mp4"
        );
        assert_eq!(detect(b"RIFF\x24\x00\x00\x00WAVEfmt ", "a"), "audio/wav");
    }

    #[test]
    fn falls_back_to_extension_then_octet_stream() {
        assert_eq!(detect(b"hello, world", "notes.txt"), "text/plain");
        assert_eq!(detect(b"hello, world", "notes.unknown"), OCTET_STREAM);
        assert_eq!(detect(b"", "empty"), OCTET_STREAM);
    }

    #[test]
    fn xml_without_svg_root_is_not_svg() {
        assert_eq!(
            detect(b"<?xml version=\"1.0\"?><feed/>", "feed.xml"),
            OCTET_STREAM
        );
    }
}
