//! # Media Library
//!
//! The core of a media library: validated uploads onto pluggable storage
//! disks, persistent media records, and an image pipeline that derives
//! thumbnails and modern-format copies from stored originals.
//!
//! # Architecture: Upload, Then Process
//!
//! ```text
//! 1. Upload    bytes   →  blob + MediaRecord   (validate, name, store, record)
//! 2. Process   record  →  derivatives          (sizes + modern format, merged into metadata)
//! ```
//!
//! The two steps are independent. Upload never fails because an image could
//! not be thumbnailed, and processing can run inline, later, or again: a
//! rerun writes the same keys and only adds metadata entries.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`library`] | Facade wiring everything together: upload, process, edit, delete, sweep |
//! | [`upload`] | Upload orchestration: gate, validate, name, store, record |
//! | [`process`] | Derivative pipeline: named sizes and modern format per record |
//! | [`imaging`] | Pure-Rust image operations: identify, resize, crop, encode |
//! | [`storage`] | Named disks (local directory, memory) behind one adapter |
//! | [`records`] | Record persistence with atomic per-record updates |
//! | [`validation`] | Size, MIME type and extension checks |
//! | [`mime`] | MIME detection from content, then extension |
//! | [`naming`] | Sanitized unique file names, upload path templates, derived keys |
//! | [`metadata`] | Image dimensions and caller-supplied field resolution |
//! | [`access`] | Authorization gate consulted before every operation |
//! | [`config`] | `media.toml` loading, stock defaults, validation |
//! | [`types`] | `MediaRecord` and upload inputs |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## State Lives in Metadata
//!
//! Whether a record has been processed is not a flag: it is the presence of
//! the `thumbnails` and `modernFormats` keys in its metadata bag. A key is
//! only added after its blob was written, so metadata never points at a
//! file that does not exist. Derivative keys never equal the original's key:
//! a JPEG uploaded as `photo.webp` gets its WebP copy at `photo-webp.webp`.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module uses the `image` crate (Lanczos3 resampling) for
//! every format it reads and writes. No ImageMagick, no system libraries;
//! the backend sits behind a trait so tests can swap in a recording mock.
//!
//! ## Blob Before Record
//!
//! A blob is durable before its record exists, and a failed record write
//! deletes the blob again. Anything a crash leaves behind is found by
//! [`library::MediaLibrary::sweep_orphans`], which spares unreferenced blobs
//! younger than `storage.orphan_grace_secs` because they may belong to an
//! upload or processing run still in flight.

pub mod access;
pub mod config;
pub mod imaging;
pub mod library;
pub mod metadata;
pub mod mime;
pub mod naming;
pub mod output;
pub mod process;
pub mod records;
pub mod storage;
pub mod types;
pub mod upload;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_helpers;
