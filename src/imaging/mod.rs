//! Image optimization engine: pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `ImageReader::into_dimensions`, `avif-parse` for AVIF |
//! | **Optimize / compress** | decode + re-encode in place |
//! | **Resize (fit)** | Lanczos3, bounded, never enlarges |
//! | **Resize (crop)** | fill-resize + center crop + optional `unsharpen` |
//! | **Convert** | decode + encode as JPEG / PNG / WebP / AVIF |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: [`ImageOptimizer`] and the planning helpers the pipeline uses

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use operations::{ImageOptimizer, converted_path, get_dimensions, plan_variant};
pub use params::{EncodeParams, OutputFormat, Quality, ResizeMode, ResizeParams, Sharpening};
pub use rust_backend::RustBackend;
