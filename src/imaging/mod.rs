//! Compression engine: pure Rust, in-memory.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **Bound** | [`fit_within`] (never upscales) |
//! | **Re-encode** | Lanczos3 + AVIF (rav1e) / JPEG / PNG / WebP |
//! | **Thumbnail** | `resize_to_fill` + `unsharpen` |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: [`compress`] and thumbnail creation on top of a backend

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{calculate_thumbnail_dimensions, fit_within};
pub use operations::{
    CompressError, CompressedImage, ThumbnailConfig, UploadFile, compress, create_thumbnail,
    is_image_mime, negotiate_format, validate_options,
};
pub use params::{CompressOptions, EncodeParams, OutputFormat, Quality, Sharpening, ThumbnailParams};
pub use rust_backend::RustBackend;
