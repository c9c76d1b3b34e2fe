//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how*. They sit between
//! [`operations`](super::operations), which decides the target envelope, and
//! the [`backend`](super::backend), which does the pixel work, so the backend
//! can be swapped for a mock without touching the operation logic.
//!
//! - [`Quality`]: encoder quality on the 1-100 scale, clamped on construction.
//! - [`OutputFormat`]: stored encodings and their media types.
//! - [`CompressOptions`]: caller-facing envelope (bounds, 0-1 quality, format).
//! - [`EncodeParams`] / [`ThumbnailParams`]: fully resolved backend requests.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality setting for lossy encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    /// Map a 0.0-1.0 fraction onto the encoder scale.
    pub fn from_fraction(fraction: f32) -> Self {
        Self::new((fraction.clamp(0.0, 1.0) * 100.0).round() as u32)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

/// Encodings the engine can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Avif,
    Jpeg,
    Png,
    /// Lossless only with the pure-Rust encoder; quality is ignored.
    Webp,
}

impl OutputFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Avif => "image/avif",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Avif => "avif",
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    /// Whether the encoding can carry an alpha channel.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Size/quality envelope requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// 0.0 (smallest) to 1.0 (best).
    pub quality: f32,
    /// `None` negotiates the best supported format.
    pub format: Option<OutputFormat>,
    /// Fill color used when flattening transparency for formats without alpha.
    pub background: [u8; 3],
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1920,
            quality: 0.8,
            format: None,
            background: [255, 255, 255],
        }
    }
}

/// Sharpening parameters for unsharp mask.
///
/// - `sigma`: Standard deviation of the Gaussian blur (higher = more sharpening)
/// - `threshold`: Minimum brightness difference to sharpen (0 = sharpen all pixels)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sharpening {
    pub sigma: f32,
    pub threshold: i32,
}

impl Sharpening {
    /// Light sharpening suitable for thumbnails.
    pub fn light() -> Self {
        Self {
            sigma: 0.5,
            threshold: 0,
        }
    }
}

/// A resolved re-encode request: exact output dimensions and encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeParams {
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub quality: Quality,
    pub background: [u8; 3],
}

/// A resolved thumbnail request (fill-resize + center crop).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailParams {
    pub crop_width: u32,
    pub crop_height: u32,
    pub format: OutputFormat,
    pub quality: Quality,
    pub background: [u8; 3],
    pub sharpening: Option<Sharpening>,
}
