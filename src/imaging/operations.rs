//! High-level image operations.
//!
//! These functions combine calculations with backend execution. They take
//! the caller's envelope, validate it, compute exact parameters, and call the
//! backend.

use super::backend::{BackendError, ImageBackend};
use super::calculations::{calculate_thumbnail_dimensions, fit_within};
use super::params::{
    CompressOptions, EncodeParams, OutputFormat, Quality, Sharpening, ThumbnailParams,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompressError {
    #[error("unsupported input kind '{0}': only image/* media types are accepted")]
    UnsupportedInputKind(String),
    #[error("encoding failed: {0}")]
    EncodingFailed(String),
    #[error("invalid compression options: {0}")]
    InvalidOptions(String),
}

impl From<BackendError> for CompressError {
    fn from(e: BackendError) -> Self {
        CompressError::EncodingFailed(e.to_string())
    }
}

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, CompressError>;

/// A file as handed over by the caller: declared type plus raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Whether a declared media type belongs to the `image/*` family.
pub fn is_image_mime(mime_type: &str) -> bool {
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    match essence.split_once('/') {
        Some((kind, subtype)) => kind.eq_ignore_ascii_case("image") && !subtype.is_empty(),
        None => false,
    }
}

/// Re-encoded output of [`compress`].
///
/// `size` is not guaranteed to be smaller than the input: already-optimized or
/// tiny sources can grow slightly. Only the dimensions are bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub size: u64,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

/// Check the caller's envelope before any pixel work.
pub fn validate_options(options: &CompressOptions) -> Result<()> {
    if options.max_width == 0 || options.max_height == 0 {
        return Err(CompressError::InvalidOptions(
            "max_width and max_height must be non-zero".into(),
        ));
    }
    if !(0.0..=1.0).contains(&options.quality) {
        return Err(CompressError::InvalidOptions(format!(
            "quality must be within 0.0-1.0, got {}",
            options.quality
        )));
    }
    Ok(())
}

/// Pick the output format: the requested one, or the best the runtime can
/// encode. AVIF is preferred; JPEG is the universal fallback.
pub fn negotiate_format(
    backend: &(impl ImageBackend + ?Sized),
    requested: Option<OutputFormat>,
) -> OutputFormat {
    match requested {
        Some(format) => format,
        None if backend.supports(OutputFormat::Avif) => OutputFormat::Avif,
        None => OutputFormat::Jpeg,
    }
}

/// Re-encode `file` into the bounded envelope described by `options`.
pub fn compress(
    backend: &(impl ImageBackend + ?Sized),
    file: &UploadFile,
    options: &CompressOptions,
) -> Result<CompressedImage> {
    validate_options(options)?;
    if !is_image_mime(&file.mime_type) {
        return Err(CompressError::UnsupportedInputKind(file.mime_type.clone()));
    }
    if file.bytes.is_empty() {
        return Err(CompressError::EncodingFailed(format!(
            "{} is empty",
            file.file_name
        )));
    }

    let original = backend.identify(&file.bytes)?;
    let (width, height) = fit_within(
        (original.width, original.height),
        (options.max_width, options.max_height),
    );
    let format = negotiate_format(backend, options.format);

    let bytes = backend.encode(
        &file.bytes,
        &EncodeParams {
            width,
            height,
            format,
            quality: Quality::from_fraction(options.quality),
            background: options.background,
        },
    )?;

    Ok(CompressedImage {
        size: bytes.len() as u64,
        bytes,
        format,
        width,
        height,
    })
}

/// Configuration for thumbnail generation.
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailConfig {
    pub aspect: (u32, u32),
    pub short_edge: u32,
    pub quality: Quality,
    pub sharpening: Option<Sharpening>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            aspect: (1, 1),
            short_edge: 300,
            quality: Quality::default(),
            sharpening: Some(Sharpening::light()),
        }
    }
}

/// Plan a thumbnail operation without executing it.
pub fn plan_thumbnail(
    config: &ThumbnailConfig,
    format: OutputFormat,
    background: [u8; 3],
) -> ThumbnailParams {
    let (crop_width, crop_height) = calculate_thumbnail_dimensions(config.aspect, config.short_edge);
    ThumbnailParams {
        crop_width,
        crop_height,
        format,
        quality: config.quality,
        background,
        sharpening: config.sharpening,
    }
}

/// Create a thumbnail from the original upload bytes, in the same format as
/// the stored image.
pub fn create_thumbnail(
    backend: &(impl ImageBackend + ?Sized),
    file: &UploadFile,
    config: &ThumbnailConfig,
    format: OutputFormat,
    background: [u8; 3],
) -> Result<Vec<u8>> {
    let params = plan_thumbnail(config, format, background);
    Ok(backend.thumbnail(&file.bytes, &params)?)
}
