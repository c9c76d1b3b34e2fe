//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP) | `image::ImageReader` with guessed format |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Encode → PNG / WebP | `PngEncoder` / `WebPEncoder::new_lossless` |
//! | Thumbnail crop | `image::DynamicImage::resize_to_fill` |
//! | Sharpening | `image::imageops::unsharpen` |

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::params::{EncodeParams, OutputFormat, Quality, ThumbnailParams};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;

/// AVIF encoder speed (1 = slowest/best, 10 = fastest).
const AVIF_SPEED: u8 = 6;

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

fn image_format(format: OutputFormat) -> ImageFormat {
    match format {
        OutputFormat::Avif => ImageFormat::Avif,
        OutputFormat::Jpeg => ImageFormat::Jpeg,
        OutputFormat::Png => ImageFormat::Png,
        OutputFormat::Webp => ImageFormat::WebP,
    }
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, BackendError> {
    if bytes.is_empty() {
        return Err(BackendError::DecodeFailed("empty input".into()));
    }
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| BackendError::DecodeFailed(format!("unreadable header: {e}")))
}

/// Decode an in-memory image.
fn load_image(bytes: &[u8]) -> Result<DynamicImage, BackendError> {
    reader(bytes)?
        .decode()
        .map_err(|e| BackendError::DecodeFailed(e.to_string()))
}

/// Composite any alpha channel over `background`, producing opaque RGB8.
fn flatten(img: &DynamicImage, background: [u8; 3]) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        let alpha = p[3] as u32;
        let blend = |c: u8, bg: u8| ((c as u32 * alpha + bg as u32 * (255 - alpha) + 127) / 255) as u8;
        image::Rgb([
            blend(p[0], background[0]),
            blend(p[1], background[1]),
            blend(p[2], background[2]),
        ])
    })
}

/// Collapse exotic color types to the 8-bit layouts every encoder accepts.
fn normalize(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => img,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Encode to `format` in memory.
fn encode_image(
    img: DynamicImage,
    format: OutputFormat,
    quality: Quality,
    background: [u8; 3],
) -> Result<Vec<u8>, BackendError> {
    let mut out = Vec::new();
    let q = quality.value() as u8;
    let result = match format {
        OutputFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(flatten(&img, background));
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, q))
        }
        OutputFormat::Avif => normalize(img)
            .write_with_encoder(AvifEncoder::new_with_speed_quality(&mut out, AVIF_SPEED, q)),
        OutputFormat::Png => normalize(img).write_with_encoder(PngEncoder::new(&mut out)),
        OutputFormat::Webp => {
            normalize(img).write_with_encoder(WebPEncoder::new_lossless(&mut out))
        }
    };
    result.map_err(|e| BackendError::EncodeFailed(format!("{format}: {e}")))?;
    Ok(out)
}

impl ImageBackend for RustBackend {
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError> {
        let (width, height) = reader(bytes)?
            .into_dimensions()
            .map_err(|e| BackendError::DecodeFailed(format!("failed to read dimensions: {e}")))?;
        Ok(Dimensions { width, height })
    }

    fn supports(&self, format: OutputFormat) -> bool {
        image_format(format).writing_enabled()
    }

    fn encode(&self, bytes: &[u8], params: &EncodeParams) -> Result<Vec<u8>, BackendError> {
        if !self.supports(params.format) {
            return Err(BackendError::UnsupportedFormat(params.format));
        }
        let img = load_image(bytes)?;
        let img = if img.width() == params.width && img.height() == params.height {
            img
        } else {
            img.resize_exact(params.width, params.height, FilterType::Lanczos3)
        };
        encode_image(img, params.format, params.quality, params.background)
    }

    fn thumbnail(&self, bytes: &[u8], params: &ThumbnailParams) -> Result<Vec<u8>, BackendError> {
        if !self.supports(params.format) {
            return Err(BackendError::UnsupportedFormat(params.format));
        }
        let img = load_image(bytes)?;

        // Fill-resize then center-crop to exact dimensions
        let filled =
            img.resize_to_fill(params.crop_width, params.crop_height, FilterType::Lanczos3);

        let final_img = if let Some(sharpening) = params.sharpening {
            DynamicImage::from(image::imageops::unsharpen(
                &filled,
                sharpening.sigma,
                sharpening.threshold,
            ))
        } else {
            filled
        };

        encode_image(final_img, params.format, params.quality, params.background)
    }
}
