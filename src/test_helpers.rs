//! Shared test utilities for the product-images test suite.
//!
//! Provides synthetic image bytes, ready-made registry records, and a helper
//! that stores a fake image on a backend the way the upload coordinator would.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let image = stored_image(backend.as_ref(), &product, "shelf.jpg").await;
//! registry.add_image(&product, image, false).await.unwrap();
//! ```

use chrono::Utc;
use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;

use crate::imaging::OutputFormat;
use crate::registry::{ImageEntry, NewImage};
use crate::storage::{BlobMetadata, StorageBackend, StorageKey, StoredLocation};
use crate::types::{ImageId, ProductId};

// =========================================================================
// Synthetic image bytes
// =========================================================================

/// A gradient JPEG of the given size.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
    buf.into_inner()
}

/// A flat red RGBA PNG where every pixel has the given alpha.
pub fn png_rgba_bytes(width: u32, height: u32, alpha: u8) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, alpha]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

// =========================================================================
// Registry records
// =========================================================================

/// A registry entry that points at no real blob.
pub fn sample_entry(name: &str) -> ImageEntry {
    let id = ImageId::generate();
    ImageEntry {
        id,
        url: format!("memory://test/{id}.jpg"),
        local_path: None,
        file_name: name.to_string(),
        file_size: 2048,
        mime_type: "image/png".into(),
        uploaded_at: Utc::now(),
        storage_key: format!("test/{id}.jpg"),
        format: OutputFormat::Jpeg,
        stored_size: 1024,
        width: 640,
        height: 480,
        content_hash: format!("hash-{name}"),
        thumbnail_url: None,
        thumbnail_key: None,
    }
}

/// A registrable image whose blob was never written.
pub fn new_image(name: &str) -> NewImage {
    let id = ImageId::generate();
    let key = StorageKey::new(format!("test/{id}.jpg")).unwrap();
    NewImage {
        id,
        file_name: name.to_string(),
        file_size: 2048,
        mime_type: "image/png".into(),
        format: OutputFormat::Jpeg,
        width: 640,
        height: 480,
        content_hash: format!("hash-{name}"),
        stored: StoredLocation {
            url: format!("memory://{key}"),
            key,
            local_path: None,
            size: 1024,
        },
        thumbnail: None,
        uploaded_at: Utc::now(),
    }
}

/// Write a small image blob and its thumbnail to `backend` under `product`'s
/// keys and return the record the registry expects.
pub async fn stored_image(
    backend: &dyn StorageBackend,
    product: &ProductId,
    name: &str,
) -> NewImage {
    let id = ImageId::generate();
    let format = OutputFormat::Jpeg;
    let metadata = BlobMetadata::new(format.mime_type(), name);
    let stored = backend
        .put(&StorageKey::for_image(product, id, format), vec![1; 64], &metadata)
        .await
        .unwrap();
    let thumbnail = backend
        .put(&StorageKey::for_thumbnail(product, id, format), vec![2; 16], &metadata)
        .await
        .unwrap();
    NewImage {
        id,
        file_name: name.to_string(),
        file_size: 4096,
        mime_type: "image/png".into(),
        format,
        width: 640,
        height: 480,
        content_hash: format!("hash-{id}"),
        stored,
        thumbnail: Some(thumbnail),
        uploaded_at: Utc::now(),
    }
}
