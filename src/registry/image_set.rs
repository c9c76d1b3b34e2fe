//! A product's image set and the single-primary rule.
//!
//! The set stores one primary pointer instead of a per-image flag. Promoting
//! an image is a single assignment, so there is no moment where two images
//! (or none) claim to be primary.

use crate::imaging::OutputFormat;
use crate::types::{ImageId, ProductId, ProductImage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stored record of one image. Everything in [`ProductImage`] except the
/// derived `is_primary` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub id: ImageId,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub storage_key: String,
    pub format: OutputFormat,
    pub stored_size: u64,
    pub width: u32,
    pub height: u32,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_key: Option<String>,
}

impl ImageEntry {
    pub fn to_product_image(&self, product: &ProductId, is_primary: bool) -> ProductImage {
        ProductImage {
            id: self.id,
            product_id: product.clone(),
            url: self.url.clone(),
            local_path: self.local_path.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            mime_type: self.mime_type.clone(),
            uploaded_at: self.uploaded_at,
            is_primary,
            storage_key: self.storage_key.clone(),
            stored_format: self.format.mime_type().to_string(),
            stored_size: self.stored_size,
            width: self.width,
            height: self.height,
            content_hash: self.content_hash.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            thumbnail_key: self.thumbnail_key.clone(),
        }
    }
}

/// Ordered images of one product plus its primary pointer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSet {
    pub primary: Option<ImageId>,
    pub images: Vec<ImageEntry>,
}

impl ImageSet {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, id: ImageId) -> Option<&ImageEntry> {
        self.images.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.get(id).is_some()
    }

    pub fn is_primary(&self, id: ImageId) -> bool {
        self.primary == Some(id)
    }

    pub fn contains_hash(&self, content_hash: &str) -> bool {
        self.images.iter().any(|e| e.content_hash == content_hash)
    }

    /// Append an entry. The first image of an empty set is always primary;
    /// otherwise `make_primary` decides.
    pub fn push(&mut self, entry: ImageEntry, make_primary: bool) {
        if self.images.is_empty() || make_primary {
            self.primary = Some(entry.id);
        }
        self.images.push(entry);
    }

    /// Point the primary at `id`. Returns false when `id` is not in the set.
    pub fn set_primary(&mut self, id: ImageId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.primary = Some(id);
        true
    }

    /// Remove an entry, promoting the earliest remaining image when the
    /// primary goes away.
    pub fn remove(&mut self, id: ImageId) -> Option<ImageEntry> {
        let index = self.images.iter().position(|e| e.id == id)?;
        let removed = self.images.remove(index);
        if self.primary == Some(id) {
            self.primary = self.images.first().map(|e| e.id);
        }
        Some(removed)
    }

    /// Whether the single-primary rule holds: a non-empty set points at one
    /// of its own images, an empty set points at nothing.
    pub fn primary_is_consistent(&self) -> bool {
        match self.primary {
            None => self.images.is_empty(),
            Some(id) => self.contains(id),
        }
    }

    /// Public records, primary first, then insertion order.
    pub fn to_product_images(&self, product: &ProductId) -> Vec<ProductImage> {
        let mut out = Vec::with_capacity(self.images.len());
        if let Some(primary) = self.primary.and_then(|id| self.get(id)) {
            out.push(primary.to_product_image(product, true));
        }
        out.extend(
            self.images
                .iter()
                .filter(|e| !self.is_primary(e.id))
                .map(|e| e.to_product_image(product, false)),
        );
        out
    }
}
