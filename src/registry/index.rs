//! Durable image-set index for persisted products.
//!
//! Each persisted product has one JSON object in the remote backend at
//! `products/<id>/index.json` holding its full [`ImageSet`]. The document is
//! versioned; bump [`INDEX_VERSION`] whenever the entry layout changes.
//!
//! Unlike a build cache, an index that cannot be read is an error rather than
//! an empty set: treating it as empty would let the next write drop every
//! image the product has.

use super::image_set::ImageSet;
use crate::storage::{BlobMetadata, StorageBackend, StorageError, StorageKey};
use crate::types::ProductId;
use serde::{Deserialize, Serialize};

pub const INDEX_VERSION: u32 = 1;

const INDEX_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub version: u32,
    pub product: ProductId,
    #[serde(flatten)]
    pub set: ImageSet,
}

impl IndexDocument {
    pub fn new(product: ProductId, set: ImageSet) -> Self {
        Self {
            version: INDEX_VERSION,
            product,
            set,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec_pretty(self).map_err(|e| StorageError::Corrupt {
            key: format!("{}/index.json", self.product.storage_segment()),
            message: e.to_string(),
        })
    }

    pub fn from_bytes(key: &StorageKey, bytes: &[u8]) -> Result<Self, StorageError> {
        let corrupt = |message: String| StorageError::Corrupt {
            key: key.to_string(),
            message,
        };
        let doc: Self = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
        if doc.version != INDEX_VERSION {
            return Err(corrupt(format!(
                "index version {} (expected {INDEX_VERSION})",
                doc.version
            )));
        }
        Ok(doc)
    }
}

/// Read a product's set. A missing index means the product has no images.
pub async fn load(
    backend: &dyn StorageBackend,
    product: &ProductId,
) -> Result<ImageSet, StorageError> {
    let key = StorageKey::for_index(product);
    match backend.read(&key).await {
        Ok(bytes) => {
            let doc = IndexDocument::from_bytes(&key, &bytes)?;
            if &doc.product != product {
                return Err(StorageError::Corrupt {
                    key: key.to_string(),
                    message: format!("index belongs to {}", doc.product),
                });
            }
            Ok(doc.set)
        }
        Err(e) if e.is_not_found() => Ok(ImageSet::default()),
        Err(e) => Err(e),
    }
}

/// Write a product's full set, replacing the previous index.
pub async fn save(
    backend: &dyn StorageBackend,
    product: &ProductId,
    set: &ImageSet,
) -> Result<(), StorageError> {
    let key = StorageKey::for_index(product);
    let bytes = IndexDocument::new(product.clone(), set.clone()).to_bytes()?;
    backend
        .put(&key, bytes, &BlobMetadata::new(INDEX_CONTENT_TYPE, "index.json"))
        .await?;
    Ok(())
}
