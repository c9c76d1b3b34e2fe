//! Identifiers and records shared by every module.
//!
//! A product is either a **draft** (identity assigned client-side before the
//! record is committed) or **persisted** (identity assigned by the persistence
//! layer). The distinction is carried by [`ProductId`]'s variant, never by
//! inspecting the identifier text: the caller resolves which regime a product
//! is in and constructs the matching variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid product id '{0}': must be non-empty and contain no path separators")]
    InvalidProductId(String),
    #[error("invalid image id '{0}'")]
    InvalidImageId(String),
}

/// Client-side identifier for a product that has not been committed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftId(Uuid);

impl DraftId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DraftId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| TypeError::InvalidProductId(s.to_string()))
    }
}

/// Durable identifier assigned once the product record is committed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PersistedId(String);

impl PersistedId {
    /// Validate and wrap a persisted identifier.
    ///
    /// The id becomes a storage path segment, so separators and parent
    /// references are rejected outright.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty()
            || trimmed.contains('/')
            || trimmed.contains('\\')
            || trimmed.contains("..")
        {
            return Err(TypeError::InvalidProductId(id));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PersistedId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PersistedId> for String {
    fn from(id: PersistedId) -> Self {
        id.0
    }
}

impl fmt::Display for PersistedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owning product of an image set, tagged with its identity regime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ProductId {
    Draft(DraftId),
    Persisted(PersistedId),
}

impl ProductId {
    pub fn draft(id: DraftId) -> Self {
        Self::Draft(id)
    }

    pub fn persisted(id: impl Into<String>) -> Result<Self, TypeError> {
        PersistedId::new(id).map(Self::Persisted)
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, Self::Draft(_))
    }

    /// Relative storage prefix for this product's objects.
    ///
    /// ```text
    /// Draft(6f1c…)        → drafts/6f1c…
    /// Persisted("P-1042") → products/P-1042
    /// ```
    pub fn storage_segment(&self) -> String {
        match self {
            Self::Draft(id) => format!("drafts/{id}"),
            Self::Persisted(id) => format!("products/{id}"),
        }
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft(id) => write!(f, "draft {id}"),
            Self::Persisted(id) => write!(f, "product {id}"),
        }
    }
}

/// Opaque image identifier, assigned at creation and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ImageId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| TypeError::InvalidImageId(s.to_string()))
    }
}

/// The canonical record for one stored image, as handed to callers.
///
/// `is_primary` is derived from the owning set's primary pointer when the
/// record is produced; it is never stored per image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductImage {
    pub id: ImageId,
    pub product_id: ProductId,
    /// Display address: a remote public URL or a `file://` URL.
    pub url: String,
    /// Set only for images held by the local backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// Original upload file name.
    pub file_name: String,
    /// Original upload size in bytes.
    pub file_size: u64,
    /// Declared media type of the original upload.
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub is_primary: bool,
    /// Backend key of the stored (re-encoded) blob.
    pub storage_key: String,
    /// Media type of the stored blob.
    pub stored_format: String,
    pub stored_size: u64,
    pub width: u32,
    pub height: u32,
    /// SHA-256 of the original upload bytes.
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_key: Option<String>,
}
