//! Storage backend abstraction.
//!
//! Every backend implements the same [`StorageBackend`] contract: `put`,
//! `get`, `read`, `delete` over string keys laid out per product:
//!
//! ```text
//! drafts/<uuid>/<image-id>.avif          ← draft product, local backend
//! drafts/<uuid>/<image-id>-thumb.avif
//! products/P-1042/<image-id>.jpg         ← persisted product, remote backend
//! products/P-1042/index.json             ← persisted image set (registry index)
//! ```
//!
//! | Backend | Durability | URL shape |
//! |---|---|---|
//! | [`RemoteBackend`] | shared object store over HTTP | `{public_base_url}/{key}` |
//! | [`LocalBackend`] | this machine only, byte quota | `file:///…/{key}` |
//! | [`MemoryBackend`] | this process only, records calls | `memory://{key}` |
//!
//! [`BackendSelector`] maps a product's identity regime to exactly one
//! backend. There is no fallback between backends: a remote failure is an
//! error, never a silent local write that other sessions cannot see.

mod local;
mod memory;
mod remote;
mod selector;

pub use local::LocalBackend;
pub use memory::{BackendCall, MemoryBackend};
pub use remote::{RemoteBackend, RemoteSettings};
pub use selector::BackendSelector;

use crate::imaging::OutputFormat;
use crate::types::{ImageId, ProductId};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote store responded {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("IO error: {0}")]
    Io(String),
    #[error("corrupt object {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Transport(e.to_string())
    }
}

/// Which concrete backend produced a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Remote,
    Local,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Remote => "remote",
            Self::Local => "local",
            Self::Memory => "memory",
        })
    }
}

/// A validated, relative object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(key: impl Into<String>) -> Result<Self, StorageError> {
        let key = key.into();
        let bad = key.is_empty()
            || key.starts_with('/')
            || key.contains('\\')
            || key.split('/').any(|part| part.is_empty() || part == "..");
        if bad {
            return Err(StorageError::InvalidKey(key));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the stored image blob.
    pub fn for_image(product: &ProductId, image: ImageId, format: OutputFormat) -> Self {
        Self(format!(
            "{}/{}.{}",
            product.storage_segment(),
            image,
            format.extension()
        ))
    }

    /// Key of the image's thumbnail blob.
    pub fn for_thumbnail(product: &ProductId, image: ImageId, format: OutputFormat) -> Self {
        Self(format!(
            "{}/{}-thumb.{}",
            product.storage_segment(),
            image,
            format.extension()
        ))
    }

    /// Key of a persisted product's image-set index.
    pub fn for_index(product: &ProductId) -> Self {
        Self(format!("{}/index.json", product.storage_segment()))
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provenance stored alongside a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub content_type: String,
    pub original_name: String,
}

impl BlobMetadata {
    pub fn new(content_type: impl Into<String>, original_name: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            original_name: original_name.into(),
        }
    }
}

/// Where a `put` landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLocation {
    pub key: StorageKey,
    pub url: String,
    /// Only set by the local backend.
    pub local_path: Option<PathBuf>,
    pub size: u64,
}

/// Display address of an existing object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvableUrl {
    pub url: String,
    pub local_path: Option<PathBuf>,
}

/// Outcome of a delete. Deleting an absent key is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Removed,
    NotFound,
}

/// The put/get/delete contract every backend implements identically.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Store `bytes` under `key`, replacing any existing object.
    async fn put(
        &self,
        key: &StorageKey,
        bytes: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> Result<StoredLocation, StorageError>;

    /// Resolve the display URL of an existing object.
    async fn get(&self, key: &StorageKey) -> Result<ResolvableUrl, StorageError>;

    /// Fetch an object's bytes.
    async fn read(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, key: &StorageKey) -> Result<Deletion, StorageError>;
}
