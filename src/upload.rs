//! Upload coordinator: turns a batch of caller files into registered images.
//!
//! ## Pipeline
//!
//! ```text
//! validate all files ─┬─ rejected ─────────────────────────────┐
//!                     └─ accepted → compress → thumbnail → put → add_image
//!                                        (blocking pool)        │
//!                                                      BatchResult + events
//! ```
//!
//! Validation runs over the whole batch before any backend is touched. Files
//! are then processed one at a time; a failure at any step is recorded against
//! that file and the batch moves on. Blobs written before a later step fails
//! are deleted again.
//!
//! Only malformed options are an `Err`. Everything that can go wrong with an
//! individual file is reported as data in [`BatchResult::failed`].
//!
//! ## Events and cancellation
//!
//! Progress goes to an optional unbounded channel as [`UploadEvent`]s; the
//! last one is always [`UploadEvent::BatchFinished`] carrying the result. The
//! cancellation token is checked before each file. The file in flight always
//! finishes; the rest are reported as [`FileFailure::Cancelled`].

use crate::config::ImagesConfig;
use crate::imaging::{
    CompressError, CompressOptions, CompressedImage, ImageBackend, ThumbnailConfig, UploadFile,
    compress, create_thumbnail, is_image_mime, validate_options,
};
use crate::registry::{NewImage, Registry, RegistryError};
use crate::storage::{BlobMetadata, StorageBackend, StorageError, StorageKey};
use crate::types::{ImageId, ProductId, ProductImage};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Programmer errors. Per-file problems are [`FileFailure`]s instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    #[error("invalid upload options: {0}")]
    InvalidOptions(String),
}

impl From<CompressError> for UploadError {
    fn from(e: CompressError) -> Self {
        UploadError::InvalidOptions(e.to_string())
    }
}

/// Why one file of a batch was not uploaded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FileFailure {
    #[error("batch limit of {limit} files reached")]
    TooManyFiles { limit: usize },
    #[error("file is {size} bytes, the limit is {limit}")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("'{mime_type}' is not an image")]
    NotAnImage { mime_type: String },
    #[error("identical image already on this product")]
    Duplicate,
    #[error(transparent)]
    Compression(#[from] CompressError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("upload cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedFile {
    pub file_name: String,
    pub reason: FileFailure,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub succeeded: Vec<ProductImage>,
    pub failed: Vec<FailedFile>,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// One-line outcome, e.g. `3 of 5 images uploaded`.
    pub fn summary(&self) -> String {
        let total = self.total();
        let noun = if total == 1 { "image" } else { "images" };
        format!("{} of {} {} uploaded", self.succeeded.len(), total, noun)
    }
}

/// Progress notifications. `index` is the 1-based position in the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    FileStarted {
        index: usize,
        file_name: String,
    },
    FileSucceeded {
        index: usize,
        image: ProductImage,
    },
    FileFailed {
        index: usize,
        failure: FailedFile,
    },
    BatchFinished(BatchResult),
}

/// Limits and encoder settings for one batch.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub skip_duplicates: bool,
    pub compression: CompressOptions,
    /// `None` disables thumbnails.
    pub thumbnail: Option<ThumbnailConfig>,
    pub decode_timeout: Duration,
}

impl UploadOptions {
    /// Build options from the loaded configuration.
    pub fn from_config(config: &ImagesConfig) -> Self {
        let compression = CompressOptions {
            max_width: config.compression.max_width,
            max_height: config.compression.max_height,
            quality: config.compression.quality,
            format: config.compression.format,
            background: config.compression.background,
        };
        let thumbnail = config.thumbnails.enabled.then(|| {
            let [w, h] = config.thumbnails.aspect_ratio;
            ThumbnailConfig {
                aspect: (w, h),
                short_edge: config.thumbnails.short_edge,
                ..ThumbnailConfig::default()
            }
        });
        Self {
            max_files: config.uploads.max_files,
            max_file_bytes: config.uploads.max_file_bytes,
            skip_duplicates: config.uploads.skip_duplicates,
            compression,
            thumbnail,
            decode_timeout: Duration::from_secs(config.compression.decode_timeout_secs),
        }
    }

    pub fn validate(&self) -> Result<(), UploadError> {
        if self.max_files == 0 {
            return Err(UploadError::InvalidOptions(
                "max_files must be at least 1".into(),
            ));
        }
        if self.max_file_bytes == 0 {
            return Err(UploadError::InvalidOptions(
                "max_file_bytes must be non-zero".into(),
            ));
        }
        if self.decode_timeout.is_zero() {
            return Err(UploadError::InvalidOptions(
                "decode timeout must be non-zero".into(),
            ));
        }
        if let Some(thumb) = &self.thumbnail
            && (thumb.short_edge == 0 || thumb.aspect.0 == 0 || thumb.aspect.1 == 0)
        {
            return Err(UploadError::InvalidOptions(
                "thumbnail aspect and short edge must be non-zero".into(),
            ));
        }
        validate_options(&self.compression)?;
        Ok(())
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::from_config(&ImagesConfig::default())
    }
}

/// Per-file admission check. Runs before any backend call.
pub fn admit(file: &UploadFile, position: usize, options: &UploadOptions) -> Option<FileFailure> {
    if position >= options.max_files {
        return Some(FileFailure::TooManyFiles {
            limit: options.max_files,
        });
    }
    if !is_image_mime(&file.mime_type) {
        return Some(FileFailure::NotAnImage {
            mime_type: file.mime_type.clone(),
        });
    }
    if file.size() > options.max_file_bytes {
        return Some(FileFailure::FileTooLarge {
            size: file.size(),
            limit: options.max_file_bytes,
        });
    }
    None
}

/// SHA-256 of the original upload bytes, as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

struct Encoded {
    image: CompressedImage,
    thumbnail: Option<Vec<u8>>,
}

pub struct UploadCoordinator {
    engine: Arc<dyn ImageBackend>,
    registry: Arc<Registry>,
}

impl UploadCoordinator {
    pub fn new(engine: Arc<dyn ImageBackend>, registry: Arc<Registry>) -> Self {
        Self { engine, registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Upload `files` to `product`, one at a time.
    pub async fn upload_batch(
        &self,
        files: Vec<UploadFile>,
        product: &ProductId,
        options: &UploadOptions,
        events: Option<&UnboundedSender<UploadEvent>>,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, UploadError> {
        options.validate()?;
        let emit = |event: UploadEvent| {
            if let Some(tx) = events {
                // A dropped receiver only means nobody is listening.
                let _ = tx.send(event);
            }
        };

        info!(%product, files = files.len(), "upload batch started");
        let verdicts: Vec<Option<FileFailure>> = files
            .iter()
            .enumerate()
            .map(|(position, file)| admit(file, position, options))
            .collect();

        let mut result = BatchResult::default();
        let mut cancelled = false;
        for (position, (file, verdict)) in files.into_iter().zip(verdicts).enumerate() {
            let index = position + 1;
            let file_name = file.file_name.clone();
            cancelled = cancelled || cancel.is_cancelled();

            let outcome = if cancelled {
                Err(FileFailure::Cancelled)
            } else if let Some(failure) = verdict {
                Err(failure)
            } else {
                emit(UploadEvent::FileStarted {
                    index,
                    file_name: file_name.clone(),
                });
                self.upload_one(file, product, options).await
            };

            match outcome {
                Ok(image) => {
                    debug!(%product, file = %file_name, image = %image.id, "file uploaded");
                    emit(UploadEvent::FileSucceeded {
                        index,
                        image: image.clone(),
                    });
                    result.succeeded.push(image);
                }
                Err(reason) => {
                    if reason != FileFailure::Cancelled {
                        warn!(%product, file = %file_name, %reason, "file not uploaded");
                    }
                    let failure = FailedFile { file_name, reason };
                    emit(UploadEvent::FileFailed {
                        index,
                        failure: failure.clone(),
                    });
                    result.failed.push(failure);
                }
            }
        }

        info!(%product, summary = %result.summary(), "upload batch finished");
        emit(UploadEvent::BatchFinished(result.clone()));
        Ok(result)
    }

    async fn upload_one(
        &self,
        file: UploadFile,
        product: &ProductId,
        options: &UploadOptions,
    ) -> Result<ProductImage, FileFailure> {
        let hash = content_hash(&file.bytes);
        if options.skip_duplicates && self.registry.has_content_hash(product, &hash).await? {
            return Err(FileFailure::Duplicate);
        }

        let file_name = file.file_name.clone();
        let mime_type = file.mime_type.clone();
        let file_size = file.size();
        let encoded = self.encode(file, options).await?;

        let backend = self.registry.backends().for_product(product).clone();
        let id = ImageId::generate();
        let format = encoded.image.format;
        let metadata = BlobMetadata::new(format.mime_type(), file_name.clone());

        let image_key = StorageKey::for_image(product, id, format);
        debug!(%product, key = %image_key, backend = %backend.kind(), "storing image");
        let stored = backend
            .put(&image_key, encoded.image.bytes, &metadata)
            .await?;
        let mut written = vec![image_key];

        let thumbnail = match encoded.thumbnail {
            Some(bytes) => {
                let key = StorageKey::for_thumbnail(product, id, format);
                match backend.put(&key, bytes, &metadata).await {
                    Ok(location) => {
                        written.push(key);
                        Some(location)
                    }
                    Err(e) => {
                        discard(backend.as_ref(), &written).await;
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        let new_image = NewImage {
            id,
            file_name,
            file_size,
            mime_type,
            format,
            width: encoded.image.width,
            height: encoded.image.height,
            content_hash: hash,
            stored,
            thumbnail,
            uploaded_at: Utc::now(),
        };
        // No hint: the registry promotes the first image of an empty product
        // while it holds that product's lock.
        match self
            .registry
            .add_image(product, new_image, false)
            .await
        {
            Ok(image) => Ok(image),
            Err(e) => {
                discard(backend.as_ref(), &written).await;
                Err(e.into())
            }
        }
    }

    /// Compress (and thumbnail) on the blocking pool.
    ///
    /// Past the decode timeout the file counts as failed, but a blocking task
    /// cannot be torn down, so this still waits for it to end. The file's
    /// buffers are gone by the time this returns and the next file starts.
    async fn encode(
        &self,
        file: UploadFile,
        options: &UploadOptions,
    ) -> Result<Encoded, CompressError> {
        let engine = self.engine.clone();
        let compression = options.compression;
        let thumbnail = options.thumbnail;
        let mut task = tokio::task::spawn_blocking(move || -> Result<Encoded, CompressError> {
            let image = compress(engine.as_ref(), &file, &compression)?;
            let thumbnail = match thumbnail {
                Some(config) => Some(create_thumbnail(
                    engine.as_ref(),
                    &file,
                    &config,
                    image.format,
                    compression.background,
                )?),
                None => None,
            };
            Ok(Encoded { image, thumbnail })
        });

        match tokio::time::timeout(options.decode_timeout, &mut task).await {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(join)) => Err(CompressError::EncodingFailed(join.to_string())),
            Err(_) => {
                warn!(
                    timeout_secs = options.decode_timeout.as_secs_f32(),
                    "decode timed out, waiting for it to release the file"
                );
                // Discard the late result; the file has already failed.
                let _ = task.await;
                Err(CompressError::EncodingFailed(format!(
                    "decoding took longer than {}s",
                    options.decode_timeout.as_secs_f32()
                )))
            }
        }
    }
}

/// Best-effort removal of blobs written for a file that did not make it.
async fn discard(backend: &dyn StorageBackend, keys: &[StorageKey]) {
    for key in keys {
        if let Err(e) = backend.delete(key).await {
            warn!(key = %key, error = %e, "could not clean up blob");
        }
    }
}
