//! Device-local backend for draft products.
//!
//! Objects are plain files under a root directory. The backend tracks the
//! total bytes stored and refuses writes that would exceed its quota. Writes
//! go to a temporary sibling first and are renamed into place, so a failed
//! write never leaves a partial object behind.

use super::{
    BackendKind, BlobMetadata, Deletion, ResolvableUrl, StorageBackend, StorageError, StorageKey,
    StoredLocation,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use walkdir::WalkDir;

pub struct LocalBackend {
    root: PathBuf,
    quota_bytes: u64,
    used_bytes: Mutex<u64>,
}

impl LocalBackend {
    /// Open (creating if needed) a store rooted at `root`. Existing files
    /// count towards the quota.
    pub async fn open(root: impl AsRef<Path>, quota_bytes: u64) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(root.as_ref()).await?;
        let root = tokio::fs::canonicalize(root.as_ref()).await?;
        let scan_root = root.clone();
        let used = tokio::task::spawn_blocking(move || directory_size(&scan_root))
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        debug!(root = %root.display(), used, quota_bytes, "opened local store");
        Ok(Self {
            root,
            quota_bytes,
            used_bytes: Mutex::new(used),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn used_bytes(&self) -> u64 {
        *self.usage()
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    fn usage(&self) -> std::sync::MutexGuard<'_, u64> {
        self.used_bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn url_for(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    /// Account for replacing `existing` bytes with `incoming` bytes. Fails
    /// without changing usage when the quota would be exceeded.
    fn reserve(&self, key: &StorageKey, existing: u64, incoming: u64) -> Result<(), StorageError> {
        let mut used = self.usage();
        let projected = used.saturating_sub(existing) + incoming;
        if projected > self.quota_bytes {
            return Err(StorageError::QuotaExceeded(format!(
                "writing {key} ({incoming} bytes) needs {projected} of {} bytes",
                self.quota_bytes
            )));
        }
        *used = projected;
        Ok(())
    }

    fn release(&self, bytes: u64) {
        let mut used = self.usage();
        *used = used.saturating_sub(bytes);
    }

    fn restore(&self, existing: u64, incoming: u64) {
        let mut used = self.usage();
        *used = used.saturating_sub(incoming) + existing;
    }
}

fn directory_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

async fn file_len(path: &Path) -> Result<Option<u64>, StorageError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn not_found(key: &StorageKey, e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        e.into()
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn put(
        &self,
        key: &StorageKey,
        bytes: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> Result<StoredLocation, StorageError> {
        let path = self.path_for(key);
        let incoming = bytes.len() as u64;
        let existing = file_len(&path).await?.unwrap_or(0);
        self.reserve(key, existing, incoming)?;

        let tmp = path.with_extension("partial");
        let write = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &path).await
        };
        if let Err(e) = write.await {
            self.restore(existing, incoming);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(key = %key, bytes = incoming, content_type = %metadata.content_type, "stored locally");
        Ok(StoredLocation {
            key: key.clone(),
            url: Self::url_for(&path),
            local_path: Some(path),
            size: incoming,
        })
    }

    async fn get(&self, key: &StorageKey) -> Result<ResolvableUrl, StorageError> {
        let path = self.path_for(key);
        tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found(key, e))?;
        Ok(ResolvableUrl {
            url: Self::url_for(&path),
            local_path: Some(path),
        })
    }

    async fn read(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(self.path_for(key))
            .await
            .map_err(|e| not_found(key, e))
    }

    async fn delete(&self, key: &StorageKey) -> Result<Deletion, StorageError> {
        let path = self.path_for(key);
        let Some(len) = file_len(&path).await? else {
            return Ok(Deletion::NotFound);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Deletion::NotFound),
            Err(e) => return Err(e.into()),
        }
        self.release(len);

        // Drop the product directory once its last object is gone.
        if let Some(parent) = path.parent()
            && parent != self.root
        {
            let _ = tokio::fs::remove_dir(parent).await;
        }
        Ok(Deletion::Removed)
    }
}
