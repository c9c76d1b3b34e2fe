//! In-process backend that keeps objects in a map and records every call.
//!
//! Useful for embedding the registry without any I/O, and for asserting
//! which backend an operation touched.

use super::{
    BackendKind, BlobMetadata, Deletion, ResolvableUrl, StorageBackend, StorageError, StorageKey,
    StoredLocation,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Put(String),
    Get(String),
    Read(String),
    Delete(String),
}

impl BackendCall {
    pub fn key(&self) -> &str {
        match self {
            Self::Put(k) | Self::Get(k) | Self::Read(k) | Self::Delete(k) => k,
        }
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<HashMap<String, (Vec<u8>, BlobMetadata)>>,
    calls: Mutex<Vec<BackendCall>>,
    failing_puts: Mutex<Vec<String>>,
    put_delay: Mutex<Option<Duration>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `put` whose key contains `fragment` fail with a transport
    /// error. Used to simulate a flaky remote store.
    pub fn fail_puts_containing(&self, fragment: impl Into<String>) {
        lock(&self.failing_puts).push(fragment.into());
    }

    /// Make every `put` wait `delay` before storing, like a slow link.
    pub fn delay_puts(&self, delay: Duration) {
        *lock(&self.put_delay) = Some(delay);
    }

    pub fn clear_failures(&self) {
        lock(&self.failing_puts).clear();
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.objects).contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }

    fn record(&self, call: BackendCall) {
        lock(&self.calls).push(call);
    }

    fn url(key: &StorageKey) -> String {
        format!("memory://{key}")
    }
}

/// The maps hold plain data, so a poisoned lock still has a usable value.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn put(
        &self,
        key: &StorageKey,
        bytes: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> Result<StoredLocation, StorageError> {
        self.record(BackendCall::Put(key.to_string()));
        let delay = *lock(&self.put_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.failing_puts)
            .iter()
            .any(|fragment| key.as_str().contains(fragment.as_str()))
        {
            return Err(StorageError::Transport(format!(
                "simulated failure writing {key}"
            )));
        }
        let size = bytes.len() as u64;
        lock(&self.objects).insert(key.to_string(), (bytes, metadata.clone()));
        Ok(StoredLocation {
            key: key.clone(),
            url: Self::url(key),
            local_path: None,
            size,
        })
    }

    async fn get(&self, key: &StorageKey) -> Result<ResolvableUrl, StorageError> {
        self.record(BackendCall::Get(key.to_string()));
        if lock(&self.objects).contains_key(key.as_str()) {
            Ok(ResolvableUrl {
                url: Self::url(key),
                local_path: None,
            })
        } else {
            Err(StorageError::NotFound(key.to_string()))
        }
    }

    async fn read(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError> {
        self.record(BackendCall::Read(key.to_string()));
        lock(&self.objects)
            .get(key.as_str())
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &StorageKey) -> Result<Deletion, StorageError> {
        self.record(BackendCall::Delete(key.to_string()));
        match lock(&self.objects).remove(key.as_str()) {
            Some(_) => Ok(Deletion::Removed),
            None => Ok(Deletion::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> StorageKey {
        StorageKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn put_get_read_delete() {
        let backend = MemoryBackend::new();
        let meta = BlobMetadata::new("image/jpeg", "a.jpg");

        let loc = backend.put(&key("p/a.jpg"), vec![1, 2, 3], &meta).await.unwrap();
        assert_eq!(loc.url, "memory://p/a.jpg");
        assert_eq!(loc.size, 3);

        assert_eq!(backend.get(&key("p/a.jpg")).await.unwrap().url, loc.url);
        assert_eq!(backend.read(&key("p/a.jpg")).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(
            backend.delete(&key("p/a.jpg")).await.unwrap(),
            Deletion::Removed
        );
        assert_eq!(
            backend.delete(&key("p/a.jpg")).await.unwrap(),
            Deletion::NotFound
        );
        assert!(backend.get(&key("p/a.jpg")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn simulated_put_failure() {
        let backend = MemoryBackend::new();
        backend.fail_puts_containing("bad");
        let meta = BlobMetadata::new("image/jpeg", "a.jpg");
        let err = backend.put(&key("p/bad.jpg"), vec![1], &meta).await.unwrap_err();
        assert!(matches!(err, StorageError::Transport(_)));
        assert!(!backend.contains("p/bad.jpg"));
        assert_eq!(backend.calls(), vec![BackendCall::Put("p/bad.jpg".into())]);
    }
}
