//! Shared object store reached over HTTP.
//!
//! Speaks the common bucket/object REST shape:
//!
//! ```text
//! PUT    {endpoint}/object/{bucket}/{key}   store (upsert)
//! HEAD   {endpoint}/object/{bucket}/{key}   existence check
//! GET    {endpoint}/object/{bucket}/{key}   fetch bytes
//! DELETE {endpoint}/object/{bucket}/{key}   remove
//! ```
//!
//! Display URLs are `{public_base_url}/{key}`. Every key segment is
//! percent-encoded, so ids like `SKU#12` stay inside the path.

use super::{
    BackendKind, BlobMetadata, Deletion, ResolvableUrl, StorageBackend, StorageError, StorageKey,
    StoredLocation,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub endpoint: String,
    pub bucket: String,
    pub public_base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

pub struct RemoteBackend {
    client: Client,
    settings: RemoteSettings,
    object_base: Url,
    public_base: Url,
}

impl RemoteBackend {
    pub fn new(settings: RemoteSettings) -> Result<Self, StorageError> {
        if settings.endpoint.trim().is_empty() {
            return Err(StorageError::Transport(
                "remote endpoint is not configured".into(),
            ));
        }
        let endpoint = parse_base(&settings.endpoint)?;
        let object_base = with_segments(&endpoint, ["object", settings.bucket.as_str()]);
        let public_base = if settings.public_base_url.is_empty() {
            with_segments(&endpoint, ["object", "public", settings.bucket.as_str()])
        } else {
            parse_base(&settings.public_base_url)?
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            settings,
            object_base,
            public_base,
        })
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    pub fn object_url(&self, key: &StorageKey) -> String {
        with_segments(&self.object_base, key.as_str().split('/')).into()
    }

    pub fn public_url(&self, key: &StorageKey) -> String {
        with_segments(&self.public_base, key.as_str().split('/')).into()
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.settings.api_key {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn parse_base(raw: &str) -> Result<Url, StorageError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| StorageError::Transport(format!("invalid remote url '{raw}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(StorageError::Transport(format!(
            "remote url '{raw}' cannot hold object paths"
        )));
    }
    Ok(url)
}

/// `base` with `segments` appended, each one percent-encoded.
fn with_segments<'a>(base: &Url, segments: impl IntoIterator<Item = &'a str>) -> Url {
    let mut url = base.clone();
    // Only fails for cannot-be-a-base URLs, which `parse_base` rejects.
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Map a non-success response status onto the storage error taxonomy.
pub(crate) fn status_error(status: u16, key: &StorageKey, message: String) -> StorageError {
    match status {
        404 => StorageError::NotFound(key.to_string()),
        413 | 507 => StorageError::QuotaExceeded(format!("{key}: {message}")),
        _ => StorageError::Remote { status, message },
    }
}

async fn check(response: Response, key: &StorageKey) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("").to_string());
    Err(status_error(status.as_u16(), key, message))
}

#[async_trait]
impl StorageBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn put(
        &self,
        key: &StorageKey,
        bytes: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> Result<StoredLocation, StorageError> {
        let size = bytes.len() as u64;
        let request = self
            .client
            .put(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, &metadata.content_type)
            .header("x-upsert", "true")
            .body(bytes);
        check(self.authorized(request).send().await?, key).await?;
        debug!(key = %key, bytes = size, "stored remotely");
        Ok(StoredLocation {
            key: key.clone(),
            url: self.public_url(key),
            local_path: None,
            size,
        })
    }

    async fn get(&self, key: &StorageKey) -> Result<ResolvableUrl, StorageError> {
        let request = self.client.head(self.object_url(key));
        check(self.authorized(request).send().await?, key).await?;
        Ok(ResolvableUrl {
            url: self.public_url(key),
            local_path: None,
        })
    }

    async fn read(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError> {
        let request = self.client.get(self.object_url(key));
        let response = check(self.authorized(request).send().await?, key).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete(&self, key: &StorageKey) -> Result<Deletion, StorageError> {
        let request = self.client.delete(self.object_url(key));
        let response = self.authorized(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Deletion::NotFound);
        }
        check(response, key).await?;
        Ok(Deletion::Removed)
    }
}
