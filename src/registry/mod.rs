//! Image registry: the authoritative per-product image sets.
//!
//! The registry owns one [`ImageSet`] per product and is the only writer of
//! it. Every mutation follows the same cycle while holding that product's
//! lock:
//!
//! 1. Clone the current set and apply the change to the copy.
//! 2. Check the single-primary rule on the copy.
//! 3. Persist the copy (remote index for persisted products; drafts are
//!    process-local and skip this step).
//! 4. Swap the copy in.
//!
//! A failure at any step leaves the visible set untouched.
//!
//! ## Identity regimes
//!
//! Draft products keep their blobs in the local backend and their set in
//! memory. Persisted products keep both blobs and index in the remote backend.
//! [`Registry::rekey`] is the only bridge between the two.

mod image_set;
mod index;

pub use image_set::{ImageEntry, ImageSet};
pub use index::{INDEX_VERSION, IndexDocument};

use crate::imaging::OutputFormat;
use crate::storage::{
    BackendSelector, BlobMetadata, Deletion, StorageBackend, StorageError, StorageKey,
    StoredLocation,
};
use crate::types::{DraftId, ImageId, PersistedId, ProductId, ProductImage};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("image {0} not found")]
    NotFound(ImageId),
    #[error("image {0} is already registered")]
    Duplicate(ImageId),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{product} would violate the single-primary rule")]
    PrimaryInvariantViolation { product: ProductId },
    #[error("{product} is not a {expected} product")]
    WrongRegime {
        product: ProductId,
        expected: &'static str,
    },
    #[error("index for {product} could not be used: {message}")]
    Index { product: ProductId, message: String },
    #[error("{product} was discarded")]
    Discarded { product: ProductId },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Everything the registry needs to record a freshly stored image.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub id: ImageId,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub content_hash: String,
    pub stored: StoredLocation,
    pub thumbnail: Option<StoredLocation>,
    pub uploaded_at: DateTime<Utc>,
}

impl NewImage {
    fn into_entry(self) -> ImageEntry {
        ImageEntry {
            id: self.id,
            url: self.stored.url,
            local_path: self.stored.local_path,
            file_name: self.file_name,
            file_size: self.file_size,
            mime_type: self.mime_type,
            uploaded_at: self.uploaded_at,
            storage_key: self.stored.key.to_string(),
            format: self.format,
            stored_size: self.stored.size,
            width: self.width,
            height: self.height,
            content_hash: self.content_hash,
            thumbnail_url: self.thumbnail.as_ref().map(|t| t.url.clone()),
            thumbnail_key: self.thumbnail.map(|t| t.key.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    NotFound,
}

/// One image that stayed on the draft during a rekey.
#[derive(Debug, Clone, PartialEq)]
pub struct RekeyFailure {
    pub image_id: ImageId,
    pub file_name: String,
    pub error: StorageError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RekeyReport {
    /// Images now owned by the persisted product.
    pub moved: Vec<ProductImage>,
    pub failed: Vec<RekeyFailure>,
}

impl RekeyReport {
    pub fn moved_count(&self) -> usize {
        self.moved.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The display URL of an image. Locally held images resolve to a `file://`
/// URL built from their path; everything else uses the stored URL.
pub fn resolve_display_url(image: &ProductImage) -> String {
    match &image.local_path {
        Some(path) => format!("file://{}", path.display()),
        None => image.url.clone(),
    }
}

/// Per-product state behind the product's lock.
#[derive(Default)]
struct SlotState {
    /// `None` until the set has been read (or created, for drafts).
    set: Option<ImageSet>,
    /// Set once a draft is discarded. The slot has already left the map, so
    /// only callers that fetched it earlier can still see it.
    retired: bool,
}

type Slot = Arc<tokio::sync::Mutex<SlotState>>;

pub struct Registry {
    backends: BackendSelector,
    slots: Mutex<HashMap<ProductId, Slot>>,
    owners: Mutex<HashMap<ImageId, ProductId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Registry {
    pub fn new(backends: BackendSelector) -> Self {
        Self {
            backends,
            slots: Mutex::new(HashMap::new()),
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub fn backends(&self) -> &BackendSelector {
        &self.backends
    }

    fn backend_for(&self, product: &ProductId) -> &Arc<dyn StorageBackend> {
        self.backends.for_product(product)
    }

    fn slot(&self, product: &ProductId) -> Slot {
        lock(&self.slots)
            .entry(product.clone())
            .or_default()
            .clone()
    }

    fn remember(&self, product: &ProductId, set: &ImageSet) {
        let mut owners = lock(&self.owners);
        for entry in &set.images {
            owners.insert(entry.id, product.clone());
        }
    }

    /// Drop owner records that still point at `product`. An image moved to
    /// another product in the meantime keeps its new owner.
    fn forget(&self, product: &ProductId, ids: impl IntoIterator<Item = ImageId>) {
        let mut owners = lock(&self.owners);
        for id in ids {
            if owners.get(&id) == Some(product) {
                owners.remove(&id);
            }
        }
    }

    async fn read_index(&self, product: &ProductId) -> Result<ImageSet> {
        index::load(self.backend_for(product).as_ref(), product)
            .await
            .map_err(|e| match e {
                StorageError::Corrupt { message, .. } => RegistryError::Index {
                    product: product.clone(),
                    message,
                },
                other => RegistryError::Storage(other),
            })
    }

    /// The current set, reading the persisted index on first access.
    async fn hydrate<'a>(
        &self,
        product: &ProductId,
        slot: &'a mut SlotState,
    ) -> Result<&'a mut ImageSet> {
        if slot.retired {
            return Err(RegistryError::Discarded {
                product: product.clone(),
            });
        }
        let set = match slot.set.take() {
            Some(set) => set,
            None => {
                let set = match product {
                    ProductId::Draft(_) => ImageSet::default(),
                    ProductId::Persisted(_) => self.read_index(product).await?,
                };
                self.remember(product, &set);
                set
            }
        };
        Ok(slot.set.insert(set))
    }

    /// Check and persist `next`. Callers swap it in only on success.
    async fn commit(&self, product: &ProductId, next: &ImageSet) -> Result<()> {
        if !next.primary_is_consistent() {
            return Err(RegistryError::PrimaryInvariantViolation {
                product: product.clone(),
            });
        }
        if let ProductId::Persisted(_) = product {
            index::save(self.backend_for(product).as_ref(), product, next).await?;
        }
        Ok(())
    }

    /// Record a stored image. The first image of a product is always primary;
    /// later ones become primary only when `is_primary_hint` is set.
    pub async fn add_image(
        &self,
        product: &ProductId,
        image: NewImage,
        is_primary_hint: bool,
    ) -> Result<ProductImage> {
        let slot = self.slot(product);
        let mut guard = slot.lock().await;
        let set = self.hydrate(product, &mut guard).await?;
        if set.contains(image.id) {
            return Err(RegistryError::Duplicate(image.id));
        }

        let id = image.id;
        let mut next = set.clone();
        next.push(image.into_entry(), is_primary_hint);
        self.commit(product, &next).await?;
        *set = next;

        lock(&self.owners).insert(id, product.clone());
        debug!(%product, image = %id, primary = set.is_primary(id), "image registered");
        set.get(id)
            .map(|entry| entry.to_product_image(product, set.is_primary(id)))
            .ok_or(RegistryError::NotFound(id))
    }

    /// All images of a product, primary first, then insertion order.
    pub async fn list_images(&self, product: &ProductId) -> Result<Vec<ProductImage>> {
        let slot = self.slot(product);
        let mut guard = slot.lock().await;
        let set = self.hydrate(product, &mut guard).await?;
        Ok(set.to_product_images(product))
    }

    pub async fn primary_image(&self, product: &ProductId) -> Result<Option<ProductImage>> {
        Ok(self
            .list_images(product)
            .await?
            .into_iter()
            .find(|img| img.is_primary))
    }

    /// Whether a product already holds an image with this content hash.
    pub async fn has_content_hash(&self, product: &ProductId, content_hash: &str) -> Result<bool> {
        let slot = self.slot(product);
        let mut guard = slot.lock().await;
        let set = self.hydrate(product, &mut guard).await?;
        Ok(set.contains_hash(content_hash))
    }

    pub async fn image_count(&self, product: &ProductId) -> Result<usize> {
        let slot = self.slot(product);
        let mut guard = slot.lock().await;
        Ok(self.hydrate(product, &mut guard).await?.len())
    }

    /// Make `image_id` the product's only primary image.
    pub async fn set_primary(&self, product: &ProductId, image_id: ImageId) -> Result<()> {
        let slot = self.slot(product);
        let mut guard = slot.lock().await;
        let set = self.hydrate(product, &mut guard).await?;
        if set.is_primary(image_id) {
            return Ok(());
        }

        let mut next = set.clone();
        if !next.set_primary(image_id) {
            return Err(RegistryError::NotFound(image_id));
        }
        self.commit(product, &next).await?;
        *set = next;
        info!(%product, image = %image_id, "primary image changed");
        Ok(())
    }

    /// Delete an image and its blobs. Removing the primary promotes the
    /// earliest remaining image. Unknown ids report [`Removal::NotFound`].
    pub async fn remove_image(&self, image_id: ImageId) -> Result<Removal> {
        loop {
            let owner = lock(&self.owners).get(&image_id).cloned();
            let Some(product) = owner else {
                return Ok(Removal::NotFound);
            };

            let slot = self.slot(&product);
            let mut guard = slot.lock().await;
            // A rekey may have moved the image while this waited for the lock.
            if lock(&self.owners).get(&image_id) != Some(&product) {
                debug!(image = %image_id, from = %product, "owner changed, retrying removal");
                continue;
            }
            let set = self.hydrate(&product, &mut guard).await?;
            let Some(entry) = set.get(image_id).cloned() else {
                self.forget(&product, [image_id]);
                return Ok(Removal::NotFound);
            };

            // Blobs first: a retry after a failed index write finds them
            // already gone, which counts as success.
            let backend = self.backend_for(&product).clone();
            delete_blobs(backend.as_ref(), &entry).await?;

            let mut next = set.clone();
            next.remove(image_id);
            self.commit(&product, &next).await?;
            *set = next;

            self.forget(&product, [image_id]);
            info!(%product, image = %image_id, "image removed");
            return Ok(Removal::Removed);
        }
    }

    /// Re-resolve every URL of a product through its backend.
    pub async fn refresh_urls(&self, product: &ProductId) -> Result<Vec<ProductImage>> {
        let slot = self.slot(product);
        let mut guard = slot.lock().await;
        let set = self.hydrate(product, &mut guard).await?;
        let backend = self.backend_for(product).clone();

        let mut next = set.clone();
        for entry in &mut next.images {
            let resolved = backend.get(&StorageKey::new(&entry.storage_key)?).await?;
            entry.url = resolved.url;
            entry.local_path = resolved.local_path;
            if let Some(key) = &entry.thumbnail_key {
                entry.thumbnail_url = Some(backend.get(&StorageKey::new(key)?).await?.url);
            }
        }
        if next != *set {
            self.commit(product, &next).await?;
            *set = next;
        }
        Ok(set.to_product_images(product))
    }

    /// Re-read a persisted product's index, replacing any cached set.
    /// Drafts have no durable index and are rejected.
    pub async fn load(&self, product: &ProductId) -> Result<Vec<ProductImage>> {
        if product.is_draft() {
            return Err(RegistryError::WrongRegime {
                product: product.clone(),
                expected: "persisted",
            });
        }
        let slot = self.slot(product);
        let mut guard = slot.lock().await;
        let set = self.read_index(product).await?;
        self.remember(product, &set);
        let images = set.to_product_images(product);
        guard.set = Some(set);
        Ok(images)
    }

    /// Drop a draft and delete its local blobs. Returns how many images were
    /// discarded.
    ///
    /// On success the draft's slot is retired while its lock is still held:
    /// a caller already waiting on it gets [`RegistryError::Discarded`], and
    /// later callers start from a fresh empty draft.
    pub async fn discard_draft(&self, draft: &DraftId) -> Result<usize> {
        let product = ProductId::Draft(*draft);
        let slot = self.slot(&product);
        let mut guard = slot.lock().await;
        let set = self.hydrate(&product, &mut guard).await?;
        let backend = self.backend_for(&product).clone();

        let mut discarded = Vec::new();
        let mut failure = None;
        for entry in &set.images {
            match delete_blobs(backend.as_ref(), entry).await {
                Ok(()) => discarded.push(entry.id),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let mut next = set.clone();
        for id in &discarded {
            next.remove(*id);
        }
        self.commit(&product, &next).await?;
        *set = next;
        self.forget(&product, discarded.iter().copied());

        if let Some(e) = failure {
            return Err(e.into());
        }
        guard.retired = true;
        lock(&self.slots).remove(&product);
        drop(guard);
        info!(%product, count = discarded.len(), "draft discarded");
        Ok(discarded.len())
    }

    /// Move every image of `draft` onto `persisted`.
    ///
    /// Each image (and its thumbnail) is copied to the remote backend under
    /// the persisted product's keys. The persisted index is then written once
    /// for all copied images, and only after that are the local copies
    /// deleted. Images that could not be copied stay on the draft and are
    /// listed in [`RekeyReport::failed`]; calling `rekey` again retries them.
    pub async fn rekey(&self, draft: &DraftId, persisted: &PersistedId) -> Result<RekeyReport> {
        let from = ProductId::Draft(*draft);
        let to = ProductId::Persisted(persisted.clone());

        let from_slot = self.slot(&from);
        let to_slot = self.slot(&to);
        let mut from_guard = from_slot.lock().await;
        let mut to_guard = to_slot.lock().await;
        let draft_set = self.hydrate(&from, &mut from_guard).await?;
        let target_set = self.hydrate(&to, &mut to_guard).await?;

        let local = self.backend_for(&from).clone();
        let remote = self.backend_for(&to).clone();
        let mut report = RekeyReport::default();
        let mut copied: Vec<(ImageEntry, Vec<StorageKey>)> = Vec::new();

        for entry in &draft_set.images {
            match copy_entry(local.as_ref(), remote.as_ref(), &to, entry).await {
                Ok(moved) => {
                    debug!(image = %entry.id, %to, "image copied");
                    copied.push(moved);
                }
                Err(error) => {
                    warn!(image = %entry.id, %error, "image could not be moved");
                    report.failed.push(RekeyFailure {
                        image_id: entry.id,
                        file_name: entry.file_name.clone(),
                        error,
                    });
                }
            }
        }
        if copied.is_empty() {
            return Ok(report);
        }

        let mut next_target = target_set.clone();
        let keep_draft_primary = next_target.primary.is_none();
        for (entry, _) in &copied {
            let make_primary = keep_draft_primary && draft_set.is_primary(entry.id);
            next_target.push(entry.clone(), make_primary);
        }
        if let Err(e) = self.commit(&to, &next_target).await {
            let error = match e {
                RegistryError::Storage(error) => error,
                other => return Err(other),
            };
            warn!(%to, %error, "index write failed, rolling back copied images");
            for (entry, keys) in copied {
                for key in &keys {
                    let _ = remote.delete(key).await;
                }
                report.failed.push(RekeyFailure {
                    image_id: entry.id,
                    file_name: entry.file_name,
                    error: error.clone(),
                });
            }
            return Ok(report);
        }
        *target_set = next_target;

        let mut next_draft = draft_set.clone();
        for (entry, _) in &copied {
            if let Some(old) = next_draft.remove(entry.id)
                && let Err(e) = delete_blobs(local.as_ref(), &old).await
            {
                warn!(image = %entry.id, error = %e, "local copy left behind after move");
            }
        }
        self.commit(&from, &next_draft).await?;
        *draft_set = next_draft;

        self.remember(&to, target_set);
        report.moved = copied
            .iter()
            .map(|(entry, _)| entry.to_product_image(&to, target_set.is_primary(entry.id)))
            .collect();
        info!(
            %from,
            %to,
            moved = report.moved_count(),
            failed = report.failed.len(),
            "draft rekeyed"
        );
        Ok(report)
    }
}

async fn delete_blobs(
    backend: &dyn StorageBackend,
    entry: &ImageEntry,
) -> std::result::Result<(), StorageError> {
    let mut keys = vec![entry.storage_key.as_str()];
    keys.extend(entry.thumbnail_key.as_deref());
    for key in keys {
        let deletion = backend.delete(&StorageKey::new(key)?).await?;
        if deletion == Deletion::NotFound {
            debug!(key, "blob already gone");
        }
    }
    Ok(())
}

/// Copy one entry's blobs to `target`. On failure nothing copied so far is
/// left behind. Returns the re-keyed entry and the keys written.
async fn copy_entry(
    from: &dyn StorageBackend,
    to: &dyn StorageBackend,
    target: &ProductId,
    entry: &ImageEntry,
) -> std::result::Result<(ImageEntry, Vec<StorageKey>), StorageError> {
    let metadata = BlobMetadata::new(entry.format.mime_type(), entry.file_name.clone());
    let mut moved = entry.clone();
    let mut written = Vec::new();

    let result = async {
        let key = StorageKey::for_image(target, entry.id, entry.format);
        let bytes = from.read(&StorageKey::new(&entry.storage_key)?).await?;
        let stored = to.put(&key, bytes, &metadata).await?;
        written.push(key);
        moved.url = stored.url;
        moved.local_path = stored.local_path;
        moved.storage_key = stored.key.to_string();

        if let Some(thumb_key) = &entry.thumbnail_key {
            let key = StorageKey::for_thumbnail(target, entry.id, entry.format);
            let bytes = from.read(&StorageKey::new(thumb_key)?).await?;
            let stored = to.put(&key, bytes, &metadata).await?;
            written.push(key);
            moved.thumbnail_url = Some(stored.url);
            moved.thumbnail_key = Some(stored.key.to_string());
        }
        Ok::<(), StorageError>(())
    }
    .await;

    match result {
        Ok(()) => Ok((moved, written)),
        Err(e) => {
            for key in &written {
                let _ = to.delete(key).await;
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BackendCall, MemoryBackend};
    use crate::test_helpers::{new_image, stored_image};
    use std::time::Duration;

    struct Fixture {
        local: Arc<MemoryBackend>,
        remote: Arc<MemoryBackend>,
        registry: Registry,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(MemoryBackend::new());
        let remote = Arc::new(MemoryBackend::new());
        let registry = Registry::new(BackendSelector::new(local.clone(), remote.clone()));
        Fixture {
            local,
            remote,
            registry,
        }
    }

    fn persisted(id: &str) -> ProductId {
        ProductId::persisted(id).unwrap()
    }

    async fn add(f: &Fixture, product: &ProductId, name: &str, hint: bool) -> ProductImage {
        let backend = f.registry.backends().for_product(product).clone();
        let image = stored_image(backend.as_ref(), product, name).await;
        f.registry.add_image(product, image, hint).await.unwrap()
    }

    fn primaries(images: &[ProductImage]) -> usize {
        images.iter().filter(|img| img.is_primary).count()
    }

    // =========================================================================
    // add / list / set_primary
    // =========================================================================

    #[tokio::test]
    async fn first_image_is_primary_even_without_hint() {
        let f = fixture();
        let product = persisted("P-1");
        let img = add(&f, &product, "a.png", false).await;
        assert!(img.is_primary);
    }

    #[tokio::test]
    async fn list_orders_primary_first_then_insertion() {
        let f = fixture();
        let product = persisted("P-1");
        let a = add(&f, &product, "a.png", false).await;
        let b = add(&f, &product, "b.png", false).await;
        let c = add(&f, &product, "c.png", false).await;
        f.registry.set_primary(&product, c.id).await.unwrap();

        let ids: Vec<ImageId> = f
            .registry
            .list_images(&product)
            .await
            .unwrap()
            .iter()
            .map(|img| img.id)
            .collect();
        assert_eq!(ids, vec![c.id, a.id, b.id]);
    }

    #[tokio::test]
    async fn single_primary_holds_across_add_set_remove() {
        let f = fixture();
        let product = persisted("P-1");
        let a = add(&f, &product, "a.png", false).await;
        let b = add(&f, &product, "b.png", true).await;
        let c = add(&f, &product, "c.png", false).await;

        let check = |images: Vec<ProductImage>| {
            if images.is_empty() {
                assert_eq!(primaries(&images), 0);
            } else {
                assert_eq!(primaries(&images), 1);
            }
        };
        check(f.registry.list_images(&product).await.unwrap());
        f.registry.set_primary(&product, c.id).await.unwrap();
        check(f.registry.list_images(&product).await.unwrap());
        f.registry.remove_image(c.id).await.unwrap();
        check(f.registry.list_images(&product).await.unwrap());
        f.registry.remove_image(a.id).await.unwrap();
        check(f.registry.list_images(&product).await.unwrap());
        f.registry.remove_image(b.id).await.unwrap();
        check(f.registry.list_images(&product).await.unwrap());
    }

    #[tokio::test]
    async fn set_primary_unknown_image_is_not_found() {
        let f = fixture();
        let product = persisted("P-1");
        add(&f, &product, "a.png", false).await;
        let missing = ImageId::generate();
        assert_eq!(
            f.registry.set_primary(&product, missing).await,
            Err(RegistryError::NotFound(missing))
        );
    }

    #[tokio::test]
    async fn persisted_sets_are_written_to_the_remote_index() {
        let f = fixture();
        let product = persisted("P-1");
        let a = add(&f, &product, "a.png", false).await;
        assert!(f.remote.contains("products/P-1/index.json"));

        // A fresh registry over the same remote sees the same set.
        let other = Registry::new(BackendSelector::new(f.local.clone(), f.remote.clone()));
        let images = other.list_images(&product).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, a.id);
        assert!(images[0].is_primary);
    }

    #[tokio::test]
    async fn failed_index_write_leaves_set_unchanged() {
        let f = fixture();
        let product = persisted("P-1");
        let a = add(&f, &product, "a.png", false).await;
        let b = add(&f, &product, "b.png", false).await;

        f.remote.fail_puts_containing("index.json");
        assert!(matches!(
            f.registry.set_primary(&product, b.id).await,
            Err(RegistryError::Storage(_))
        ));
        let primary = f.registry.primary_image(&product).await.unwrap().unwrap();
        assert_eq!(primary.id, a.id);
    }

    #[tokio::test]
    async fn duplicate_image_id_is_rejected() {
        let f = fixture();
        let product = persisted("P-1");
        let image = new_image("a.png");
        f.registry
            .add_image(&product, image.clone(), false)
            .await
            .unwrap();
        assert_eq!(
            f.registry.add_image(&product, image.clone(), false).await,
            Err(RegistryError::Duplicate(image.id))
        );
    }

    // =========================================================================
    // remove
    // =========================================================================

    #[tokio::test]
    async fn remove_is_idempotent() {
        let f = fixture();
        let product = persisted("P-1");
        let a = add(&f, &product, "a.png", false).await;

        assert_eq!(f.registry.remove_image(a.id).await, Ok(Removal::Removed));
        assert_eq!(f.registry.remove_image(a.id).await, Ok(Removal::NotFound));
        assert!(!f.remote.contains(&a.storage_key));
    }

    #[tokio::test]
    async fn remove_deletes_thumbnail_too() {
        let f = fixture();
        let product = persisted("P-1");
        let a = add(&f, &product, "a.png", false).await;
        let thumb = a.thumbnail_key.clone().unwrap();
        assert!(f.remote.contains(&thumb));

        f.registry.remove_image(a.id).await.unwrap();
        assert!(!f.remote.contains(&thumb));
    }

    #[tokio::test]
    async fn remove_tolerates_blob_already_gone() {
        let f = fixture();
        let product = persisted("P-1");
        let a = add(&f, &product, "a.png", false).await;
        f.remote
            .delete(&StorageKey::new(&a.storage_key).unwrap())
            .await
            .unwrap();
        assert_eq!(f.registry.remove_image(a.id).await, Ok(Removal::Removed));
        assert!(f.registry.list_images(&product).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_primary_promotes_earliest() {
        let f = fixture();
        let product = persisted("P-1");
        let a = add(&f, &product, "a.png", false).await;
        let b = add(&f, &product, "b.png", false).await;
        let c = add(&f, &product, "c.png", true).await;

        f.registry.remove_image(c.id).await.unwrap();
        let primary = f.registry.primary_image(&product).await.unwrap().unwrap();
        assert_eq!(primary.id, a.id);
        f.registry.remove_image(a.id).await.unwrap();
        let primary = f.registry.primary_image(&product).await.unwrap().unwrap();
        assert_eq!(primary.id, b.id);
    }

    // =========================================================================
    // backend isolation
    // =========================================================================

    #[tokio::test]
    async fn drafts_only_touch_local_and_persisted_only_touch_remote() {
        let f = fixture();
        let draft = ProductId::draft(DraftId::generate());
        let product = persisted("P-1");

        let d = add(&f, &draft, "d.png", false).await;
        f.registry.list_images(&draft).await.unwrap();
        f.registry.remove_image(d.id).await.unwrap();
        assert!(f.remote.calls().is_empty());

        let local_calls = f.local.calls().len();
        let p = add(&f, &product, "p.png", false).await;
        f.registry.list_images(&product).await.unwrap();
        f.registry.remove_image(p.id).await.unwrap();
        assert_eq!(f.local.calls().len(), local_calls);
        assert!(!f.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn drafts_never_write_an_index() {
        let f = fixture();
        let draft = ProductId::draft(DraftId::generate());
        add(&f, &draft, "d.png", false).await;
        assert!(
            !f.local
                .calls()
                .iter()
                .any(|call| call.key().ends_with("index.json"))
        );
    }

    // =========================================================================
    // rekey
    // =========================================================================

    #[tokio::test]
    async fn rekey_moves_every_image_and_keeps_primary() {
        let f = fixture();
        let draft = DraftId::generate();
        let draft_product = ProductId::draft(draft);
        let a = add(&f, &draft_product, "a.png", false).await;
        let b = add(&f, &draft_product, "b.png", true).await;

        let target = PersistedId::new("P-9").unwrap();
        let report = f.registry.rekey(&draft, &target).await.unwrap();
        assert_eq!(report.moved_count(), 2);
        assert!(report.is_complete());

        assert!(f.registry.list_images(&draft_product).await.unwrap().is_empty());
        let images = f
            .registry
            .list_images(&ProductId::Persisted(target))
            .await
            .unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].id, b.id);
        assert!(images[0].is_primary);
        assert_eq!(images[1].id, a.id);
        assert!(images.iter().all(|img| img.storage_key.starts_with("products/P-9/")));
        assert!(images.iter().all(|img| img.local_path.is_none()));
        assert_eq!(f.local.object_count(), 0);
    }

    #[tokio::test]
    async fn rekey_partial_failure_leaves_failed_image_on_draft() {
        let f = fixture();
        let draft = DraftId::generate();
        let draft_product = ProductId::draft(draft);
        let mut ids = Vec::new();
        for name in ["a.png", "b.png", "c.png"] {
            ids.push(add(&f, &draft_product, name, false).await.id);
        }
        f.remote.fail_puts_containing(ids[1].to_string());

        let target = PersistedId::new("P-9").unwrap();
        let report = f.registry.rekey(&draft, &target).await.unwrap();
        assert_eq!(report.moved_count(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].image_id, ids[1]);

        let left: Vec<ImageId> = f
            .registry
            .list_images(&draft_product)
            .await
            .unwrap()
            .iter()
            .map(|img| img.id)
            .collect();
        assert_eq!(left, vec![ids[1]]);

        // Retrying moves the straggler.
        f.remote.clear_failures();
        let retry = f.registry.rekey(&draft, &target).await.unwrap();
        assert_eq!(retry.moved_count(), 1);
        let persisted_images = f
            .registry
            .list_images(&ProductId::Persisted(target))
            .await
            .unwrap();
        assert_eq!(persisted_images.len(), 3);
        assert_eq!(primaries(&persisted_images), 1);
        assert_eq!(persisted_images[0].id, ids[0]);
    }

    #[tokio::test]
    async fn rekey_does_not_steal_existing_primary() {
        let f = fixture();
        let target = PersistedId::new("P-9").unwrap();
        let target_product = ProductId::Persisted(target.clone());
        let existing = add(&f, &target_product, "existing.png", false).await;

        let draft = DraftId::generate();
        add(&f, &ProductId::draft(draft), "new.png", false).await;
        f.registry.rekey(&draft, &target).await.unwrap();

        let primary = f
            .registry
            .primary_image(&target_product)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(primary.id, existing.id);
    }

    #[tokio::test]
    async fn rekey_index_failure_rolls_back_copies() {
        let f = fixture();
        let draft = DraftId::generate();
        let draft_product = ProductId::draft(draft);
        add(&f, &draft_product, "a.png", false).await;
        f.remote.fail_puts_containing("index.json");

        let target = PersistedId::new("P-9").unwrap();
        let report = f.registry.rekey(&draft, &target).await.unwrap();
        assert_eq!(report.moved_count(), 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(f.remote.object_count(), 0);
        assert_eq!(f.registry.list_images(&draft_product).await.unwrap().len(), 1);
    }

    // =========================================================================
    // discard / load / refresh
    // =========================================================================

    #[tokio::test]
    async fn discard_draft_deletes_local_blobs() {
        let f = fixture();
        let draft = DraftId::generate();
        let product = ProductId::draft(draft);
        let a = add(&f, &product, "a.png", false).await;
        add(&f, &product, "b.png", false).await;

        assert_eq!(f.registry.discard_draft(&draft).await.unwrap(), 2);
        assert_eq!(f.local.object_count(), 0);
        assert_eq!(f.registry.remove_image(a.id).await, Ok(Removal::NotFound));
        assert!(
            f.local
                .calls()
                .iter()
                .any(|call| matches!(call, BackendCall::Delete(_)))
        );
    }

    #[tokio::test]
    async fn discarded_draft_slot_rejects_late_writers() {
        let f = fixture();
        let draft = DraftId::generate();
        let product = ProductId::draft(draft);
        add(&f, &product, "a.png", false).await;
        // Fetched before the discard, like a writer queued on the lock.
        let stale = f.registry.slot(&product);

        assert_eq!(f.registry.discard_draft(&draft).await.unwrap(), 1);
        assert!(!lock(&f.registry.slots).contains_key(&product));

        let mut guard = stale.lock().await;
        assert_eq!(
            f.registry.hydrate(&product, &mut guard).await.err(),
            Some(RegistryError::Discarded {
                product: product.clone()
            })
        );
        drop(guard);

        // The same draft id starts over with an empty set.
        add(&f, &product, "b.png", false).await;
        assert_eq!(f.registry.image_count(&product).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn load_rejects_corrupt_index() {
        let f = fixture();
        f.remote
            .put(
                &StorageKey::new("products/P-2/index.json").unwrap(),
                b"{".to_vec(),
                &BlobMetadata::new("application/json", "index.json"),
            )
            .await
            .unwrap();
        let err = f.registry.load(&persisted("P-2")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Index { .. }));
    }

    #[tokio::test]
    async fn load_rejects_drafts() {
        let f = fixture();
        let draft = ProductId::draft(DraftId::generate());
        assert!(matches!(
            f.registry.load(&draft).await,
            Err(RegistryError::WrongRegime { .. })
        ));
    }

    #[tokio::test]
    async fn load_replaces_cached_set() {
        let f = fixture();
        let product = persisted("P-3");
        add(&f, &product, "a.png", false).await;

        // Another registry adds an image behind this one's back.
        let other = Registry::new(BackendSelector::new(f.local.clone(), f.remote.clone()));
        let backend: Arc<dyn StorageBackend> = f.remote.clone();
        let image = stored_image(backend.as_ref(), &product, "b.png").await;
        other.add_image(&product, image, false).await.unwrap();

        assert_eq!(f.registry.list_images(&product).await.unwrap().len(), 1);
        assert_eq!(f.registry.load(&product).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn refresh_urls_surfaces_missing_blobs() {
        let f = fixture();
        let product = persisted("P-1");
        let a = add(&f, &product, "a.png", false).await;
        assert_eq!(f.registry.refresh_urls(&product).await.unwrap()[0].url, a.url);

        f.remote
            .delete(&StorageKey::new(&a.storage_key).unwrap())
            .await
            .unwrap();
        let err = f.registry.refresh_urls(&product).await.unwrap_err();
        assert!(matches!(err, RegistryError::Storage(StorageError::NotFound(_))));
    }

    #[test]
    fn display_url_prefers_local_path() {
        let mut image = new_image("a.png")
            .into_entry()
            .to_product_image(&persisted("P-1"), true);
        assert_eq!(resolve_display_url(&image), image.url);

        image.local_path = Some("/tmp/store/drafts/x/a.avif".into());
        assert_eq!(
            resolve_display_url(&image),
            "file:///tmp/store/drafts/x/a.avif"
        );
    }

    // =========================================================================
    // concurrency
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_keep_one_primary() {
        let f = Arc::new(fixture());
        let product = persisted("P-1");
        let mut handles = Vec::new();
        for i in 0..8 {
            let f = f.clone();
            let product = product.clone();
            handles.push(tokio::spawn(async move {
                add(&f, &product, &format!("{i}.png"), i % 2 == 0).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let images = f.registry.list_images(&product).await.unwrap();
        assert_eq!(images.len(), 8);
        assert_eq!(primaries(&images), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn remove_during_rekey_follows_the_image_to_its_new_product() {
        let f = Arc::new(fixture());
        let draft = DraftId::generate();
        let image = add(&f, &ProductId::draft(draft), "a.png", false).await;
        f.remote.delay_puts(Duration::from_millis(100));

        let target = PersistedId::new("P-5").unwrap();
        let rekey = {
            let f = f.clone();
            let target = target.clone();
            tokio::spawn(async move { f.registry.rekey(&draft, &target).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(f.registry.remove_image(image.id).await, Ok(Removal::Removed));
        assert!(rekey.await.unwrap().unwrap().is_complete());

        let persisted = ProductId::Persisted(target);
        assert!(f.registry.list_images(&persisted).await.unwrap().is_empty());
        let id = image.id.to_string();
        assert!(f.remote.keys().iter().all(|key| !key.contains(&id)));
        assert_eq!(f.registry.remove_image(image.id).await, Ok(Removal::NotFound));
    }
}
