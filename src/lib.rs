//! # Product Images
//!
//! Image lifecycle for the product catalogue of a shop-management
//! application. Uploaded photos are compressed, stored on the right backend,
//! recorded in a per-product index, and exactly one of them is the product's
//! primary image.
//!
//! # Architecture: Two Regimes, One Pipeline
//!
//! A product is either a **draft** (created client-side, not yet committed)
//! or **persisted** (committed, with a durable id). Every upload runs the same
//! pipeline; only the backend differs:
//!
//! ```text
//! UploadFile ─→ admit ─→ compress (+thumbnail) ─→ put blob ─→ registry.add_image
//!                                                   │
//!                         draft ──→ LocalBackend (disk, quota-bound)
//!                     persisted ──→ RemoteBackend (object store, JSON index)
//! ```
//!
//! When a draft is committed, [`registry::Registry::rekey`] moves its images
//! onto the persisted product. An abandoned draft is dropped with
//! [`registry::Registry::discard_draft`].
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Compression engine: decode, fit, re-encode, thumbnails, format negotiation |
//! | [`storage`] | `StorageBackend` trait with local, remote, and in-memory implementations |
//! | [`registry`] | Per-product image sets, the primary-image rule, durable index, rekey |
//! | [`upload`] | Batch coordinator: admission, sequential processing, progress events |
//! | [`config`] | `product-images.toml` loading, validation, and merging over stock defaults |
//! | [`types`] | Identifiers and the public `ProductImage` record |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Routing by Variant
//!
//! Which backend a product uses is decided by the [`types::ProductId`] variant,
//! never by looking at the identifier text. The caller knows whether a product
//! is committed; the library never guesses.
//!
//! ## Primary Image as a Pointer
//!
//! A product's image set stores the primary image's id once, and
//! `is_primary` is derived when records are read. Two images can never both
//! claim to be primary, and removing the primary promotes the earliest
//! remaining image in the same step.
//!
//! ## Blob First, Record Second
//!
//! An image is registered only after its blob is stored, and removed from
//! the index only after its blobs are deleted. A failure in between leaves
//! at worst an unreferenced blob, never a record pointing at nothing.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding and encoding use the `image` crate, so the binary has no system
//! image libraries to install. CPU-bound work runs on tokio's blocking pool
//! and never stalls the async runtime.

pub mod config;
pub mod imaging;
pub mod output;
pub mod registry;
pub mod storage;
pub mod types;
pub mod upload;

pub use registry::{Registry, RegistryError};
pub use storage::{StorageBackend, StorageError};
pub use types::{DraftId, ImageId, PersistedId, ProductId, ProductImage};
pub use upload::{BatchResult, UploadCoordinator, UploadEvent, UploadOptions};

#[cfg(test)]
pub(crate) mod test_helpers;
