//! Deterministic backend selection by identity regime.

use super::StorageBackend;
use crate::types::ProductId;
use std::sync::Arc;

/// Drafts always go to the local backend, persisted products always go to the
/// remote backend. Nothing else influences the choice.
#[derive(Clone)]
pub struct BackendSelector {
    local: Arc<dyn StorageBackend>,
    remote: Arc<dyn StorageBackend>,
}

impl BackendSelector {
    pub fn new(local: Arc<dyn StorageBackend>, remote: Arc<dyn StorageBackend>) -> Self {
        Self { local, remote }
    }

    pub fn for_product(&self, product: &ProductId) -> &Arc<dyn StorageBackend> {
        match product {
            ProductId::Draft(_) => &self.local,
            ProductId::Persisted(_) => &self.remote,
        }
    }
}
