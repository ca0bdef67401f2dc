//! In-memory registry of known identities.
//!
//! Readers take an `Arc` snapshot and never observe a partial update: a
//! reload builds the new list off-lock and swaps it in whole.

use crate::store::{IdentityStore, StoreError};
use crate::types::KnownIdentity;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry reload failed, keeping previous snapshot: {0}")]
    ReloadFailed(#[from] StoreError),
}

pub struct IdentityRegistry {
    current: RwLock<Arc<[KnownIdentity]>>,
}

impl IdentityRegistry {
    pub fn new(identities: Vec<KnownIdentity>) -> Self {
        Self {
            current: RwLock::new(identities.into()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// The current snapshot. Cheap; holds the lock only for an `Arc` clone.
    pub fn snapshot(&self) -> Arc<[KnownIdentity]> {
        self.current.read().clone()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap in a new snapshot.
    pub fn replace(&self, identities: Vec<KnownIdentity>) {
        let next: Arc<[KnownIdentity]> = identities.into();
        *self.current.write() = next;
    }

    /// Reload from `store`. On failure the previous snapshot stays visible.
    pub fn reload(&self, store: &dyn IdentityStore) -> Result<usize, RegistryError> {
        let identities = store.load_all()?;
        let count = identities.len();
        self.replace(identities);
        tracing::info!(identities = count, "identity registry reloaded");
        Ok(count)
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::empty()
    }
}
