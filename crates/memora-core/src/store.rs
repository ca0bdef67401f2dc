//! Persistence seam for registered identities.
//!
//! The core only ever reads the whole store or appends one record.

use crate::types::{Embedding, KnownIdentity};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store contents are corrupt: {0}")]
    Corrupt(String),
    #[error("store backend failed: {0}")]
    Backend(String),
}

/// A registration on its way into the store.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub name: String,
    pub relation: String,
    pub embedding: Embedding,
    /// Representative image; the store decides whether and where to keep it.
    pub image: Option<RgbImage>,
}

/// Read-all / append-one persistence for known identities.
pub trait IdentityStore: Send + Sync {
    /// Load every stored identity, in store order.
    fn load_all(&self) -> Result<Vec<KnownIdentity>, StoreError>;

    /// Persist one new identity and return it as it will be loaded back.
    fn append(&self, identity: NewIdentity) -> Result<KnownIdentity, StoreError>;
}
