//! The single "who is this?" slot shown to the operator.
//!
//! At most one registration is ever pending. The producer offers
//! candidates with [`PendingRegistry::enqueue`]; the operator side
//! expires, registers, or cancels. The lock is held only to copy in or
//! out, never across store I/O. While a registration is being written the
//! entry is claimed: it stays visible, but a second register, a cancel,
//! or an expiry leaves it alone.

use crate::registry::IdentityRegistry;
use crate::store::{IdentityStore, NewIdentity, StoreError};
use crate::types::{Crop, Embedding, KnownIdentity, STRANGER_RELATION};
use image::RgbImage;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default lifetime of an unanswered pending registration.
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum PendingError {
    #[error("invalid registration: {0}")]
    Validation(String),
    #[error("no pending registration with id {0}")]
    NotFound(u64),
    #[error("pending registration {0} is already being registered")]
    InProgress(u64),
    #[error("failed to store identity: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct PendingRegistration {
    pub id: u64,
    pub image: RgbImage,
    /// Embedding observed with `image`; becomes the registered embedding.
    pub embedding: Embedding,
    pub created_at: Instant,
}

impl PendingRegistration {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

#[derive(Default)]
struct Slot {
    next_id: u64,
    entry: Option<PendingRegistration>,
    /// Set while `register` writes the entry to the store.
    claimed: bool,
}

impl Slot {
    fn release(&mut self) {
        self.claimed = false;
    }
}

#[derive(Default)]
pub struct PendingRegistry {
    slot: Mutex<Slot>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate. Returns the new id, or `None` (candidate dropped)
    /// when a registration is already pending.
    pub fn enqueue(&self, crop: Crop, now: Instant) -> Option<u64> {
        let mut slot = self.slot.lock();
        if slot.entry.is_some() {
            return None;
        }
        let id = slot.next_id;
        slot.next_id += 1;
        slot.entry = Some(PendingRegistration {
            id,
            image: crop.image,
            embedding: crop.embedding,
            created_at: now,
        });
        Some(id)
    }

    /// A copy of the pending registration, if any.
    pub fn current(&self) -> Option<PendingRegistration> {
        self.slot.lock().entry.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().entry.is_none()
    }

    /// Remove the pending registration if it is older than `timeout`.
    pub fn expire(&self, now: Instant, timeout: Duration) -> Option<PendingRegistration> {
        let mut slot = self.slot.lock();
        let expired = !slot.claimed
            && slot
                .entry
                .as_ref()
                .is_some_and(|entry| entry.age(now) > timeout);
        if expired {
            slot.entry.take()
        } else {
            None
        }
    }

    /// Drop the pending registration unless it is being registered.
    pub fn cancel(&self) -> Option<PendingRegistration> {
        let mut slot = self.slot.lock();
        if slot.claimed {
            return None;
        }
        slot.entry.take()
    }

    /// Name pending registration `id`.
    ///
    /// Claims the entry, appends the identity to `store`, reloads
    /// `registry` from it, then clears the slot. A blank name or a store
    /// failure leaves the entry in place for another attempt. A failed
    /// reload is logged only; the identity is already stored and the next
    /// reload will pick it up.
    pub fn register(
        &self,
        id: u64,
        name: &str,
        relation: &str,
        store: &dyn IdentityStore,
        registry: &IdentityRegistry,
    ) -> Result<KnownIdentity, PendingError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PendingError::Validation("name must not be empty".into()));
        }
        let relation = match relation.trim() {
            "" => STRANGER_RELATION,
            r => r,
        };

        let entry = {
            let mut slot = self.slot.lock();
            let entry = slot
                .entry
                .as_ref()
                .filter(|entry| entry.id == id)
                .cloned()
                .ok_or(PendingError::NotFound(id))?;
            if slot.claimed {
                return Err(PendingError::InProgress(id));
            }
            slot.claimed = true;
            entry
        };

        let appended = store.append(NewIdentity {
            name: name.to_string(),
            relation: relation.to_string(),
            embedding: entry.embedding,
            image: Some(entry.image),
        });
        let identity = match appended {
            Ok(identity) => identity,
            Err(e) => {
                self.slot.lock().release();
                return Err(e.into());
            }
        };

        if let Err(e) = registry.reload(store) {
            tracing::warn!(error = %e, "registry reload after registration failed");
        }

        let mut slot = self.slot.lock();
        slot.entry = None;
        slot.release();
        drop(slot);

        tracing::info!(pending = id, name, relation, "pending registration named");
        Ok(identity)
    }
}
