use crate::pending::PendingRegistry;
use crate::registry::IdentityRegistry;
use crate::snapshot::SnapshotPublisher;
use crate::types::KnownIdentity;

/// Everything the producer cycle and the operator side both touch.
#[derive(Default)]
pub struct SharedState {
    pub registry: IdentityRegistry,
    pub pending: PendingRegistry,
    pub snapshot: SnapshotPublisher,
}

impl SharedState {
    pub fn new(identities: Vec<KnownIdentity>) -> Self {
        Self {
            registry: IdentityRegistry::new(identities),
            pending: PendingRegistry::new(),
            snapshot: SnapshotPublisher::new(),
        }
    }
}
