//! Picks the representative crop of a completed capture and hands it to
//! the pending registry.

use crate::pending::PendingRegistry;
use crate::tracker::CompletedCapture;
use crate::types::Crop;
use std::time::Instant;

/// What happened to a completed capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A pending registration was created with this id.
    Enqueued(u64),
    /// A registration is already pending; the candidate was dropped.
    SlotOccupied,
    /// The buffer held no crops.
    Discarded,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureSequencer;

impl CaptureSequencer {
    /// The temporally-middle crop; the lower of the two middles on even counts.
    pub fn select(crops: &[Crop]) -> Option<&Crop> {
        if crops.is_empty() {
            return None;
        }
        crops.get((crops.len() - 1) / 2)
    }

    /// Select a representative crop and offer it to `pending`.
    pub fn forward(
        &self,
        capture: CompletedCapture,
        pending: &PendingRegistry,
        now: Instant,
    ) -> CaptureOutcome {
        let Some(crop) = Self::select(&capture.crops) else {
            tracing::debug!(track = capture.track_id, "capture buffer empty; discarded");
            return CaptureOutcome::Discarded;
        };

        match pending.enqueue(crop.clone(), now) {
            Some(id) => {
                tracing::info!(
                    track = capture.track_id,
                    pending = id,
                    crops = capture.crops.len(),
                    "pending registration created"
                );
                CaptureOutcome::Enqueued(id)
            }
            None => {
                tracing::debug!(track = capture.track_id, "registration already pending; capture dropped");
                CaptureOutcome::SlotOccupied
            }
        }
    }
}
