//! Latest-state hand-off from the producer cycle to the operator side.
//!
//! Last writer wins; nothing is queued. Readers get a deep copy and
//! render without holding the lock.

use image::RgbImage;
use parking_lot::Mutex;
use std::time::Instant;

/// Maximum number of detection summaries kept per snapshot.
pub const MAX_DETECTIONS: usize = 8;

/// What the operator is shown about one face in the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSummary {
    pub name: String,
    pub relation: String,
    pub notes_excerpt: String,
    pub thumbnail: Option<RgbImage>,
    /// `false` for faces that matched nobody.
    pub identified: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Annotated frame at display resolution.
    pub frame: Option<RgbImage>,
    pub detections: Vec<DetectionSummary>,
    /// Tracks alive after the cycle that produced this snapshot.
    pub active_tracks: usize,
    /// Number of publishes so far.
    pub sequence: u64,
    pub published_at: Option<Instant>,
}

#[derive(Default)]
pub struct SnapshotPublisher {
    latest: Mutex<Snapshot>,
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published state. Detections past [`MAX_DETECTIONS`] are dropped.
    pub fn publish(
        &self,
        frame: RgbImage,
        mut detections: Vec<DetectionSummary>,
        active_tracks: usize,
        now: Instant,
    ) {
        detections.truncate(MAX_DETECTIONS);
        let mut latest = self.latest.lock();
        latest.frame = Some(frame);
        latest.detections = detections;
        latest.active_tracks = active_tracks;
        latest.sequence += 1;
        latest.published_at = Some(now);
    }

    /// A deep copy of the latest state.
    pub fn read(&self) -> Snapshot {
        self.latest.lock().clone()
    }
}

/// First `max_chars` characters of `notes`, with an ellipsis when cut.
pub fn notes_excerpt(notes: &str, max_chars: usize) -> String {
    let notes = notes.trim();
    if notes.chars().count() <= max_chars {
        return notes.to_string();
    }
    let mut excerpt: String = notes.chars().take(max_chars).collect();
    excerpt.push('…');
    excerpt
}
