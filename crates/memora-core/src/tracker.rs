//! Frame-to-frame tracking of unidentified faces.
//!
//! Correlation is greedy nearest-center: each detection takes the first
//! track from the previous cycle whose last center lies within
//! `correlation_distance`. There is no global assignment. Several
//! detections in one cycle may continue the same track; each one moves it,
//! counts as a sighting and buffers its crop. Tracks created this cycle are
//! not candidates until the next one. A track that is not seen in a cycle
//! is dropped, taking any accumulated progress (and a half-filled capture
//! buffer) with it.

use crate::types::{BoundingBox, Crop};
use std::time::{Duration, Instant};

/// Capture state of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// Seen once, or cooling down after a capture.
    #[default]
    Idle,
    /// Seen in consecutive cycles, not yet at the trigger threshold.
    Accumulating,
    /// Buffering crops until the save window elapses.
    Saving,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Maximum center distance (display pixels) for a detection to continue a track.
    pub correlation_distance: f32,
    /// Consecutive sightings that start a capture.
    pub trigger_threshold: i32,
    /// How long a capture buffers crops.
    pub save_duration: Duration,
    /// Count written back after a capture completes, suppressing retriggers.
    pub cooldown_count: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            correlation_distance: 100.0,
            trigger_threshold: 8,
            save_duration: Duration::from_secs(5),
            cooldown_count: -150,
        }
    }
}

/// A persistent identifier for one unidentified face.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub last_position: BoundingBox,
    /// Consecutive sightings; negative while cooling down.
    pub consecutive_count: i32,
    pub state: TrackState,
    /// Crops gathered during `Saving`, oldest first.
    pub buffer: Vec<Crop>,
    pub saving_started_at: Option<Instant>,
}

/// An unmatched detection handed to the tracker for one cycle.
#[derive(Debug, Clone)]
pub struct UnmatchedFace {
    pub bbox: BoundingBox,
    /// Face crop for this cycle; `None` if the box fell outside the frame.
    pub crop: Option<Crop>,
}

/// The buffer of a track whose save window has elapsed.
#[derive(Debug, Clone)]
pub struct CompletedCapture {
    pub track_id: u64,
    pub crops: Vec<Crop>,
}

/// A track seen this cycle, by where it lives until the set is rebuilt.
enum Sighted {
    Previous(usize),
    New(Track),
}

pub struct TrackManager {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl TrackManager {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Tracks alive after the last update, in creation-or-correlation order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Run one cycle. The surviving track set is rebuilt from `faces` alone,
    /// in order of first sighting.
    ///
    /// Returns every capture whose save window closed this cycle.
    pub fn update(&mut self, faces: Vec<UnmatchedFace>, now: Instant) -> Vec<CompletedCapture> {
        let mut previous: Vec<Option<Track>> =
            std::mem::take(&mut self.tracks).into_iter().map(Some).collect();
        let mut seen = vec![false; previous.len()];
        let mut order = Vec::with_capacity(faces.len());
        let mut completed = Vec::new();

        for face in faces {
            let claimed = previous.iter().position(|slot| {
                slot.as_ref().is_some_and(|track| {
                    track.last_position.center_distance(&face.bbox)
                        < self.config.correlation_distance
                })
            });

            match claimed {
                Some(idx) => {
                    let Some(track) = previous[idx].as_mut() else {
                        continue;
                    };
                    track.last_position = face.bbox;
                    track.consecutive_count += 1;
                    if let Some(capture) = self.advance(track, face.crop, true, now) {
                        completed.push(capture);
                    }
                    if !seen[idx] {
                        seen[idx] = true;
                        order.push(Sighted::Previous(idx));
                    }
                }
                None => {
                    let mut track = Track {
                        id: self.next_id,
                        last_position: face.bbox,
                        consecutive_count: 1,
                        state: TrackState::Idle,
                        buffer: Vec::new(),
                        saving_started_at: None,
                    };
                    self.next_id += 1;
                    tracing::debug!(track = track.id, "new track");
                    if let Some(capture) = self.advance(&mut track, face.crop, false, now) {
                        completed.push(capture);
                    }
                    order.push(Sighted::New(track));
                }
            }
        }

        let next: Vec<Track> = order
            .into_iter()
            .filter_map(|sighted| match sighted {
                Sighted::Previous(idx) => previous[idx].take(),
                Sighted::New(track) => Some(track),
            })
            .collect();

        for lost in previous.into_iter().flatten() {
            tracing::debug!(
                track = lost.id,
                count = lost.consecutive_count,
                state = ?lost.state,
                buffered = lost.buffer.len(),
                "track lost"
            );
        }

        self.tracks = next;
        completed
    }

    /// Apply the capture state machine to one sighted track.
    fn advance(
        &self,
        track: &mut Track,
        crop: Option<Crop>,
        correlated: bool,
        now: Instant,
    ) -> Option<CompletedCapture> {
        if track.state != TrackState::Saving {
            if track.consecutive_count >= self.config.trigger_threshold {
                track.state = TrackState::Saving;
                track.saving_started_at = Some(now);
                track.buffer.clear();
                tracing::info!(track = track.id, "capture started");
            } else if correlated && track.consecutive_count > 0 {
                track.state = TrackState::Accumulating;
            }
        }

        if track.state != TrackState::Saving {
            return None;
        }

        let started = track.saving_started_at.unwrap_or(now);
        if now.saturating_duration_since(started) < self.config.save_duration {
            if let Some(crop) = crop {
                track.buffer.push(crop);
            }
            return None;
        }

        let crops = std::mem::take(&mut track.buffer);
        track.consecutive_count = self.config.cooldown_count;
        track.state = TrackState::Idle;
        track.saving_started_at = None;
        tracing::info!(track = track.id, crops = crops.len(), "capture completed");

        Some(CompletedCapture {
            track_id: track.id,
            crops,
        })
    }
}

impl Default for TrackManager {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;
    use image::RgbImage;

    fn face_at(x: f32, y: f32) -> UnmatchedFace {
        UnmatchedFace {
            bbox: BoundingBox::new(x, y, 40.0, 40.0),
            crop: Some(Crop {
                image: RgbImage::new(4, 4),
                embedding: Embedding::new(vec![0.0; 4]),
            }),
        }
    }

    fn secs(base: Instant, s: f32) -> Instant {
        base + Duration::from_secs_f32(s)
    }

    #[test]
    fn test_new_detection_creates_idle_track() {
        let mut tracker = TrackManager::default();
        let done = tracker.update(vec![face_at(0.0, 0.0)], Instant::now());

        assert!(done.is_empty());
        assert_eq!(tracker.tracks().len(), 1);
        let track = &tracker.tracks()[0];
        assert_eq!(track.id, 0);
        assert_eq!(track.consecutive_count, 1);
        assert_eq!(track.state, TrackState::Idle);
    }

    #[test]
    fn test_nearby_detection_continues_track() {
        let mut tracker = TrackManager::default();
        let t0 = Instant::now();
        tracker.update(vec![face_at(0.0, 0.0)], t0);
        tracker.update(vec![face_at(30.0, 20.0)], secs(t0, 0.03));

        let track = &tracker.tracks()[0];
        assert_eq!(track.id, 0);
        assert_eq!(track.consecutive_count, 2);
        assert_eq!(track.state, TrackState::Accumulating);
        assert_eq!(track.last_position.x, 30.0);
    }

    #[test]
    fn test_distant_detection_starts_new_track() {
        let mut tracker = TrackManager::default();
        let t0 = Instant::now();
        tracker.update(vec![face_at(0.0, 0.0)], t0);
        tracker.update(vec![face_at(150.0, 0.0)], secs(t0, 0.03));

        assert_eq!(tracker.tracks().len(), 1);
        assert_eq!(tracker.tracks()[0].id, 1);
        assert_eq!(tracker.tracks()[0].consecutive_count, 1);
    }

    #[test]
    fn test_missed_cycle_drops_track() {
        let mut tracker = TrackManager::default();
        let t0 = Instant::now();
        for i in 0..5 {
            tracker.update(vec![face_at(0.0, 0.0)], secs(t0, i as f32));
        }
        tracker.update(vec![], secs(t0, 5.0));
        assert!(tracker.tracks().is_empty());

        tracker.update(vec![face_at(0.0, 0.0)], secs(t0, 6.0));
        assert_eq!(tracker.tracks()[0].id, 1);
        assert_eq!(tracker.tracks()[0].consecutive_count, 1);
    }

    #[test]
    fn test_trigger_threshold_enters_saving() {
        let mut tracker = TrackManager::default();
        let t0 = Instant::now();
        for i in 0..7 {
            tracker.update(vec![face_at(0.0, 0.0)], secs(t0, i as f32 * 0.1));
            assert_ne!(tracker.tracks()[0].state, TrackState::Saving);
        }
        tracker.update(vec![face_at(0.0, 0.0)], secs(t0, 0.7));

        let track = &tracker.tracks()[0];
        assert_eq!(track.consecutive_count, 8);
        assert_eq!(track.state, TrackState::Saving);
        assert_eq!(track.saving_started_at, Some(secs(t0, 0.7)));
        assert_eq!(track.buffer.len(), 1);
    }

    #[test]
    fn test_buffer_grows_then_flushes_once() {
        let mut tracker = TrackManager::default();
        let t0 = Instant::now();
        for i in 0..8 {
            tracker.update(vec![face_at(0.0, 0.0)], secs(t0, i as f32 * 0.1));
        }
        // Saving began at 0.7s; window closes at 5.7s.
        let mut last_len = tracker.tracks()[0].buffer.len();
        for i in 1..=4 {
            let done = tracker.update(vec![face_at(0.0, 0.0)], secs(t0, 0.7 + i as f32));
            assert!(done.is_empty());
            let len = tracker.tracks()[0].buffer.len();
            assert_eq!(len, last_len + 1);
            last_len = len;
        }

        let done = tracker.update(vec![face_at(0.0, 0.0)], secs(t0, 5.8));
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].track_id, 0);
        assert_eq!(done[0].crops.len(), 5);

        let track = &tracker.tracks()[0];
        assert_eq!(track.state, TrackState::Idle);
        assert_eq!(track.consecutive_count, -150);
        assert!(track.buffer.is_empty());
        assert!(track.saving_started_at.is_none());

        let done = tracker.update(vec![face_at(0.0, 0.0)], secs(t0, 5.9));
        assert!(done.is_empty());
        assert_eq!(tracker.tracks()[0].consecutive_count, -149);
        assert_eq!(tracker.tracks()[0].state, TrackState::Idle);
    }

    #[test]
    fn test_missing_crops_are_not_buffered() {
        let config = TrackerConfig { trigger_threshold: 1, ..TrackerConfig::default() };
        let mut tracker = TrackManager::new(config);
        let t0 = Instant::now();
        let mut face = face_at(0.0, 0.0);
        face.crop = None;

        tracker.update(vec![face.clone()], t0);
        tracker.update(vec![face], secs(t0, 1.0));
        assert_eq!(tracker.tracks()[0].state, TrackState::Saving);
        assert!(tracker.tracks()[0].buffer.is_empty());

        let done = tracker.update(vec![face_at(0.0, 0.0)], secs(t0, 6.0));
        assert_eq!(done.len(), 1);
        assert!(done[0].crops.is_empty());
    }

    #[test]
    fn test_two_faces_tracked_independently() {
        let mut tracker = TrackManager::default();
        let t0 = Instant::now();
        tracker.update(vec![face_at(0.0, 0.0)], t0);
        for i in 1..8 {
            tracker.update(
                vec![face_at(0.0, 0.0), face_at(300.0, 0.0)],
                secs(t0, i as f32 * 0.1),
            );
        }

        let tracks = tracker.tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].id, 0);
        assert_eq!(tracks[0].state, TrackState::Saving);
        assert_eq!(tracks[1].id, 1);
        assert_eq!(tracks[1].consecutive_count, 7);
        assert_eq!(tracks[1].state, TrackState::Accumulating);
    }

    #[test]
    fn test_two_nearby_detections_continue_one_track() {
        let mut tracker = TrackManager::default();
        let t0 = Instant::now();
        tracker.update(vec![face_at(0.0, 0.0)], t0);
        tracker.update(vec![face_at(10.0, 0.0), face_at(20.0, 0.0)], secs(t0, 0.1));

        let tracks = tracker.tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, 0);
        assert_eq!(tracks[0].consecutive_count, 3);
        assert_eq!(tracks[0].last_position.x, 20.0);
    }

    #[test]
    fn test_new_tracks_are_not_candidates_in_their_own_cycle() {
        let mut tracker = TrackManager::default();
        let t0 = Instant::now();
        tracker.update(vec![face_at(0.0, 0.0), face_at(10.0, 0.0)], t0);

        let tracks = tracker.tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!((tracks[0].id, tracks[1].id), (0, 1));
        assert!(tracks.iter().all(|t| t.consecutive_count == 1));
    }

    #[test]
    fn test_order_follows_first_sighting() {
        let mut tracker = TrackManager::default();
        let t0 = Instant::now();
        tracker.update(vec![face_at(0.0, 0.0), face_at(300.0, 0.0)], t0);
        tracker.update(
            vec![face_at(300.0, 0.0), face_at(600.0, 0.0), face_at(0.0, 0.0)],
            secs(t0, 0.1),
        );

        let ids: Vec<u64> = tracker.tracks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
    }

    #[test]
    fn test_identical_input_is_deterministic() {
        let run = || {
            let mut tracker = TrackManager::default();
            let t0 = Instant::now();
            let mut log = Vec::new();
            for i in 0..40 {
                let mut faces = vec![face_at(i as f32 * 5.0, 0.0)];
                if i % 7 != 3 {
                    faces.push(face_at(400.0, 200.0));
                }
                let done = tracker.update(faces, secs(t0, i as f32 * 0.5));
                for t in tracker.tracks() {
                    log.push((i, t.id, t.consecutive_count, t.state));
                }
                for c in done {
                    log.push((i, c.track_id, c.crops.len() as i32, TrackState::Idle));
                }
            }
            log
        };
        assert_eq!(run(), run());
    }
}
