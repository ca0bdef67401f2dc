//! One producer cycle: downsample, extract, match, track, capture, publish.

use crate::annotate::{Annotator, IDENTIFIED_COLOR, UNIDENTIFIED_COLOR};
use crate::capture::{CaptureOutcome, CaptureSequencer};
use crate::embedding::EmbeddingService;
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::snapshot::{notes_excerpt, DetectionSummary};
use crate::state::SharedState;
use crate::tracker::{TrackManager, TrackerConfig, UnmatchedFace};
use crate::types::{crop_region, Crop, STRANGER_RELATION, UNKNOWN_NAME};
use image::imageops::FilterType;
use image::RgbImage;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Resolution of the annotated frame; tracking distances are measured here.
    pub display_width: u32,
    pub display_height: u32,
    /// Factor applied to the frame before embedding extraction.
    pub detection_scale: f32,
    pub thumbnail_size: u32,
    pub notes_excerpt_chars: usize,
    pub box_thickness: u32,
    /// Font for the name drawn over each box; boxes are unlabelled without one.
    pub label_font: Option<PathBuf>,
    pub label_height: f32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            display_width: 800,
            display_height: 500,
            detection_scale: 0.25,
            thumbnail_size: 50,
            notes_excerpt_chars: 80,
            box_thickness: 2,
            label_font: None,
            label_height: 16.0,
        }
    }
}

/// What one cycle did, for logging and tests.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub faces: usize,
    pub identified: usize,
    pub active_tracks: usize,
    pub captures: Vec<CaptureOutcome>,
    /// Extraction failed; an empty detection list was published.
    pub extraction_failed: bool,
}

pub struct FrameProcessor {
    embedder: Box<dyn EmbeddingService>,
    matcher: EuclideanMatcher,
    tracker: TrackManager,
    sequencer: CaptureSequencer,
    annotator: Annotator,
    config: ProcessorConfig,
}

impl FrameProcessor {
    pub fn new(
        embedder: Box<dyn EmbeddingService>,
        matcher: EuclideanMatcher,
        tracker: TrackerConfig,
        config: ProcessorConfig,
    ) -> Self {
        let mut annotator = Annotator::new(config.box_thickness);
        if let Some(path) = &config.label_font {
            match Annotator::new(config.box_thickness).with_font_file(path, config.label_height) {
                Ok(labelled) => annotator = labelled,
                Err(e) => tracing::warn!(error = %e, "drawing boxes without name labels"),
            }
        }
        tracing::debug!(labels = annotator.has_labels(), "frame annotator ready");
        Self {
            embedder,
            matcher,
            tracker: TrackManager::new(tracker),
            sequencer: CaptureSequencer,
            annotator,
            config,
        }
    }

    pub fn tracker(&self) -> &TrackManager {
        &self.tracker
    }

    /// Process one full-resolution frame and publish the result to `shared`.
    ///
    /// Reads the registry snapshot once, at the start of the cycle.
    pub fn process(&mut self, frame: &RgbImage, now: Instant, shared: &SharedState) -> CycleReport {
        let (frame_w, frame_h) = frame.dimensions();
        let mut display = image::imageops::resize(
            frame,
            self.config.display_width,
            self.config.display_height,
            FilterType::Triangle,
        );

        let downsampled;
        let small = match self.detection_size(frame_w, frame_h) {
            Some((w, h)) => {
                downsampled = image::imageops::resize(frame, w, h, FilterType::Triangle);
                &downsampled
            }
            None => frame,
        };

        let observations = match self.embedder.extract(small) {
            Ok(observations) => observations,
            Err(e) => {
                tracing::warn!(error = %e, "embedding extraction failed; publishing frame without detections");
                let active_tracks = self.tracker.tracks().len();
                shared.snapshot.publish(display, Vec::new(), active_tracks, now);
                return CycleReport {
                    active_tracks,
                    extraction_failed: true,
                    ..CycleReport::default()
                };
            }
        };

        let gallery = shared.registry.snapshot();
        let (up_x, up_y) = (frame_w as f32 / small.width() as f32, frame_h as f32 / small.height() as f32);
        let (to_display_x, to_display_y) = (
            self.config.display_width as f32 / frame_w as f32,
            self.config.display_height as f32 / frame_h as f32,
        );

        let mut report = CycleReport {
            faces: observations.len(),
            ..CycleReport::default()
        };
        let mut summaries = Vec::with_capacity(observations.len());
        let mut unmatched = Vec::new();

        for observation in observations {
            let full = observation.bbox.scaled(up_x, up_y);
            let shown = full.scaled(to_display_x, to_display_y);
            let face = crop_region(frame, &full);
            let thumbnail = face.as_ref().map(|face| {
                image::imageops::resize(
                    face,
                    self.config.thumbnail_size,
                    self.config.thumbnail_size,
                    FilterType::Triangle,
                )
            });

            match self.matcher.find(&observation.embedding, &gallery) {
                Some(found) => {
                    report.identified += 1;
                    self.annotator.draw(&mut display, &shown, &found.name, IDENTIFIED_COLOR);
                    summaries.push(DetectionSummary {
                        name: found.name,
                        relation: found.relation,
                        notes_excerpt: notes_excerpt(&found.notes, self.config.notes_excerpt_chars),
                        thumbnail,
                        identified: true,
                    });
                }
                None => {
                    self.annotator.draw(&mut display, &shown, UNKNOWN_NAME, UNIDENTIFIED_COLOR);
                    summaries.push(DetectionSummary {
                        name: UNKNOWN_NAME.to_string(),
                        relation: STRANGER_RELATION.to_string(),
                        notes_excerpt: String::new(),
                        thumbnail,
                        identified: false,
                    });
                    unmatched.push(UnmatchedFace {
                        bbox: shown,
                        crop: face.map(|image| Crop {
                            image,
                            embedding: observation.embedding,
                        }),
                    });
                }
            }
        }

        for capture in self.tracker.update(unmatched, now) {
            let outcome = self.sequencer.forward(capture, &shared.pending, now);
            report.captures.push(outcome);
        }

        report.active_tracks = self.tracker.tracks().len();
        shared.snapshot.publish(display, summaries, report.active_tracks, now);

        tracing::debug!(
            faces = report.faces,
            identified = report.identified,
            tracks = report.active_tracks,
            "cycle processed"
        );
        report
    }

    /// Dimensions to downsample to, or `None` to use the frame as is.
    fn detection_size(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        let scale = self.config.detection_scale;
        if !(scale > 0.0 && scale < 1.0) {
            return None;
        }
        let w = ((width as f32 * scale).round() as u32).max(1);
        let h = ((height as f32 * scale).round() as u32).max(1);
        Some((w, h))
    }
}
