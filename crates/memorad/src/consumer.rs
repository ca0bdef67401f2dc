//! Operator-side poll loop.
//!
//! Expires stale pending registrations, copies the latest snapshot out of
//! the producer's buffer, and encodes it for the D-Bus interface. All
//! encoding runs on the blocking pool; no lock is held while it runs.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use memora_core::{PendingRegistration, SharedState, Snapshot};
use parking_lot::RwLock;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const FRAME_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionView {
    pub name: String,
    pub relation: String,
    pub notes_excerpt: String,
    pub identified: bool,
    pub thumbnail_png: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingView {
    pub id: u64,
    pub age_secs: u64,
    pub image_png: Vec<u8>,
}

/// Encoded state served to operators.
#[derive(Debug, Clone, Default)]
pub struct OperatorView {
    /// Snapshot sequence this view was rendered from; 0 before the first frame.
    pub sequence: u64,
    pub active_tracks: usize,
    pub frame_jpeg: Vec<u8>,
    pub detections: Vec<DetectionView>,
    pub pending: Option<PendingView>,
}

pub type SharedView = Arc<RwLock<Arc<OperatorView>>>;

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub idle_poll: Duration,
    pub pending_poll: Duration,
    pub pending_timeout: Duration,
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, FRAME_JPEG_QUALITY).encode_image(image)?;
    Ok(buf)
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Build the next view from a snapshot copy and the pending entry.
///
/// Reuses the previous frame and thumbnails when the snapshot has not
/// advanced, and the previous pending image while the pending id is unchanged.
pub fn render_view(
    snapshot: Snapshot,
    pending: Option<PendingRegistration>,
    previous: &OperatorView,
    now: Instant,
) -> OperatorView {
    let (frame_jpeg, detections) = if snapshot.sequence == previous.sequence {
        (previous.frame_jpeg.clone(), previous.detections.clone())
    } else {
        let frame_jpeg = snapshot
            .frame
            .as_ref()
            .map(|frame| {
                encode_jpeg(frame).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "frame encode failed");
                    Vec::new()
                })
            })
            .unwrap_or_default();
        let detections = snapshot
            .detections
            .into_iter()
            .map(|d| DetectionView {
                thumbnail_png: d
                    .thumbnail
                    .as_ref()
                    .and_then(|t| encode_png(t).ok())
                    .unwrap_or_default(),
                name: d.name,
                relation: d.relation,
                notes_excerpt: d.notes_excerpt,
                identified: d.identified,
            })
            .collect();
        (frame_jpeg, detections)
    };

    let pending = pending.map(|entry| {
        let image_png = match &previous.pending {
            Some(cached) if cached.id == entry.id => cached.image_png.clone(),
            _ => encode_png(&entry.image).unwrap_or_else(|e| {
                tracing::warn!(pending = entry.id, error = %e, "pending image encode failed");
                Vec::new()
            }),
        };
        PendingView {
            id: entry.id,
            age_secs: entry.age(now).as_secs(),
            image_png,
        }
    });

    OperatorView {
        sequence: snapshot.sequence,
        active_tracks: snapshot.active_tracks,
        frame_jpeg,
        detections,
        pending,
    }
}

/// Spawn the consumer loop. It runs until `shutdown` changes or its sender is dropped.
pub fn spawn_consumer(
    shared: Arc<SharedState>,
    view: SharedView,
    settings: ConsumerSettings,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("consumer loop started");
        loop {
            let now = Instant::now();
            if let Some(expired) = shared.pending.expire(now, settings.pending_timeout) {
                tracing::info!(
                    pending = expired.id,
                    age_secs = expired.age(now).as_secs(),
                    "pending registration expired"
                );
            }

            let snapshot = shared.snapshot.read();
            let pending = shared.pending.current();
            let has_pending = pending.is_some();
            let previous = Arc::clone(&*view.read());

            match tokio::task::spawn_blocking(move || render_view(snapshot, pending, &previous, now)).await {
                Ok(next) => *view.write() = Arc::new(next),
                Err(e) => tracing::warn!(error = %e, "render task failed"),
            }

            // Slower polling while a registration is on screen keeps the
            // operator's text entry undisturbed.
            let interval = if has_pending { settings.pending_poll } else { settings.idle_poll };
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("consumer loop exiting");
    })
}
