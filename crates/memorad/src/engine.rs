use crate::config::Config;
use memora_core::{EuclideanMatcher, FrameProcessor, OnnxEmbedder, SharedState};
use memora_hw::{CameraError, FrameSource, V4l2Backend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("embedding model error: {0}")]
    Embedding(#[from] memora_core::EmbeddingError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Open the camera through the configured backend chain.
pub fn open_source(config: &Config) -> Result<FrameSource, EngineError> {
    let backends = V4l2Backend::default_chain(
        &config.camera_device,
        config.capture_width,
        config.capture_height,
    );
    Ok(FrameSource::open(&backends, config.warmup_frames, config.mirror)?)
}

/// Load both ONNX models and build the per-cycle processor.
pub fn load_processor(config: &Config) -> Result<FrameProcessor, EngineError> {
    let embedder = OnnxEmbedder::load(&config.scrfd_model_path(), &config.arcface_model_path())?;
    tracing::info!(dir = %config.model_dir.display(), "embedding models loaded");
    Ok(FrameProcessor::new(
        Box::new(embedder),
        EuclideanMatcher::new(config.tolerance),
        config.tracker(),
        config.processor(),
    ))
}

/// Handle to the producer thread.
///
/// Dropping it stops the thread and waits for it, which releases the camera.
pub struct EngineHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("engine thread panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Spawn the producer loop on a dedicated OS thread.
///
/// The thread owns `source` for its whole life; the camera is closed when
/// the loop ends, and by `FrameSource`'s drop if the loop unwinds.
pub fn spawn_engine(
    mut source: FrameSource,
    mut processor: FrameProcessor,
    shared: Arc<SharedState>,
    tick: Duration,
) -> Result<EngineHandle, EngineError> {
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);

    let thread = std::thread::Builder::new()
        .name("memora-engine".into())
        .spawn(move || {
            tracing::info!(backend = source.backend(), tick_ms = tick.as_millis() as u64, "engine thread started");
            let mut cycles = 0u64;

            while !thread_stop.load(Ordering::SeqCst) {
                let started = Instant::now();
                match source.read_frame() {
                    Ok(frame) => {
                        processor.process(&frame.image, started, &shared);
                        cycles += 1;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "frame capture failed; retrying next tick");
                    }
                }
                if let Some(rest) = tick.checked_sub(started.elapsed()) {
                    std::thread::sleep(rest);
                }
            }

            source.close();
            tracing::info!(cycles, "engine thread exiting");
        })?;

    Ok(EngineHandle {
        stop,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use memora_core::types::{BoundingBox, Embedding, FaceObservation};
    use memora_core::{EmbeddingError, EmbeddingService, ProcessorConfig, TrackerConfig};
    use memora_hw::{CaptureBackend, CaptureDevice, Frame};
    use std::sync::atomic::AtomicUsize;

    struct OneFace;

    impl EmbeddingService for OneFace {
        fn extract(&mut self, _image: &RgbImage) -> Result<Vec<FaceObservation>, EmbeddingError> {
            Ok(vec![FaceObservation {
                bbox: BoundingBox::new(10.0, 10.0, 20.0, 20.0),
                embedding: Embedding::new(vec![1.0, 0.0]),
            }])
        }
    }

    #[derive(Clone, Default)]
    struct Probe {
        reads: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    struct FakeCamera {
        probe: Probe,
        fail_every_other: bool,
    }

    impl CaptureDevice for FakeCamera {
        fn describe(&self) -> String {
            "fake".into()
        }

        fn start(&mut self) -> Result<(), CameraError> {
            Ok(())
        }

        fn stop(&mut self) {}

        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            let n = self.probe.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_every_other && n % 2 == 1 {
                return Err(CameraError::CaptureFailed("scripted".into()));
            }
            Ok(Frame {
                image: RgbImage::from_pixel(64, 40, image::Rgb([90, 90, 90])),
                timestamp: Instant::now(),
                sequence: n as u32,
            })
        }
    }

    impl Drop for FakeCamera {
        fn drop(&mut self) {
            self.probe.released.store(true, Ordering::SeqCst);
        }
    }

    struct FakeBackend(Probe, bool);

    impl CaptureBackend for FakeBackend {
        fn name(&self) -> String {
            "fake".into()
        }

        fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
            Ok(Box::new(FakeCamera {
                probe: self.0.clone(),
                fail_every_other: self.1,
            }))
        }
    }

    fn processor() -> FrameProcessor {
        FrameProcessor::new(
            Box::new(OneFace),
            EuclideanMatcher::default(),
            TrackerConfig::default(),
            ProcessorConfig {
                display_width: 64,
                display_height: 40,
                detection_scale: 1.0,
                ..ProcessorConfig::default()
            },
        )
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_engine_publishes_and_releases_camera() {
        let probe = Probe::default();
        let backends: Vec<Box<dyn CaptureBackend>> = vec![Box::new(FakeBackend(probe.clone(), false))];
        let source = FrameSource::open(&backends, 0, false).unwrap();
        let shared = Arc::new(SharedState::default());

        let engine =
            spawn_engine(source, processor(), Arc::clone(&shared), Duration::from_millis(1)).unwrap();
        assert!(wait_for(|| shared.snapshot.read().sequence >= 3));
        assert!(engine.is_running());

        let snap = shared.snapshot.read();
        assert_eq!(snap.detections.len(), 1);
        assert_eq!(snap.active_tracks, 1);

        engine.shutdown();
        assert!(probe.released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_capture_failures_do_not_stop_engine() {
        let probe = Probe::default();
        let backends: Vec<Box<dyn CaptureBackend>> = vec![Box::new(FakeBackend(probe.clone(), true))];
        let source = FrameSource::open(&backends, 0, false).unwrap();
        let shared = Arc::new(SharedState::default());

        let engine =
            spawn_engine(source, processor(), Arc::clone(&shared), Duration::from_millis(1)).unwrap();
        assert!(wait_for(|| probe.reads.load(Ordering::SeqCst) >= 6));
        assert!(engine.is_running());
        assert!(shared.snapshot.read().sequence >= 2);

        drop(engine);
        assert!(probe.released.load(Ordering::SeqCst));
    }
}
