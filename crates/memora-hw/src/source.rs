//! `FrameSource`: single-owner camera access with backend fallback.

use crate::camera::{Camera, CameraError, FormatPreference, PixelFormat};
use crate::frame::{self, Frame};

/// Generic device tried last when the configured one cannot be opened.
pub const GENERIC_DEVICE: &str = "/dev/video0";

/// An opened camera.
///
/// `start` begins the capture session that every `read_frame` then draws
/// from; `stop` ends it.
pub trait CaptureDevice: Send {
    fn describe(&self) -> String;
    fn start(&mut self) -> Result<(), CameraError>;
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
    fn stop(&mut self);
}

/// One way of opening a camera.
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> String;
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError>;
}

impl CaptureDevice for Camera {
    fn describe(&self) -> String {
        format!(
            "{} {}x{} {:?}{}",
            self.device_path,
            self.width,
            self.height,
            self.pixel_format(),
            if self.is_streaming() { " streaming" } else { "" }
        )
    }

    fn start(&mut self) -> Result<(), CameraError> {
        self.start_stream()
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }

    fn stop(&mut self) {
        self.stop_stream();
    }
}

pub struct V4l2Backend {
    pub device: String,
    pub format: FormatPreference,
    pub width: u32,
    pub height: u32,
}

impl V4l2Backend {
    pub fn new(device: &str, format: FormatPreference, width: u32, height: u32) -> Self {
        Self {
            device: device.to_string(),
            format,
            width,
            height,
        }
    }

    /// Configured device as YUYV, then MJPG, then its native format,
    /// then the generic device natively.
    pub fn default_chain(device: &str, width: u32, height: u32) -> Vec<Box<dyn CaptureBackend>> {
        let mut chain: Vec<Box<dyn CaptureBackend>> = vec![
            Box::new(Self::new(device, FormatPreference::Exact(PixelFormat::Yuyv), width, height)),
            Box::new(Self::new(device, FormatPreference::Exact(PixelFormat::Mjpeg), width, height)),
            Box::new(Self::new(device, FormatPreference::Native, width, height)),
        ];
        if device != GENERIC_DEVICE {
            chain.push(Box::new(Self::new(GENERIC_DEVICE, FormatPreference::Native, width, height)));
        }
        chain
    }
}

impl CaptureBackend for V4l2Backend {
    fn name(&self) -> String {
        match self.format {
            FormatPreference::Exact(fmt) => format!("v4l2:{}:{fmt:?}", self.device),
            FormatPreference::Native => format!("v4l2:{}:native", self.device),
        }
    }

    fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let mut camera = Camera::open(&self.device, self.format, self.width, self.height)?;
        camera.start()?;
        Ok(Box::new(camera))
    }
}

/// Owns the camera for the producer loop.
///
/// Closing is idempotent and also happens on drop, so the device is
/// released on every exit path.
pub struct FrameSource {
    device: Option<Box<dyn CaptureDevice>>,
    backend: String,
    mirror: bool,
}

impl FrameSource {
    /// Try `backends` in order; the first that opens wins. Discards
    /// `warmup_frames` reads before returning.
    pub fn open(
        backends: &[Box<dyn CaptureBackend>],
        warmup_frames: usize,
        mirror: bool,
    ) -> Result<Self, CameraError> {
        let mut failures = Vec::new();

        for backend in backends {
            match backend.open() {
                Ok(mut device) => {
                    tracing::info!(backend = %backend.name(), device = %device.describe(), "camera backend opened");
                    if warmup_frames > 0 {
                        tracing::info!(count = warmup_frames, "discarding warmup frames");
                        for _ in 0..warmup_frames {
                            let _ = device.read_frame();
                        }
                    }
                    return Ok(Self {
                        device: Some(device),
                        backend: backend.name(),
                        mirror,
                    });
                }
                Err(e) => {
                    tracing::warn!(backend = %backend.name(), error = %e, "camera backend failed");
                    failures.push(format!("{}: {e}", backend.name()));
                }
            }
        }

        Err(CameraError::DeviceUnavailable(if failures.is_empty() {
            "no backends configured".to_string()
        } else {
            failures.join("; ")
        }))
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let device = self.device.as_mut().ok_or(CameraError::Closed)?;
        let mut frame = device.read_frame()?;
        if self.mirror {
            frame::mirror(&mut frame.image);
        }
        Ok(frame)
    }

    /// Stop the capture session and release the device. Safe to call
    /// more than once.
    pub fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop();
            tracing::info!(device = %device.describe(), "camera released");
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}
