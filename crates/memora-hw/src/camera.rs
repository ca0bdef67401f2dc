//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no camera backend could be opened: {0}")]
    DeviceUnavailable(String),
    #[error("frame source is closed")]
    Closed,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes/pixel.
    Yuyv,
    /// Motion-JPEG, one compressed image per buffer.
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }

    fn fourcc(self) -> FourCC {
        match self {
            Self::Yuyv => FourCC::new(b"YUYV"),
            Self::Mjpeg => FourCC::new(b"MJPG"),
            Self::Grey => FourCC::new(b"GREY"),
        }
    }
}

/// Which format to ask the driver for when opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatPreference {
    /// Request this format at the given resolution; fail if the driver picks another.
    Exact(PixelFormat),
    /// Leave the driver's current format and resolution alone.
    Native,
}

/// Buffers queued in a capture session.
const STREAM_BUFFERS: u32 = 4;

/// V4L2 camera device handle.
///
/// Frames come from one mmap capture session that stays streaming until
/// [`Camera::stop_stream`] or drop, rather than one session per read.
pub struct Camera {
    /// Declared before `device` so the session is torn down first.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(
        device_path: &str,
        preference: FormatPreference,
        width: u32,
        height: u32,
    ) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        if let FormatPreference::Exact(wanted) = preference {
            fmt.fourcc = wanted.fourcc();
            fmt.width = width;
            fmt.height = height;
            fmt = device.set_format(&fmt).map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;
            if fmt.fourcc != wanted.fourcc() {
                return Err(CameraError::FormatNegotiationFailed(format!(
                    "asked for {:?}, driver chose {:?}",
                    wanted.fourcc(),
                    fmt.fourcc
                )));
            }
        }

        let pixel_format = PixelFormat::from_fourcc(fmt.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, MJPG, or GREY)",
                fmt.fourcc
            ))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            width = fmt.width,
            height = fmt.height,
            fourcc = ?fmt.fourcc,
            "opened camera"
        );

        Ok(Self {
            stream: None,
            device,
            width: fmt.width,
            height: fmt.height,
            device_path: device_path.to_string(),
            fourcc: fmt.fourcc,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Start the capture session if it is not already running.
    pub fn start_stream(&mut self) -> Result<(), CameraError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
            tracing::debug!(device = %self.device_path, buffers = STREAM_BUFFERS, "capture stream started");
            self.stream = Some(stream);
        }
        Ok(())
    }

    /// End the capture session. Safe to call when none is running.
    pub fn stop_stream(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(device = %self.device_path, "capture stream stopped");
        }
    }

    /// Capture the next frame as RGB from the running session, starting it
    /// if needed. A failed dequeue ends the session so the next call
    /// starts a fresh one.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        self.start_stream()?;
        let (format, width, height) = (self.pixel_format, self.width, self.height);
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("capture stream not running".into()));
        };
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => {
                self.stop_stream();
                return Err(CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")));
            }
        };
        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };

        Ok(Frame {
            image: buf_to_rgb(format, width, height, &buf[..used])?,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

fn buf_to_rgb(format: PixelFormat, width: u32, height: u32, buf: &[u8]) -> Result<RgbImage, CameraError> {
    let converted = match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height),
        PixelFormat::Grey => frame::grey_to_rgb(buf, width, height),
        PixelFormat::Mjpeg => frame::mjpeg_to_rgb(buf),
    };
    converted.map_err(|e| CameraError::CaptureFailed(format!("{format:?} conversion failed: {e}")))
}
