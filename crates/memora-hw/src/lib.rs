//! memora-hw: camera capture for the recognition pipeline.
//!
//! V4L2 device access, pixel conversion to RGB, and a `FrameSource` that
//! walks a chain of capture backends until one opens.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, FormatPreference, PixelFormat};
pub use frame::Frame;
pub use source::{CaptureBackend, CaptureDevice, FrameSource, V4l2Backend};
