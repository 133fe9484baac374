//! rollcall-hw: Hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access and conversion of the negotiated
//! pixel format into packed RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
