//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

const STREAM_BUFFERS: u32 = 4;
const MAX_VIDEO_NODES: u32 = 16;

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
    #[error("camera already released")]
    Released,
    #[error("frame conversion failed: {0}")]
    Frame(#[from] FrameError),
}

/// A source of RGB frames that owns an exclusive hardware handle.
pub trait FrameSource: Send {
    /// Block until the next frame is available.
    fn capture(&mut self) -> Result<Frame, CameraError>;

    /// Release the underlying device. Idempotent; later captures fail with
    /// [`CameraError::Released`].
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpeg,
    /// Packed 24-bit RGB.
    Rgb24,
    /// Packed 24-bit BGR.
    Bgr24,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"RGB3" => Some(Self::Rgb24),
            b"BGR3" => Some(Self::Bgr24),
            _ => None,
        }
    }
}

/// V4L2 camera device handle with a long-lived capture stream.
pub struct Camera {
    // Field order matters: the stream must drop before the device.
    stream: Option<MmapStream<'static>>,
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera (e.g., "/dev/video0") and negotiate the requested
    /// resolution. YUYV is requested; the driver may settle on MJPG or RGB.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        let device = open_capture_device(device_path)?;
        let (format, pixel_format) = negotiate(&device, width, height)?;

        tracing::info!(
            device = device_path,
            width = format.width,
            height = format.height,
            fourcc = ?format.fourcc,
            "capture format negotiated"
        );

        Ok(Self {
            stream: None,
            device: Some(device),
            width: format.width,
            height: format.height,
            device_path: device_path.to_string(),
            fourcc: format.fourcc,
            pixel_format,
        })
    }

    /// Convert a raw buffer to RGB based on the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, FrameError> {
        match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Mjpeg => frame::mjpeg_to_rgb(buf, self.width, self.height),
            PixelFormat::Bgr24 => frame::bgr_to_rgb(buf, self.width, self.height),
            PixelFormat::Rgb24 => {
                let expected = self.width as usize * self.height as usize * 3;
                if buf.len() < expected {
                    return Err(FrameError::InvalidLength {
                        expected,
                        actual: buf.len(),
                    });
                }
                Ok(buf[..expected].to_vec())
            }
        }
    }

    /// List V4L2 nodes `/dev/video0..15` that support video capture.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_VIDEO_NODES)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                        path,
                    })
            })
            .collect()
    }
}

/// Open `path` and confirm it is a capture device.
fn open_capture_device(path: &str) -> Result<Device, CameraError> {
    if !Path::new(path).exists() {
        return Err(CameraError::DeviceNotFound(path.to_string()));
    }

    let device = Device::with_path(path).map_err(|e| {
        let msg = e.to_string();
        if msg.contains("busy") || msg.contains("EBUSY") {
            CameraError::DeviceBusy
        } else {
            CameraError::DeviceNotFound(format!("{path}: {msg}"))
        }
    })?;

    let caps = device
        .query_caps()
        .map_err(|e| CameraError::CaptureFailed(format!("querying capabilities: {e}")))?;
    tracing::debug!(device = path, driver = %caps.driver, card = %caps.card, "camera opened");

    if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
        return Err(CameraError::StreamingNotSupported);
    }
    Ok(device)
}

/// Ask for YUYV at `width`x`height` and accept whatever supported format
/// the driver settles on.
fn negotiate(device: &Device, width: u32, height: u32) -> Result<(Format, PixelFormat), CameraError> {
    let negotiation = |what: &str, e: std::io::Error| {
        CameraError::FormatNegotiationFailed(format!("{what}: {e}"))
    };

    let mut requested = device.format().map_err(|e| negotiation("reading format", e))?;
    requested.fourcc = FourCC::new(b"YUYV");
    requested.width = width;
    requested.height = height;

    let format = device
        .set_format(&requested)
        .map_err(|e| negotiation("setting format", e))?;

    let pixel_format = PixelFormat::from_fourcc(format.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "unsupported pixel format {:?}; need YUYV, MJPG, RGB3 or BGR3",
            format.fourcc
        ))
    })?;
    Ok((format, pixel_format))
}

impl FrameSource for Camera {
    fn capture(&mut self) -> Result<Frame, CameraError> {
        let device = self.device.as_ref().ok_or(CameraError::Released)?;

        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
            self.stream = Some(stream);
        }
        let stream = self.stream.as_mut().ok_or(CameraError::Released)?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let raw = buf.to_vec();

        Ok(Frame {
            data: self.buf_to_rgb(&raw)?,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    fn release(&mut self) {
        if self.device.is_none() {
            return;
        }
        self.stream = None;
        self.device = None;
        tracing::info!(device = %self.device_path, "camera released");
    }

    fn is_released(&self) -> bool {
        self.device.is_none()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.release();
    }
}
