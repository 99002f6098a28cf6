//! V4L2 snapshot capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use dwell_core::job::{CaptureError, CaptureProvider, CapturedArtifact};
use std::path::{Path, PathBuf};
use std::time::Duration;
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
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("timed out waiting for a frame")]
    TimedOut,
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub device_path: String,
    /// Directory that receives PNG snapshots.
    pub capture_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Give up on a frame after this long. `None` waits forever.
    pub timeout: Option<Duration>,
}

/// V4L2 camera that writes one PNG per capture.
pub struct Camera {
    device: Device,
    config: CameraConfig,
    pub width: u32,
    pub height: u32,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open the device and negotiate a format. Fails fast if anything is off.
    pub fn open(config: CameraConfig) -> Result<Self, CameraError> {
        let device_path = config.device_path.as_str();
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
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = config.width;
        fmt.height = config.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or GREY)",
                negotiated.fourcc
            )));
        };

        std::fs::create_dir_all(&config.capture_dir)?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            capture_dir = %config.capture_dir.display(),
            "camera opened"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
            config,
        })
    }

    /// Grab a single grayscale frame.
    pub fn grab_frame(&self) -> Result<Frame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 2).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;
        if let Some(timeout) = self.config.timeout {
            stream.set_timeout(timeout);
        }

        let (buf, meta) = stream.next().map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                CameraError::TimedOut
            } else {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            }
        })?;

        let pixels = (self.width * self.height) as usize;
        let data = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)?,
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                buf[..pixels].to_vec()
            }
        };

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            sequence: meta.sequence,
        })
    }
}

impl CaptureProvider for Camera {
    fn capture(&mut self) -> Result<Option<CapturedArtifact>, CaptureError> {
        let frame = self.grab_frame().map_err(|e| match e {
            CameraError::TimedOut => CaptureError::TimedOut(
                self.config
                    .timeout
                    .map(|t| t.as_millis() as u64)
                    .unwrap_or_default(),
            ),
            other => CaptureError::Device(Box::new(other)),
        })?;

        let path = frame::next_artifact_path(&self.config.capture_dir);
        frame
            .save_png(&path)
            .map_err(|e| CaptureError::Device(Box::new(e)))?;
        tracing::debug!(seq = frame.sequence, path = %path.display(), "snapshot written");

        Ok(Some(CapturedArtifact { path }))
    }
}
