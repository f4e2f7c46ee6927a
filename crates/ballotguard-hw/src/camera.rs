//! Camera capture behind the [`FrameSource`]/[`CameraProvider`] seams, with
//! a V4L2 implementation.
//!
//! Platform failures are adapted into the closed [`CameraError`] variant set
//! at this boundary so downstream code matches exhaustively instead of
//! string-comparing platform error names.

use crate::frame::{self, Frame};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Closed set of camera failures the rest of the system dispatches on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera access denied")]
    PermissionDenied,
    #[error("camera is in use by another application")]
    DeviceInUse,
    #[error("no camera device found")]
    DeviceNotFound,
    #[error("camera error: {0}")]
    Unknown(String),
}

/// A live video source. One instance per capture attempt; `stop` is
/// idempotent and releases the device for other applications.
pub trait FrameSource: Send + Sync {
    /// Grab one grayscale frame. Blocking; callers on an async runtime wrap
    /// this in a blocking task.
    fn grab(&self) -> Result<Frame, CameraError>;

    /// Stop the source. After this every `grab` fails and `is_stopped`
    /// reports true.
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    /// Negotiated (width, height).
    fn dimensions(&self) -> (u32, u32);
}

/// Opens a [`FrameSource`]. The open step is where permission and
/// device-availability failures surface.
pub trait CameraProvider: Send + Sync {
    fn open(&self) -> Result<Arc<dyn FrameSource>, CameraError>;
}

/// Info about a discovered V4L2 capture device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
}

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    Yuyv,
    Grey,
    Y16,
}

/// V4L2 camera device handle.
pub struct V4l2Camera {
    device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    stopped: AtomicBool,
    sequence: AtomicU32,
}

/// Map a V4L2 open failure onto the closed error set.
fn adapt_open_error(path: &str, err: &dyn std::fmt::Display) -> CameraError {
    let text = err.to_string();
    if text.contains("EBUSY") || text.contains("busy") || text.contains("Busy") {
        CameraError::DeviceInUse
    } else if text.contains("EACCES") || text.contains("Permission denied") {
        CameraError::PermissionDenied
    } else if text.contains("ENOENT") || text.contains("No such") {
        CameraError::DeviceNotFound
    } else {
        CameraError::Unknown(format!("{path}: {text}"))
    }
}

impl V4l2Camera {
    /// Open a V4L2 device by path (e.g., "/dev/video0") and negotiate a
    /// 640×480 grayscale-convertible format.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound);
        }

        let device =
            Device::with_path(device_path).map_err(|e| adapt_open_error(device_path, &e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::Unknown(format!("query capabilities: {e}")))?;

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::Unknown(format!(
                "{device_path} does not support video capture"
            )));
        }

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::Unknown(format!("get format: {e}")))?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = 640;
        fmt.height = 480;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::Unknown(format!("set format: {e}")))?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::Unknown(format!(
                "unsupported pixel format {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
            stopped: AtomicBool::new(false),
            sequence: AtomicU32::new(0),
        })
    }

    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;
        match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::Unknown(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height)
                .map_err(|e| CameraError::Unknown(e.to_string())),
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)
                .map_err(|e| CameraError::Unknown(e.to_string())),
        }
    }

    /// List available V4L2 video capture devices. Used by capability probes.
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
            });
        }
        devices
    }
}

impl FrameSource for V4l2Camera {
    fn grab(&self) -> Result<Frame, CameraError> {
        if self.is_stopped() {
            return Err(CameraError::Unknown("camera stream stopped".into()));
        }

        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::Unknown(format!("create mmap stream: {e}")))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::Unknown(format!("dequeue buffer: {e}")))?;

        let gray = self.buf_to_grayscale(buf)?;
        self.sequence.store(meta.sequence, Ordering::Relaxed);

        Ok(Frame {
            data: gray,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Opens [`V4l2Camera`] instances for a fixed device path.
pub struct V4l2Provider {
    device_path: String,
}

impl V4l2Provider {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }
}

impl CameraProvider for V4l2Provider {
    fn open(&self) -> Result<Arc<dyn FrameSource>, CameraError> {
        Ok(Arc::new(V4l2Camera::open(&self.device_path)?))
    }
}
