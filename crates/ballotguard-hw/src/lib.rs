//! ballotguard-hw — Hardware abstraction for camera capture.
//!
//! Defines the `FrameSource`/`CameraProvider` seams the capture session
//! depends on, plus the V4L2 implementation used on Linux kiosks.

pub mod camera;
pub mod frame;

pub use camera::{CameraError, CameraProvider, DeviceInfo, FrameSource, V4l2Camera, V4l2Provider};
pub use frame::Frame;
