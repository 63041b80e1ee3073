//! attendify-hw — Color camera capture.
//!
//! Defines the capture capability used by the attendance loop and provides
//! a V4L2 implementation delivering RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{CameraError, CaptureDevice, DeviceInfo, DeviceOpener, PixelFormat, V4l2Camera, V4l2Opener};
pub use frame::Frame;
