//! rollcall-hw — hardware abstraction for camera capture.
//!
//! V4L2-based camera access producing RGB frames for the recognition
//! pipeline.

pub mod camera;
pub mod convert;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
