//! dwell-hw — Snapshot capture providers.
//!
//! V4L2 camera capture and a synthetic provider, both writing PNG artifacts
//! that the capture pipeline processes and then deletes.

pub mod camera;
pub mod frame;
pub mod synthetic;

pub use camera::{Camera, CameraConfig, CameraError};
pub use frame::Frame;
pub use synthetic::SyntheticCapture;
