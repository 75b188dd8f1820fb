//! facewatch-hw: frame capture.
//!
//! V4L2 camera access and the grayscale [`Frame`] handed to the pipeline.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
