//! Video: camera source, frame compression, sampling and zoom

pub mod camera;
pub mod frame;
pub mod sampler;
pub mod zoom;

pub use camera::Camera;
pub use frame::VideoFrame;
pub use sampler::{FrameSampler, TickOutcome};
pub use zoom::{ZoomCapability, ZoomControl};

#[cfg(feature = "devices")]
pub use camera::NokhwaCamera;
