//! Per-generation device acquisition
//!
//! Every connection attempt acquires a fresh microphone, camera and playback
//! output; nothing is carried over from a previous generation.

use std::sync::Arc;

use crate::audio::capture::Microphone;
use crate::audio::playback::AudioOutput;
use crate::error::DeviceError;
use crate::video::camera::Camera;

/// Capture devices for one generation
pub struct CaptureDevices {
    pub microphone: Box<dyn Microphone>,
    pub camera: Arc<dyn Camera>,
}

impl CaptureDevices {
    /// Stop both tracks
    pub fn release(mut self) {
        self.microphone.stop();
        self.camera.stop();
    }
}

/// Source of devices
pub trait MediaDevices: Send + Sync {
    /// Open microphone and camera; permission problems are fatal for the session
    fn acquire(&self) -> Result<CaptureDevices, DeviceError>;

    fn open_output(&self) -> Result<Box<dyn AudioOutput>, DeviceError>;
}

#[cfg(feature = "devices")]
pub use self::system::SystemDevices;

#[cfg(feature = "devices")]
mod system {
    use std::sync::Arc;

    use super::{CaptureDevices, MediaDevices};
    use crate::audio::capture::CpalMicrophone;
    use crate::audio::output::CpalOutput;
    use crate::audio::playback::AudioOutput;
    use crate::config::{AudioConfig, VideoConfig};
    use crate::error::DeviceError;
    use crate::video::camera::NokhwaCamera;

    /// Default system microphone, camera and speakers
    pub struct SystemDevices {
        audio: AudioConfig,
        video: VideoConfig,
    }

    impl SystemDevices {
        pub fn new(audio: AudioConfig, video: VideoConfig) -> Self {
            Self { audio, video }
        }
    }

    impl MediaDevices for SystemDevices {
        fn acquire(&self) -> Result<CaptureDevices, DeviceError> {
            let microphone = CpalMicrophone::open(
                self.audio.input_device.as_deref(),
                self.audio.capture_rate,
                self.audio.block_size,
            )?;
            let camera = NokhwaCamera::open(self.video.camera_index)?;
            Ok(CaptureDevices {
                microphone: Box::new(microphone),
                camera: Arc::new(camera),
            })
        }

        fn open_output(&self) -> Result<Box<dyn AudioOutput>, DeviceError> {
            Ok(Box::new(CpalOutput::open(self.audio.output_device.as_deref())?))
        }
    }
}
