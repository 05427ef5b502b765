//! Audio subsystem: capture blocks, playback scheduling, devices

pub mod buffer;
pub mod capture;
pub mod playback;
#[cfg(feature = "devices")]
pub mod device;
#[cfg(feature = "devices")]
pub mod output;

pub use buffer::{LevelMeter, PlaybackBuffer};
pub use capture::{BlockCallback, Microphone};
pub use playback::{AudioOutput, OutputState, PlaybackHandle, PlaybackScheduler};

#[cfg(feature = "devices")]
pub use capture::CpalMicrophone;
#[cfg(feature = "devices")]
pub use device::{list_devices, AudioDeviceInfo, Direction};
#[cfg(feature = "devices")]
pub use output::CpalOutput;
