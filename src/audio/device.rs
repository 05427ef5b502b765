//! Audio endpoint lookup (cpal)
//!
//! Ids have the form `input:<name>` or `output:<name>`; a bare name is also
//! accepted. `None` selects the host default.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::StreamConfig;
use serde::Serialize;

use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn prefix(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }

    fn devices(self, host: &cpal::Host) -> Result<Vec<cpal::Device>, DeviceError> {
        let devices = match self {
            Direction::Input => host.input_devices().map(|d| d.collect()),
            Direction::Output => host.output_devices().map(|d| d.collect()),
        };
        devices.map_err(|e| DeviceError::DeviceNotFound(e.to_string()))
    }

    fn default_device(self, host: &cpal::Host) -> Option<cpal::Device> {
        match self {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }
    }
}

/// Information about an audio endpoint
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub direction: Direction,
    pub is_default: bool,
    pub default_sample_rate: Option<u32>,
    pub default_channels: Option<u16>,
}

/// A device picked for one direction
pub struct ResolvedDevice {
    pub device: cpal::Device,
    pub name: String,
    pub direction: Direction,
}

impl ResolvedDevice {
    fn new(device: cpal::Device, direction: Direction) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            device,
            name,
            direction,
        }
    }

    fn supported_config(&self) -> Result<cpal::SupportedStreamConfig, cpal::DefaultStreamConfigError> {
        match self.direction {
            Direction::Input => self.device.default_input_config(),
            Direction::Output => self.device.default_output_config(),
        }
    }

    /// Native f32 stream config. An unavailable device is reported as a
    /// permission problem since that is how blocked access shows up.
    pub fn stream_config(&self) -> Result<StreamConfig, DeviceError> {
        let supported = self.supported_config().map_err(|e| match e {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                DeviceError::PermissionDenied(format!("{} is not available", self.name))
            }
            other => DeviceError::StreamError(other.to_string()),
        })?;
        Ok(StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        })
    }
}

/// All input and output endpoints of the default host
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut listed = Vec::new();

    for direction in [Direction::Input, Direction::Output] {
        let default_name = direction.default_device(&host).and_then(|d| d.name().ok());
        let Ok(devices) = direction.devices(&host) else {
            continue;
        };
        for device in devices {
            let Ok(name) = device.name() else { continue };
            let resolved = ResolvedDevice::new(device, direction);
            let config = resolved.supported_config().ok();
            listed.push(AudioDeviceInfo {
                id: format!("{}:{}", direction.prefix(), name),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                direction,
                default_sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                default_channels: config.as_ref().map(|c| c.channels()),
            });
        }
    }

    listed
}

/// Resolve a device id from [`list_devices`], or the default when `None`
pub fn resolve_device(id: Option<&str>, direction: Direction) -> Result<ResolvedDevice, DeviceError> {
    let host = cpal::default_host();

    let Some(id) = id else {
        return direction
            .default_device(&host)
            .map(|d| ResolvedDevice::new(d, direction))
            .ok_or_else(|| {
                DeviceError::DeviceNotFound(format!("No default {} device", direction.prefix()))
            });
    };

    let name = id
        .split_once(':')
        .filter(|(prefix, _)| *prefix == "input" || *prefix == "output")
        .map(|(_, name)| name)
        .unwrap_or(id);

    direction
        .devices(&host)?
        .into_iter()
        .find(|device| device.name().map(|n| n == name).unwrap_or(false))
        .map(|device| ResolvedDevice::new(device, direction))
        .ok_or_else(|| DeviceError::DeviceNotFound(id.to_string()))
}
