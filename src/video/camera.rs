//! Camera source
//!
//! A camera is shared between the frame sampler, the snapshot analyzer and
//! the zoom control, so the trait works through `&self`.

use image::RgbImage;

use crate::error::DeviceError;
use crate::video::zoom::ZoomCapability;

/// Live video track owned by one session generation
pub trait Camera: Send + Sync {
    /// True once the stream has produced at least one frame
    fn is_ready(&self) -> bool;

    /// Latest frame at full resolution
    fn snapshot(&self) -> Option<RgbImage>;

    /// Zoom range, if the device exposes one
    fn zoom_capability(&self) -> Option<ZoomCapability>;

    fn apply_zoom(&self, level: f64) -> Result<(), DeviceError>;

    /// Stop the device track; idempotent
    fn stop(&self);
}

#[cfg(feature = "devices")]
pub use self::nokhwa_camera::NokhwaCamera;

#[cfg(feature = "devices")]
mod nokhwa_camera {
    use image::RgbImage;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{
        CameraIndex, ControlValueDescription, ControlValueSetter, KnownCameraControl,
        RequestedFormat, RequestedFormatType,
    };
    use nokhwa::{Buffer, CallbackCamera};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::Camera;
    use crate::error::DeviceError;
    use crate::video::zoom::ZoomCapability;

    /// nokhwa-backed camera; the callback keeps only the newest buffer
    pub struct NokhwaCamera {
        camera: Mutex<CallbackCamera>,
        latest: Arc<Mutex<Option<Buffer>>>,
        stopped: AtomicBool,
    }

    impl NokhwaCamera {
        pub fn open(index: u32) -> Result<Self, DeviceError> {
            let latest: Arc<Mutex<Option<Buffer>>> = Arc::new(Mutex::new(None));
            let latest_for_callback = latest.clone();

            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
            let mut camera = CallbackCamera::new(CameraIndex::Index(index), requested, move |buffer| {
                *latest_for_callback.lock() = Some(buffer);
            })
            .map_err(|e| {
                let message = e.to_string();
                if message.to_lowercase().contains("permission") {
                    DeviceError::PermissionDenied(message)
                } else {
                    DeviceError::DeviceNotFound(message)
                }
            })?;

            camera
                .open_stream()
                .map_err(|e| DeviceError::StreamError(format!("Failed to start stream: {}", e)))?;

            tracing::info!("Camera {} streaming", index);

            Ok(Self {
                camera: Mutex::new(camera),
                latest,
                stopped: AtomicBool::new(false),
            })
        }
    }

    impl Camera for NokhwaCamera {
        fn is_ready(&self) -> bool {
            !self.stopped.load(Ordering::Relaxed) && self.latest.lock().is_some()
        }

        fn snapshot(&self) -> Option<RgbImage> {
            if self.stopped.load(Ordering::Relaxed) {
                return None;
            }
            let buffer = self.latest.lock().clone()?;
            let decoded = match buffer.decode_image::<RgbFormat>() {
                Ok(img) => img,
                Err(e) => {
                    tracing::debug!("Frame decode failed: {}", e);
                    return None;
                }
            };
            let (width, height) = (decoded.width(), decoded.height());
            RgbImage::from_raw(width, height, decoded.into_raw())
        }

        fn zoom_capability(&self) -> Option<ZoomCapability> {
            let control = self
                .camera
                .lock()
                .camera_control(KnownCameraControl::Zoom)
                .ok()?;
            match control.description() {
                ControlValueDescription::IntegerRange {
                    min,
                    max,
                    value,
                    step,
                    ..
                } => ZoomCapability::new(*min as f64, *max as f64, *step as f64, *value as f64),
                ControlValueDescription::FloatRange {
                    min,
                    max,
                    value,
                    step,
                    ..
                } => ZoomCapability::new(*min, *max, *step, *value),
                _ => None,
            }
        }

        fn apply_zoom(&self, level: f64) -> Result<(), DeviceError> {
            let mut camera = self.camera.lock();
            let control = camera
                .camera_control(KnownCameraControl::Zoom)
                .map_err(|e| DeviceError::Unsupported(e.to_string()))?;
            let setter = zoom_setter(control.description(), level)
                .ok_or_else(|| DeviceError::Unsupported("zoom is not a numeric range".into()))?;
            camera
                .set_camera_control(KnownCameraControl::Zoom, setter)
                .map_err(|e| DeviceError::Unsupported(e.to_string()))
        }

        fn stop(&self) {
            if self.stopped.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Err(e) = self.camera.lock().stop_stream() {
                tracing::warn!("Failed to stop camera stream: {}", e);
            }
            *self.latest.lock() = None;
        }
    }

    /// Setter of the same kind the device reported for its zoom range
    fn zoom_setter(description: &ControlValueDescription, level: f64) -> Option<ControlValueSetter> {
        match description {
            ControlValueDescription::IntegerRange { .. } => {
                Some(ControlValueSetter::Integer(level.round() as i64))
            }
            ControlValueDescription::FloatRange { .. } => Some(ControlValueSetter::Float(level)),
            _ => None,
        }
    }

    impl Drop for NokhwaCamera {
        fn drop(&mut self) {
            self.stop();
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn float_zoom_keeps_step_precision() {
            let float = ControlValueDescription::FloatRange {
                min: 1.0,
                max: 4.0,
                value: 1.0,
                step: 0.5,
                default: 1.0,
            };
            assert!(matches!(zoom_setter(&float, 2.5), Some(ControlValueSetter::Float(v)) if v == 2.5));

            let integer = ControlValueDescription::IntegerRange {
                min: 100,
                max: 500,
                value: 100,
                step: 10,
                default: 100,
            };
            assert!(matches!(zoom_setter(&integer, 249.6), Some(ControlValueSetter::Integer(250))));
            assert!(zoom_setter(&ControlValueDescription::None, 2.0).is_none());
        }
    }
}
