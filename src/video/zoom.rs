//! Camera zoom negotiation

use serde::Serialize;
use std::sync::Arc;

use crate::video::camera::Camera;

/// Zoom range exposed by the camera, plus the level last applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZoomCapability {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub level: f64,
}

impl ZoomCapability {
    /// `None` if the range is empty or not finite
    pub fn new(min: f64, max: f64, step: f64, level: f64) -> Option<Self> {
        if !(min.is_finite() && max.is_finite()) || max < min {
            return None;
        }
        let step = if step.is_finite() && step > 0.0 { step } else { 0.0 };
        let mut cap = Self {
            min,
            max,
            step,
            level: min,
        };
        cap.level = cap.clamp(level);
        Some(cap)
    }

    /// Clamp into `[min, max]` and snap to the nearest step above `min`
    pub fn clamp(&self, level: f64) -> f64 {
        if level.is_nan() {
            return self.min;
        }
        let mut value = level.clamp(self.min, self.max);
        if self.step > 0.0 {
            let steps = ((value - self.min) / self.step).round();
            value = (self.min + steps * self.step).clamp(self.min, self.max);
        }
        value
    }
}

/// Applies zoom to the live camera of one session generation
///
/// Device rejections are logged and ignored; the requested level is still
/// recorded so the UI stays where the user put it.
pub struct ZoomControl {
    camera: Arc<dyn Camera>,
    capability: Option<ZoomCapability>,
}

impl ZoomControl {
    /// Query the camera once
    pub fn negotiate(camera: Arc<dyn Camera>) -> Self {
        let capability = camera.zoom_capability();
        match &capability {
            Some(cap) => tracing::debug!(
                "Camera zoom {}..{} step {} at {}",
                cap.min,
                cap.max,
                cap.step,
                cap.level
            ),
            None => tracing::debug!("Camera does not expose zoom"),
        }
        Self { camera, capability }
    }

    pub fn capability(&self) -> Option<ZoomCapability> {
        self.capability
    }

    /// Apply a level, returning the capability after the change
    ///
    /// No-op returning `None` when the camera has no zoom.
    pub fn set(&mut self, level: f64) -> Option<ZoomCapability> {
        let cap = self.capability.as_mut()?;
        let value = cap.clamp(level);
        if let Err(e) = self.camera.apply_zoom(value) {
            tracing::debug!("Zoom not supported: {}", e);
        }
        cap.level = value;
        Some(*cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCamera;
    use proptest::prelude::*;

    #[test]
    fn clamp_snaps_to_step() {
        let cap = ZoomCapability::new(1.0, 5.0, 0.5, 1.0).unwrap();
        assert_eq!(cap.clamp(2.3), 2.5);
        assert_eq!(cap.clamp(0.2), 1.0);
        assert_eq!(cap.clamp(9.0), 5.0);
        assert_eq!(cap.clamp(f64::NAN), 1.0);
    }

    #[test]
    fn invalid_range_rejected() {
        assert!(ZoomCapability::new(3.0, 1.0, 0.1, 1.0).is_none());
        assert!(ZoomCapability::new(f64::NEG_INFINITY, 1.0, 0.1, 1.0).is_none());
    }

    #[test]
    fn device_error_is_swallowed() {
        let camera = FakeCamera::with_zoom(ZoomCapability::new(1.0, 4.0, 1.0, 1.0));
        camera.state.lock().zoom_fails = true;
        let mut control = ZoomControl::negotiate(camera.clone());

        let cap = control.set(3.2).unwrap();
        assert_eq!(cap.level, 3.0);
        assert_eq!(camera.state.lock().zoom_requests, vec![3.0]);
    }

    #[test]
    fn no_zoom_is_noop() {
        let camera = FakeCamera::with_zoom(None);
        let mut control = ZoomControl::negotiate(camera.clone());
        assert!(control.set(2.0).is_none());
        assert!(camera.state.lock().zoom_requests.is_empty());
    }

    proptest! {
        #[test]
        fn applied_zoom_is_always_in_range(
            min in 0.5f64..4.0,
            span in 0.0f64..10.0,
            step in 0.0f64..1.0,
            requests in proptest::collection::vec(-100.0f64..100.0, 1..20)
        ) {
            let camera = FakeCamera::with_zoom(ZoomCapability::new(min, min + span, step, min));
            let mut control = ZoomControl::negotiate(camera.clone());
            for level in requests {
                control.set(level);
            }
            for applied in camera.state.lock().zoom_requests.iter() {
                prop_assert!(*applied >= min && *applied <= min + span);
            }
        }
    }
}
