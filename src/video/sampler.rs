//! Periodic frame sampling for the live session

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::VideoConfig;
use crate::network::transport::Connection;
use crate::session::gate::SessionGate;
use crate::video::camera::Camera;
use crate::video::frame::VideoFrame;

/// What one sampler tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Sent,
    Paused,
    Inactive,
    NotReady,
    Dropped,
}

/// Sends a downsampled frame on every tick while the gate is open
pub struct FrameSampler {
    config: VideoConfig,
    camera: Arc<dyn Camera>,
    connection: Arc<dyn Connection>,
    gate: Arc<SessionGate>,
    paused: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
}

impl FrameSampler {
    pub fn new(
        config: VideoConfig,
        camera: Arc<dyn Camera>,
        connection: Arc<dyn Connection>,
        gate: Arc<SessionGate>,
        paused: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            camera,
            connection,
            gate,
            paused,
            frames_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of frames handed to the connection
    pub fn frames_sent(&self) -> Arc<AtomicU64> {
        self.frames_sent.clone()
    }

    /// Run on the current runtime until the gate closes or the task is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = interval(self.config.frame_interval());
        // A late tick is skipped, never queued
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(
            "Frame sampler started for generation {} every {:?}",
            self.gate.id(),
            self.config.frame_interval()
        );

        loop {
            ticker.tick().await;
            if self.tick() == TickOutcome::Inactive {
                break;
            }
        }

        tracing::debug!("Frame sampler for generation {} stopped", self.gate.id());
    }

    /// One sampling step
    pub fn tick(&self) -> TickOutcome {
        if !self.gate.is_active() {
            return TickOutcome::Inactive;
        }
        if self.paused.load(Ordering::Relaxed) {
            return TickOutcome::Paused;
        }
        if !self.camera.is_ready() {
            return TickOutcome::NotReady;
        }
        let Some(image) = self.camera.snapshot() else {
            return TickOutcome::NotReady;
        };

        let frame = match VideoFrame::downsampled(
            &image,
            self.config.width,
            self.config.height,
            self.config.jpeg_quality,
        ) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Frame compression failed: {}", e);
                return TickOutcome::Dropped;
            }
        };

        // Compression takes time; the session may have ended meanwhile
        if !self.gate.is_active() {
            return TickOutcome::Inactive;
        }

        match self.connection.send(frame.into_media()) {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                TickOutcome::Sent
            }
            Err(e) => {
                tracing::debug!("Dropping frame: {}", e);
                TickOutcome::Dropped
            }
        }
    }
}
