//! # Live Field Session
//!
//! Real-time bidirectional audio/video sessions with a live generative
//! endpoint, plus one-shot snapshot analysis.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              CLIENT                                     │
//! │  ┌─────────────┐        ┌─────────────┐          ┌─────────────┐        │
//! │  │ Microphone  │        │   Camera    │          │  Speakers   │        │
//! │  │  16 kHz f32 │        │  RGB frames │          │  24 kHz f32 │        │
//! │  └──────┬──────┘        └──────┬──────┘          └──────▲──────┘        │
//! │         │                      │                        │               │
//! │         ▼                      ▼                        │               │
//! │  ┌─────────────┐        ┌─────────────┐          ┌──────┴──────┐        │
//! │  │ PcmEncoder  │        │FrameSampler │          │  Playback   │        │
//! │  │ (codec)     │        │ 640x360 JPEG│          │  Scheduler  │        │
//! │  └──────┬──────┘        └──────┬──────┘          └──────▲──────┘        │
//! │         │   gate open?         │   gate open?           │ PcmDecoder    │
//! │         ▼                      ▼                        │               │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │           Session controller (session::controller)                │  │
//! │  │   ReconnectMachine · SessionGate per generation · status watch    │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │         │                                               ▲               │
//! │         ▼                                               │               │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │         Live transport (network::live) - one WebSocket            │  │
//! │  │     {"setup":…}  {"realtimeInput":{"mediaChunks":[…]}}             │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────┼───────────────────────────────────────┘
//!                                   │ wss
//!                                   ▼
//!                        Live generative endpoint
//! ```
//!
//! Snapshot scans (`snapshot`) take a still from the same camera and send it
//! over a separate HTTPS request.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod media;
pub mod network;
pub mod protocol;
pub mod session;
pub mod snapshot;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use session::{SessionController, SessionHandle, SessionStatus};
pub use snapshot::{ScanMode, ScanOutcome, ScanResult, SnapshotAnalyzer};

/// Application-wide constants
pub mod constants {
    /// Reconnect attempts after the initial one
    pub const MAX_RETRIES: u32 = 3;

    /// Backoff unit; attempt `n` waits `n` units
    pub const RETRY_UNIT_MS: u64 = 2000;

    /// Delay before the first connect of a session
    pub const WARMUP_MS: u64 = 200;

    /// Microphone sample rate sent upstream
    pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

    /// Frames per microphone block
    pub const CAPTURE_BLOCK_SIZE: usize = 4096;

    /// Sample rate of model audio
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

    /// Video frames per second
    pub const FRAME_RATE: f64 = 1.5;

    pub const FRAME_WIDTH: u32 = 640;
    pub const FRAME_HEIGHT: u32 = 360;

    /// JPEG quality of streamed frames
    pub const STREAM_JPEG_QUALITY: u8 = 50;

    /// JPEG quality of snapshot scans
    pub const SNAPSHOT_JPEG_QUALITY: u8 = 80;
}
