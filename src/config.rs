//! Application configuration
//!
//! Loaded from `config.toml` in the platform config directory, falling back
//! to built-in defaults. The API key is never stored here; it comes from the
//! environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Environment variables consulted for the API key, in order
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub live: LiveConfig,
    pub retry: RetryConfig,
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub snapshot: SnapshotConfig,
}

/// Streaming endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket endpoint of the bidirectional generate service
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// How long to wait for the setup acknowledgement
    pub setup_timeout_ms: u64,
    /// Outbound queue depth; chunks beyond this are dropped
    pub send_queue: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice: "Kore".to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            setup_timeout_ms: 10_000,
            send_queue: 64,
        }
    }
}

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are AgriVision, a friendly AI agronomist assistant. \
You are looking at a video feed from a farmer's camera. \
Identify plants, pests, and soil conditions you see. \
Offer concise, practical, and eco-friendly farming advice. \
If you see soil, describe its likely composition and health. \
Keep your responses short and conversational.";

/// Reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay before the very first connect
    pub warmup_ms: u64,
    /// Backoff unit; retry `n` waits `n * unit`
    pub unit_ms: u64,
    /// Upper bound on any single backoff
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            warmup_ms: WARMUP_MS,
            unit_ms: RETRY_UNIT_MS,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    /// Backoff before reconnect attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = self.unit_ms.saturating_mul(attempt as u64).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Audio pipe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_rate: u32,
    pub block_size: usize,
    pub playback_rate: u32,
    /// Device identifiers as reported by device listing; `None` = default
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_rate: CAPTURE_SAMPLE_RATE,
            block_size: CAPTURE_BLOCK_SIZE,
            playback_rate: PLAYBACK_SAMPLE_RATE,
            input_device: None,
            output_device: None,
        }
    }
}

/// Frame sampler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub frame_interval_ms: u64,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub camera_index: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: (1000.0 / FRAME_RATE) as u64,
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            jpeg_quality: STREAM_JPEG_QUALITY,
            camera_index: 0,
        }
    }
}

impl VideoConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// One-shot analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Base URL of the generate-content REST API
    pub endpoint: String,
    pub model: String,
    pub jpeg_quality: u8,
    pub timeout_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            model: "gemini-3-pro-preview".to_string(),
            jpeg_quality: SNAPSHOT_JPEG_QUALITY,
            timeout_ms: 60_000,
        }
    }
}

impl AppConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "agrivision", "live-field-session")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.block_size == 0 {
            return Err(Error::Config("audio.block_size must be > 0".into()));
        }
        if self.audio.capture_rate == 0 || self.audio.playback_rate == 0 {
            return Err(Error::Config("sample rates must be > 0".into()));
        }
        if self.video.frame_interval_ms == 0 {
            return Err(Error::Config("video.frame_interval_ms must be > 0".into()));
        }
        if self.video.width == 0 || self.video.height == 0 {
            return Err(Error::Config("video frame size must be non-zero".into()));
        }
        for q in [self.video.jpeg_quality, self.snapshot.jpeg_quality] {
            if q == 0 || q > 100 {
                return Err(Error::Config(format!("jpeg quality {} out of 1..=100", q)));
            }
        }
        if self.retry.unit_ms == 0 {
            return Err(Error::Config("retry.unit_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Read the API key from the environment
pub fn api_key_from_env() -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|key| !key.trim().is_empty())
}
