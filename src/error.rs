//! Error types for the live session streamer

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session controller has shut down")]
    ControllerGone,
}

/// Microphone, camera and speaker errors
#[derive(Error, Debug, Clone)]
pub enum DeviceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Output suspended and could not be resumed: {0}")]
    ResumeFailed(String),

    #[error("Control not supported: {0}")]
    Unsupported(String),

    #[error("Device has been closed")]
    Closed,
}

/// PCM and image codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Odd PCM payload length: {0} bytes")]
    OddLength(usize),

    #[error("Empty payload")]
    Empty,

    #[error("Image encoding failed: {0}")]
    ImageEncoding(String),
}

/// Transport errors
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Endpoint rejected the session: {0}")]
    Rejected(String),

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection is not open")]
    NotOpen,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout")]
    Timeout,
}

/// One-shot snapshot analysis errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("A scan is already in progress")]
    Busy,

    #[error("No video frame available")]
    NoFrame,

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Malformed response: {0}")]
    Response(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
