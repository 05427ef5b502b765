//! PCM16 codec
//!
//! Outbound microphone audio is quantized to 16 kHz PCM16 and base64
//! encoded; inbound 24 kHz PCM16 is decoded back to float playback buffers.

pub mod encoder;
pub mod decoder;

pub use encoder::{AudioChunk, PcmEncoder};
pub use decoder::PcmDecoder;
