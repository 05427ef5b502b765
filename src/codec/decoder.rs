//! PCM16 decoder for inbound synthesized audio
//!
//! Payloads are base64 of signed 16-bit little-endian mono PCM at 24 kHz.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::audio::buffer::PlaybackBuffer;
use crate::constants::PLAYBACK_SAMPLE_RATE;
use crate::error::CodecError;

/// Decode raw little-endian PCM16 bytes to float samples
pub fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Decoder producing playable buffers
pub struct PcmDecoder {
    sample_rate: u32,
    channels: u16,
    buffers_decoded: u64,
    buffers_dropped: u64,
    samples_produced: u64,
}

impl PcmDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            buffers_decoded: 0,
            buffers_dropped: 0,
            samples_produced: 0,
        }
    }

    /// Decode one base64 payload into a playback buffer
    pub fn decode(&mut self, payload: &str) -> Result<PlaybackBuffer, CodecError> {
        let result = BASE64
            .decode(payload.trim())
            .map_err(CodecError::from)
            .and_then(|bytes| pcm16_to_f32(&bytes));

        match result {
            Ok(samples) => {
                self.buffers_decoded += 1;
                self.samples_produced += samples.len() as u64;
                Ok(PlaybackBuffer::new(samples, self.sample_rate, self.channels))
            }
            Err(e) => {
                self.buffers_dropped += 1;
                Err(e)
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            buffers_decoded: self.buffers_decoded,
            buffers_dropped: self.buffers_dropped,
            samples_produced: self.samples_produced,
        }
    }
}

impl Default for PcmDecoder {
    fn default() -> Self {
        Self::new(PLAYBACK_SAMPLE_RATE, 1)
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub buffers_decoded: u64,
    pub buffers_dropped: u64,
    pub samples_produced: u64,
}
