//! PCM16 encoder for outbound microphone audio
//!
//! Quantizes float samples to signed 16-bit little-endian PCM and wraps the
//! bytes in base64 for the JSON transport.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::constants::CAPTURE_SAMPLE_RATE;
use crate::protocol::MediaChunk;

/// Quantize one float sample to i16: `round(s * 32768)` clamped to range
#[inline]
pub fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encode a block of samples straight to a base64 payload
pub fn encode_pcm16(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&quantize(s).to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// One encoded block of outbound audio
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Quantized mono samples
    pub samples: Vec<i16>,
    /// Base64 of the little-endian sample bytes
    pub encoded_payload: String,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn into_media(self) -> MediaChunk {
        MediaChunk::audio(self.encoded_payload)
    }
}

/// Stateless apart from statistics; one chunk per input block
pub struct PcmEncoder {
    sample_rate: u32,
    /// Reused quantization buffer
    byte_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl PcmEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            byte_buffer: Vec::new(),
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode one capture block. No state carries across blocks.
    pub fn encode(&mut self, block: &[f32]) -> AudioChunk {
        let samples: Vec<i16> = block.iter().map(|&s| quantize(s)).collect();

        self.byte_buffer.clear();
        self.byte_buffer.reserve(samples.len() * 2);
        for s in &samples {
            self.byte_buffer.extend_from_slice(&s.to_le_bytes());
        }
        let encoded_payload = BASE64.encode(&self.byte_buffer);

        self.frames_encoded += 1;
        self.bytes_produced += self.byte_buffer.len() as u64;

        AudioChunk {
            samples,
            encoded_payload,
            sample_rate: self.sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

impl Default for PcmEncoder {
    fn default() -> Self {
        Self::new(CAPTURE_SAMPLE_RATE)
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}
