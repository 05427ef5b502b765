//! Still frames compressed for transmission

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::CodecError;
use crate::protocol::MediaChunk;

/// One JPEG-compressed frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub jpeg_bytes: Bytes,
    pub capture_timestamp: DateTime<Utc>,
}

impl VideoFrame {
    /// Compress `image` at its own resolution
    pub fn encode(image: &RgbImage, quality: u8) -> Result<Self, CodecError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(CodecError::Empty);
        }
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
            .encode_image(image)
            .map_err(|e| CodecError::ImageEncoding(e.to_string()))?;

        Ok(Self {
            width: image.width(),
            height: image.height(),
            jpeg_bytes: Bytes::from(jpeg),
            capture_timestamp: Utc::now(),
        })
    }

    /// Scale `image` to exactly `width`×`height`, then compress
    pub fn downsampled(
        image: &RgbImage,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<Self, CodecError> {
        if image.width() == width && image.height() == height {
            return Self::encode(image, quality);
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(CodecError::Empty);
        }
        let scaled = imageops::resize(image, width, height, FilterType::Triangle);
        Self::encode(&scaled, quality)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.jpeg_bytes)
    }

    pub fn into_media(self) -> MediaChunk {
        MediaChunk::jpeg(self.to_base64())
    }
}
