//! Wire protocol for the live endpoint and the one-shot analysis endpoint
//!
//! All messages are JSON. Outbound media travels as base64 blobs tagged with a
//! MIME type; inbound audio arrives as base64 PCM inside
//! `serverContent.modelTurn.parts[].inlineData`.

use serde::{Deserialize, Serialize};

/// MIME type of outbound microphone chunks
pub const PCM_16K_MIME: &str = "audio/pcm;rate=16000";

/// MIME type of outbound frames and snapshots
pub const JPEG_MIME: &str = "image/jpeg";

/// Kind of media carried by a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Image,
}

/// One discrete unit of encoded media sent in a single transport call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

impl MediaChunk {
    pub fn audio(data: String) -> Self {
        Self {
            mime_type: PCM_16K_MIME.to_string(),
            data,
        }
    }

    pub fn jpeg(data: String) -> Self {
        Self {
            mime_type: JPEG_MIME.to_string(),
            data,
        }
    }

    pub fn kind(&self) -> MediaKind {
        if self.mime_type.starts_with("image/") {
            MediaKind::Image
        } else {
            MediaKind::Audio
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// First message on a fresh connection
#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

impl SetupMessage {
    /// Audio-only response setup
    pub fn audio_only(model: &str, voice: &str, system_instruction: &str) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content::text(system_instruction),
            },
        }
    }
}

/// Streaming media input
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

impl RealtimeInputMessage {
    pub fn new(chunk: MediaChunk) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![chunk],
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Shared content types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaChunk>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    pub fn inline(chunk: MediaChunk) -> Self {
        Self {
            text: None,
            inline_data: Some(chunk),
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Any message from the live endpoint; unknown fields are ignored
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

/// What the transport hands to the controller for each inbound message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    /// Base64 24 kHz PCM, at most one per message
    pub audio: Option<String>,
    pub text: Option<String>,
    pub turn_complete: bool,
    pub interrupted: bool,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten into the controller-facing event, `None` for control messages
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let content = self.server_content?;
        let mut audio = None;
        let mut text: Option<String> = None;
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if audio.is_none() {
                    if let Some(blob) = part.inline_data {
                        if blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/") {
                            audio = Some(blob.data);
                        }
                    }
                }
                if let Some(t) = part.text {
                    text.get_or_insert_with(String::new).push_str(&t);
                }
            }
        }
        Some(InboundMessage {
            audio,
            text,
            turn_complete: content.turn_complete,
            interrupted: content.interrupted,
        })
    }
}

// ---------------------------------------------------------------------------
// One-shot analysis (REST generateContent)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

impl GenerateContentRequest {
    /// Image followed by its prompt, in one user turn
    pub fn image_with_prompt(jpeg_base64: String, prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::inline(MediaChunk::jpeg(jpeg_base64)), Part::text(prompt)],
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}
