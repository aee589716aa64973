//! JSON wire protocol of the live voice service (`BidiGenerateContent`).
//!
//! The client sends one `setup` frame, then a stream of `realtimeInput`
//! frames. The server answers `setupComplete`, then `serverContent` frames
//! carrying transcription deltas, audio deltas and turn boundaries.

use crate::audio::capture::OutboundChunk;
use crate::config::SessionConfig;
use crate::error::{LiveError, Result};
use serde::{Deserialize, Serialize};

/// Response modality requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

/// Connection parameters, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub response_modality: Modality,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub system_instruction: Option<String>,
}

impl SessionSetup {
    /// Audio responses with both directions transcribed.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            response_modality: Modality::Audio,
            input_transcription: true,
            output_transcription: true,
            system_instruction: config
                .system_instruction
                .clone()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    /// The `setup` frame announcing these parameters.
    pub fn to_message(&self) -> ClientMessage {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        ClientMessage::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![self.response_modality],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                },
            },
            input_audio_transcription: self.input_transcription.then_some(TranscriptionConfig {}),
            output_audio_transcription: self
                .output_transcription
                .then_some(TranscriptionConfig {}),
            system_instruction: self.system_instruction.as_ref().map(|text| Content {
                parts: vec![Part {
                    text: Some(text.clone()),
                    inline_data: None,
                }],
            }),
        })
    }
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Wrap one captured chunk as realtime input.
    pub fn audio(chunk: &OutboundChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: chunk.mime_type.clone(),
                data: chunk.data.clone(),
            }],
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| LiveError::Protocol {
            message: format!("Failed to serialize client frame: {}", e),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Empty object enabling transcription for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Frames sent by the server. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub input_transcription: Option<TranscriptionText>,
    #[serde(default)]
    pub output_transcription: Option<TranscriptionText>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TranscriptionText {
    #[serde(default)]
    pub text: Option<String>,
}

/// Notice that the server will close the connection soon.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// One inbound signal, in the order it must be handled.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Fragment of the user's recognized speech.
    InputTranscription(String),
    /// Fragment of the model's spoken response.
    OutputTranscription(String),
    /// Base64 16-bit PCM at the output rate.
    Audio(String),
    /// The user barged in; queued model audio is stale.
    Interrupted,
    /// Turn boundary.
    TurnComplete,
}

impl ServerMessage {
    /// Parse a text or binary frame.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| LiveError::Protocol {
            message: format!("Failed to parse server frame: {}", e),
        })
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten the frame into events.
    ///
    /// Order: input transcription, output transcription, audio parts,
    /// interrupted, turn complete. A frame carrying both audio and
    /// `turnComplete` therefore schedules the audio before closing the turn.
    pub fn into_events(self) -> Vec<ServerEvent> {
        let Some(content) = self.server_content else {
            return Vec::new();
        };

        let mut events = Vec::new();
        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            events.push(ServerEvent::InputTranscription(text));
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            events.push(ServerEvent::OutputTranscription(text));
        }
        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .filter(|blob| blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/"))
                    .filter(|blob| !blob.data.is_empty())
                    .map(|blob| ServerEvent::Audio(blob.data)),
            );
        }
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
        events
    }
}
