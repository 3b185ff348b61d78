//! Wire messages of the live generate-content WebSocket.
//!
//! Only the fields this crate sends or reads are modelled; everything else
//! the service sends is ignored.

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use crate::transport::{AudioPayload, ResponseModality, SessionConfig, TransportEvent};
use crate::{AudioFrame, TransportError};

/// First message of every session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    pub response_modalities: Vec<&'static str>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TextPart {
    pub text: String,
}

impl SetupMessage {
    pub fn from_config(config: &SessionConfig) -> Self {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };
        let modality = match config.response_modality {
            ResponseModality::Audio => "AUDIO",
            ResponseModality::Text => "TEXT",
        };
        let system_instruction = (!config.system_instruction.is_empty()).then(|| Content {
            parts: vec![TextPart {
                text: config.system_instruction.clone(),
            }],
        });

        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec![modality],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: config.voice_name.clone(),
                            },
                        },
                    },
                },
                system_instruction,
            },
        }
    }

    pub fn to_message(&self) -> Result<Message, TransportError> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// One captured frame on its way to the model.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeInputMessage {
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: frame.mime_type.clone(),
                    data: frame.to_transport_text(),
                }],
            },
        }
    }

    pub fn to_message(&self) -> Result<Message, TransportError> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// Any message the server sends.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

impl ServerContent {
    /// Splits the content into ordered events.
    ///
    /// An interruption voids whatever the model said before it, so it is
    /// delivered ahead of audio carried in the same message.
    pub fn into_events(self) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        if self.interrupted {
            events.push(TransportEvent::Interrupted);
        }

        let parts = self.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for part in parts {
            let Some(inline) = part.inline_data else {
                continue;
            };
            let is_audio = inline
                .mime_type
                .as_deref()
                .map_or(true, |mime| mime.starts_with("audio/"));
            if is_audio {
                events.push(TransportEvent::Audio(AudioPayload {
                    data: inline.data,
                    mime_type: inline.mime_type,
                }));
            }
        }

        if self.turn_complete {
            events.push(TransportEvent::TurnComplete);
        }
        events
    }
}

/// What a single WebSocket message means for the session.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// The server accepted the setup message.
    SetupComplete,
    /// Events to deliver, in order.
    Events(Vec<TransportEvent>),
    /// Nothing to deliver.
    Ignored,
}

/// Interprets one WebSocket message.
pub(crate) fn decode_message(message: Message) -> Result<Inbound, TransportError> {
    let server: ServerMessage = match message {
        Message::Text(text) => serde_json::from_str(text.as_str())?,
        Message::Binary(bytes) => serde_json::from_slice(&bytes)?,
        Message::Close(frame) => {
            let event = match frame {
                Some(frame) if frame.code != CloseCode::Normal => TransportEvent::Error(format!(
                    "session closed with code {}: {}",
                    u16::from(frame.code),
                    frame.reason.as_str()
                )),
                _ => TransportEvent::Closed,
            };
            return Ok(Inbound::Events(vec![event]));
        }
        _ => return Ok(Inbound::Ignored),
    };

    if server.setup_complete.is_some() {
        return Ok(Inbound::SetupComplete);
    }
    if let Some(go_away) = server.go_away {
        tracing::warn!(%go_away, "server will close the session soon");
    }
    match server.server_content {
        Some(content) => Ok(Inbound::Events(content.into_events())),
        None => Ok(Inbound::Ignored),
    }
}
