//! S2S wire protocol message types.
//!
//! This module defines the client and server event types for the speech-to-speech
//! session protocol. All events are JSON-encoded and sent over a persistent
//! WebSocket connection.
//!
//! # Protocol Overview
//!
//! Client events (sent to server, wrapped in an `event` envelope):
//! - sessionStart - Open a session with inference parameters
//! - promptStart - Open a prompt with voice/tool configuration
//! - contentStart - Open a TEXT or AUDIO content stream
//! - textInput - Text payload for an open TEXT stream
//! - audioInput - Base64 PCM16 payload for an open AUDIO stream
//! - contentEnd - Close a content stream
//!
//! An out-of-band `{"auth": {...}}` message performs device authentication.
//!
//! Server messages are either auth responses (`{"type": "auth_success"}` /
//! `{"type": "auth_failed", "error": ...}`) or `event` envelopes carrying any
//! combination of `usageEvent`, `textOutput`, `contentStart` and `audioOutput`.
//! Routing is by key presence: a single message may carry several recognized
//! signals and each is processed independently.

use serde::{Deserialize, Serialize};

/// Sample rate for protocol audio payloads (both directions), in Hz.
pub const PROTOCOL_SAMPLE_RATE: u32 = 16_000;

/// Bits per sample for protocol audio payloads.
pub const PROTOCOL_SAMPLE_SIZE_BITS: u32 = 16;

/// Channel count for protocol audio payloads.
pub const PROTOCOL_CHANNEL_COUNT: u32 = 1;

// =============================================================================
// Roles and Content Types
// =============================================================================

/// Role attached to a text content stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// System instructions
    System,
    /// User input
    User,
    /// Assistant output
    Assistant,
}

impl Role {
    /// Parse a wire role string. Unknown roles yield `None` so a message
    /// carrying one still gets its other signals processed.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SYSTEM" => Some(Role::System),
            "USER" => Some(Role::User),
            "ASSISTANT" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "SYSTEM"),
            Role::User => write!(f, "USER"),
            Role::Assistant => write!(f, "ASSISTANT"),
        }
    }
}

/// Content stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    /// Text sub-channel
    Text,
    /// Audio sub-channel
    Audio,
}

// =============================================================================
// Client Events
// =============================================================================

/// Envelope wrapping every client protocol event.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// The event body, externally tagged by event kind
    pub event: ClientEvent,
}

/// Client event bodies. Externally tagged so that serialization yields the
/// protocol's `{"sessionStart": {...}}` shape under the `event` key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientEvent {
    /// Open the session
    SessionStart(SessionStartEvent),
    /// Open a prompt
    PromptStart(PromptStartEvent),
    /// Open a content stream
    ContentStart(ContentStartEvent),
    /// Text payload
    TextInput(TextInputEvent),
    /// Audio payload
    AudioInput(AudioInputEvent),
    /// Close a content stream
    ContentEnd(ContentEndEvent),
}

/// Model inference parameters carried by `sessionStart`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    /// Maximum response tokens
    pub max_tokens: u32,
    /// Nucleus sampling parameter
    pub top_p: f32,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            top_p: 0.95,
            temperature: 0.7,
        }
    }
}

/// `sessionStart` event body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartEvent {
    /// Inference parameters for the session
    pub inference_configuration: InferenceConfig,
}

/// Text output configuration advertised in `promptStart`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOutputConfig {
    /// MIME type of text output
    pub media_type: &'static str,
}

impl Default for TextOutputConfig {
    fn default() -> Self {
        Self {
            media_type: "text/plain",
        }
    }
}

/// Audio output configuration advertised in `promptStart`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputConfig {
    /// MIME type of audio output
    pub media_type: &'static str,
    /// Output sample rate in Hz
    pub sample_rate_hertz: u32,
    /// Bits per sample
    pub sample_size_bits: u32,
    /// Channel count
    pub channel_count: u32,
    /// Voice identifier for synthesis
    pub voice_id: String,
    /// Payload encoding
    pub encoding: &'static str,
    /// Audio content category
    pub audio_type: &'static str,
}

impl AudioOutputConfig {
    /// Default output configuration for the given voice.
    pub fn for_voice(voice_id: impl Into<String>) -> Self {
        Self {
            media_type: "audio/lpcm",
            sample_rate_hertz: PROTOCOL_SAMPLE_RATE,
            sample_size_bits: PROTOCOL_SAMPLE_SIZE_BITS,
            channel_count: PROTOCOL_CHANNEL_COUNT,
            voice_id: voice_id.into(),
            encoding: "base64",
            audio_type: "SPEECH",
        }
    }
}

/// Tool-use output configuration advertised in `promptStart`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseOutputConfig {
    /// MIME type of tool-use payloads
    pub media_type: &'static str,
}

impl Default for ToolUseOutputConfig {
    fn default() -> Self {
        Self {
            media_type: "application/json",
        }
    }
}

/// `promptStart` event body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStartEvent {
    /// Prompt correlation id, unique per session
    pub prompt_name: String,
    /// Text output configuration
    pub text_output_configuration: TextOutputConfig,
    /// Audio output configuration (carries the voice id)
    pub audio_output_configuration: AudioOutputConfig,
    /// Tool-use output configuration
    pub tool_use_output_configuration: ToolUseOutputConfig,
    /// Caller-supplied tool configuration, passed through opaquely
    pub tool_configuration: serde_json::Value,
}

/// Text input configuration advertised in a TEXT `contentStart`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInputConfig {
    /// MIME type of text input
    pub media_type: &'static str,
}

impl Default for TextInputConfig {
    fn default() -> Self {
        Self {
            media_type: "text/plain",
        }
    }
}

/// Audio input configuration advertised in an AUDIO `contentStart`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInputConfig {
    /// MIME type of audio input
    pub media_type: &'static str,
    /// Input sample rate in Hz
    pub sample_rate_hertz: u32,
    /// Bits per sample
    pub sample_size_bits: u32,
    /// Channel count
    pub channel_count: u32,
    /// Audio content category
    pub audio_type: &'static str,
    /// Payload encoding
    pub encoding: &'static str,
}

impl Default for AudioInputConfig {
    fn default() -> Self {
        Self {
            media_type: "audio/lpcm",
            sample_rate_hertz: PROTOCOL_SAMPLE_RATE,
            sample_size_bits: PROTOCOL_SAMPLE_SIZE_BITS,
            channel_count: PROTOCOL_CHANNEL_COUNT,
            audio_type: "SPEECH",
            encoding: "base64",
        }
    }
}

/// `contentStart` event body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStartEvent {
    /// Owning prompt id
    pub prompt_name: String,
    /// Content correlation id, unique per prompt
    pub content_name: String,
    /// Stream type
    #[serde(rename = "type")]
    pub content_type: ContentType,
    /// Whether the stream participates in the live exchange
    pub interactive: bool,
    /// Role, for TEXT streams
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Text input configuration, for TEXT streams
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_input_configuration: Option<TextInputConfig>,
    /// Audio input configuration, for AUDIO streams
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input_configuration: Option<AudioInputConfig>,
}

/// `textInput` event body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInputEvent {
    /// Owning prompt id
    pub prompt_name: String,
    /// Target content stream id
    pub content_name: String,
    /// Full text payload
    pub content: String,
}

/// `audioInput` event body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInputEvent {
    /// Owning prompt id
    pub prompt_name: String,
    /// Target content stream id
    pub content_name: String,
    /// Base64-encoded little-endian PCM16 samples at 16 kHz
    pub content: String,
}

/// `contentEnd` event body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEndEvent {
    /// Owning prompt id
    pub prompt_name: String,
    /// Content stream id being closed
    pub content_name: String,
}

impl Envelope {
    /// Build a `sessionStart` event.
    pub fn session_start(inference: InferenceConfig) -> Self {
        Self {
            event: ClientEvent::SessionStart(SessionStartEvent {
                inference_configuration: inference,
            }),
        }
    }

    /// Build a `promptStart` event carrying the voice and tool configuration.
    pub fn prompt_start(
        prompt_name: impl Into<String>,
        voice_id: impl Into<String>,
        tool_configuration: serde_json::Value,
    ) -> Self {
        Self {
            event: ClientEvent::PromptStart(PromptStartEvent {
                prompt_name: prompt_name.into(),
                text_output_configuration: TextOutputConfig::default(),
                audio_output_configuration: AudioOutputConfig::for_voice(voice_id),
                tool_use_output_configuration: ToolUseOutputConfig::default(),
                tool_configuration,
            }),
        }
    }

    /// Build a TEXT `contentStart` event.
    pub fn content_start_text(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            event: ClientEvent::ContentStart(ContentStartEvent {
                prompt_name: prompt_name.into(),
                content_name: content_name.into(),
                content_type: ContentType::Text,
                interactive: true,
                role: Some(role),
                text_input_configuration: Some(TextInputConfig::default()),
                audio_input_configuration: None,
            }),
        }
    }

    /// Build an AUDIO `contentStart` event. The stream is left open for
    /// subsequent `audioInput` frames.
    pub fn content_start_audio(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
    ) -> Self {
        Self {
            event: ClientEvent::ContentStart(ContentStartEvent {
                prompt_name: prompt_name.into(),
                content_name: content_name.into(),
                content_type: ContentType::Audio,
                interactive: true,
                role: None,
                text_input_configuration: None,
                audio_input_configuration: Some(AudioInputConfig::default()),
            }),
        }
    }

    /// Build a `textInput` event.
    pub fn text_input(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            event: ClientEvent::TextInput(TextInputEvent {
                prompt_name: prompt_name.into(),
                content_name: content_name.into(),
                content: content.into(),
            }),
        }
    }

    /// Build an `audioInput` event from an already-encoded payload.
    pub fn audio_input(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
        base64_payload: String,
    ) -> Self {
        Self {
            event: ClientEvent::AudioInput(AudioInputEvent {
                prompt_name: prompt_name.into(),
                content_name: content_name.into(),
                content: base64_payload,
            }),
        }
    }

    /// Build a `contentEnd` event.
    pub fn content_end(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
    ) -> Self {
        Self {
            event: ClientEvent::ContentEnd(ContentEndEvent {
                prompt_name: prompt_name.into(),
                content_name: content_name.into(),
            }),
        }
    }

    /// Serialize into a JSON value for the outbound queue.
    pub fn into_value(self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

// =============================================================================
// Device Authentication
// =============================================================================

/// Device credentials for the out-of-band authentication handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCredentials {
    /// Device account username
    pub username: String,
    /// Device account password
    pub password: String,
    /// Device identifier; generated when absent
    pub device_id: String,
    /// Human-readable device name; generated when absent
    pub device_name: String,
}

/// Out-of-band `{"auth": {...}}` message.
#[derive(Debug, Clone, Serialize)]
pub struct AuthMessage {
    /// Credential payload
    pub auth: DeviceCredentials,
}

// =============================================================================
// Server Messages
// =============================================================================

/// Top-level inbound message. Auth responses carry a `type` discriminant;
/// protocol events arrive under the `event` key. Both shapes are tolerated on
/// the same message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerMessage {
    /// Auth response discriminant (`auth_success` / `auth_failed`)
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    /// Server-supplied failure reason
    pub error: Option<String>,
    /// Protocol event body
    pub event: Option<ServerEventBody>,
}

/// Inbound event body. Fields are independent signals routed by presence,
/// not variants of a discriminated union.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEventBody {
    /// Token usage report
    pub usage_event: Option<UsageEvent>,
    /// Full current text of a content stream
    pub text_output: Option<TextOutputEvent>,
    /// A new content stream opened by the server
    pub content_start: Option<InboundContentStart>,
    /// Base64 PCM16 audio chunk
    pub audio_output: Option<AudioOutputEvent>,
}

/// Inbound `usageEvent` payload. Missing counters default to zero.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    /// Input tokens consumed since the last report
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens produced since the last report
    #[serde(default)]
    pub output_tokens: u64,
}

/// Inbound `textOutput` payload. Carries the message's full current text,
/// not a delta. The role stays a raw string here: the backend relays model
/// events verbatim and unknown roles must not poison the envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOutputEvent {
    /// Target content stream id
    pub content_id: String,
    /// Speaker role, as sent on the wire
    pub role: Option<String>,
    /// Full current text
    #[serde(default)]
    pub content: String,
}

impl TextOutputEvent {
    /// The role, when it is one the console understands.
    pub fn known_role(&self) -> Option<Role> {
        self.role.as_deref().and_then(Role::parse)
    }
}

/// Inbound `contentStart` payload. Type and role are raw strings so streams
/// the console does not model (tool-use, for one) deserialize fine and fall
/// through to the no-op path.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundContentStart {
    /// New content stream id
    pub content_id: String,
    /// Stream type, as sent on the wire
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    /// Speaker role, as sent on the wire
    pub role: Option<String>,
}

impl InboundContentStart {
    /// True for TEXT streams, the only kind the transcript tracks.
    pub fn is_text(&self) -> bool {
        self.content_type.as_deref() == Some("TEXT")
    }

    /// The role, when it is one the console understands.
    pub fn known_role(&self) -> Option<Role> {
        self.role.as_deref().and_then(Role::parse)
    }
}

/// Inbound `audioOutput` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputEvent {
    /// Base64-encoded little-endian PCM16 samples
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_start_shape() {
        let value = Envelope::session_start(InferenceConfig::default())
            .into_value()
            .unwrap();
        assert_eq!(value["event"]["sessionStart"]["inferenceConfiguration"]["maxTokens"], 1024);
        let top_p = value["event"]["sessionStart"]["inferenceConfiguration"]["topP"]
            .as_f64()
            .unwrap();
        assert!((top_p - 0.95).abs() < 1e-6);
    }

    #[test]
    fn prompt_start_carries_voice_and_tools() {
        let tools = json!({"tools": []});
        let value = Envelope::prompt_start("prompt_1", "matthew", tools)
            .into_value()
            .unwrap();
        let body = &value["event"]["promptStart"];
        assert_eq!(body["promptName"], "prompt_1");
        assert_eq!(body["audioOutputConfiguration"]["voiceId"], "matthew");
        assert_eq!(body["audioOutputConfiguration"]["sampleRateHertz"], 16000);
        assert_eq!(body["toolConfiguration"]["tools"], json!([]));
    }

    #[test]
    fn content_start_text_shape() {
        let value = Envelope::content_start_text("p", "c", Role::System)
            .into_value()
            .unwrap();
        let body = &value["event"]["contentStart"];
        assert_eq!(body["type"], "TEXT");
        assert_eq!(body["role"], "SYSTEM");
        assert_eq!(body["interactive"], true);
        assert!(body.get("audioInputConfiguration").is_none());
    }

    #[test]
    fn content_start_audio_shape() {
        let value = Envelope::content_start_audio("p", "a").into_value().unwrap();
        let body = &value["event"]["contentStart"];
        assert_eq!(body["type"], "AUDIO");
        assert_eq!(body["audioInputConfiguration"]["sampleRateHertz"], 16000);
        assert_eq!(body["audioInputConfiguration"]["encoding"], "base64");
        assert!(body.get("role").is_none());
    }

    #[test]
    fn server_message_routes_by_key_presence() {
        // One message carrying two recognized signals
        let text = json!({
            "event": {
                "usageEvent": {"inputTokens": 10, "outputTokens": 5},
                "textOutput": {"contentId": "c1", "role": "ASSISTANT", "content": "Hi"}
            }
        })
        .to_string();
        let msg: ServerMessage = serde_json::from_str(&text).unwrap();
        let event = msg.event.unwrap();
        assert_eq!(event.usage_event.unwrap().input_tokens, 10);
        assert_eq!(event.text_output.unwrap().content_id, "c1");
        assert!(event.content_start.is_none());
        assert!(event.audio_output.is_none());
    }

    #[test]
    fn unmodeled_content_start_does_not_poison_the_message() {
        // The backend relays raw model events; a tool-use contentStart must
        // still deserialize and leave co-present signals usable.
        let text = json!({
            "event": {
                "contentStart": {"contentId": "t1", "type": "TOOL", "role": "TOOL"},
                "usageEvent": {"inputTokens": 5, "outputTokens": 2}
            }
        })
        .to_string();
        let msg: ServerMessage = serde_json::from_str(&text).unwrap();
        let event = msg.event.unwrap();
        let start = event.content_start.unwrap();
        assert!(!start.is_text());
        assert!(start.known_role().is_none());
        assert_eq!(event.usage_event.unwrap().input_tokens, 5);
    }

    #[test]
    fn auth_responses_parse() {
        let ok: ServerMessage = serde_json::from_str(r#"{"type": "auth_success"}"#).unwrap();
        assert_eq!(ok.message_type.as_deref(), Some("auth_success"));

        let failed: ServerMessage =
            serde_json::from_str(r#"{"type": "auth_failed", "error": "Invalid credentials"}"#)
                .unwrap();
        assert_eq!(failed.message_type.as_deref(), Some("auth_failed"));
        assert_eq!(failed.error.as_deref(), Some("Invalid credentials"));
    }

    #[test]
    fn usage_event_defaults_missing_counters() {
        let event: UsageEvent = serde_json::from_str(r#"{"inputTokens": 3}"#).unwrap();
        assert_eq!(event.input_tokens, 3);
        assert_eq!(event.output_tokens, 0);
    }
}
