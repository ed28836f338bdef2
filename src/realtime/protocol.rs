//! Wire protocol for the speech-to-speech AI service
//!
//! Control messages we send (session configuration, audio append, greeting
//! trigger) and the event envelopes we receive. Audio travels as base64
//! 16-bit linear PCM at 24kHz in both directions.

use serde::{Deserialize, Serialize};

/// Audio format tag required by the service.
pub const AUDIO_FORMAT: &str = "pcm16";

/// Voice-activity-detection parameters for server-side turn taking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f64,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            kind: "server_vad".to_string(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// The `session.update` configure message sent right after the socket
/// opens, before any audio.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdate {
    #[serde(rename = "type")]
    kind: &'static str,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub modalities: Vec<&'static str>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: &'static str,
    pub output_audio_format: &'static str,
    pub input_audio_transcription: InputAudioTranscription,
    pub turn_detection: TurnDetection,
}

impl SessionUpdate {
    pub fn new(
        instructions: &str,
        voice: &str,
        transcription_model: &str,
        turn_detection: TurnDetection,
    ) -> Self {
        Self {
            kind: "session.update",
            session: SessionConfig {
                modalities: vec!["text", "audio"],
                instructions: instructions.to_string(),
                voice: voice.to_string(),
                input_audio_format: AUDIO_FORMAT,
                output_audio_format: AUDIO_FORMAT,
                input_audio_transcription: InputAudioTranscription {
                    model: transcription_model.to_string(),
                },
                turn_detection,
            },
        }
    }
}

/// One chunk of caller audio appended to the service's input buffer.
#[derive(Debug, Clone, Serialize)]
pub struct AppendAudio {
    #[serde(rename = "type")]
    kind: &'static str,
    /// Base64-encoded linear PCM 24kHz bytes
    pub audio: String,
}

impl AppendAudio {
    pub fn new(audio_b64: String) -> Self {
        Self {
            kind: "input_audio_buffer.append",
            audio: audio_b64,
        }
    }
}

/// Greeting trigger: asks the service to speak first.
#[derive(Debug, Clone, Serialize)]
pub struct GreetingTrigger {
    #[serde(rename = "type")]
    kind: &'static str,
    pub response: GreetingInstructions,
}

#[derive(Debug, Clone, Serialize)]
pub struct GreetingInstructions {
    pub instructions: String,
}

impl GreetingTrigger {
    pub fn new(greeting: &str) -> Self {
        Self {
            kind: "response.create",
            response: GreetingInstructions {
                instructions: format!("Greet the caller by saying exactly: \"{}\"", greeting),
            },
        }
    }
}

/// Events received from the service.
///
/// Anything outside this list is a protocol addition we don't act on;
/// `Unknown` lets the session log and drop it.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded linear PCM 24kHz bytes
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "error")]
    ServiceError {
        #[serde(default)]
        error: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

impl RealtimeEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
