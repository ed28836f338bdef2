//! Remote speech-to-speech AI service integration
//!
//! - Wire protocol types for the session handshake and audio relay
//! - Connection management: auth headers, heartbeat, bounded reconnect

pub mod connection;
pub mod protocol;

pub use connection::{AiSocket, ConnectionManager, ReconnectPolicy};
pub use protocol::{
    AppendAudio, GreetingTrigger, RealtimeEvent, SessionUpdate, TurnDetection, AUDIO_FORMAT,
};

use thiserror::Error;

/// AI-service errors
#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("AI service API key is not configured")]
    MissingApiKey,

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Json(#[from] serde_json::Error),
}
