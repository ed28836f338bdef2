//! Carrier media-stream protocol
//!
//! The carrier delivers call audio over a bidirectional WebSocket carrying
//! JSON envelopes: `start` (call identity and stream parameters), `media`
//! (base64 µ-law payload), `stop`. We send back `media` frames in
//! ≤160-byte payload chunks plus `clear` when queued audio must be
//! discarded (barge-in).

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Inbound envelope from the carrier socket.
///
/// Unrecognized event kinds land in `Unknown` so a protocol addition on
/// the carrier side is logged and dropped instead of killing the call.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CarrierEnvelope {
    /// Socket-level hello, informational only
    Connected,
    /// Stream start: carries the call identifier and stream parameters
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: Option<String>,
        start: StreamStart,
    },
    /// One media frame of base64 µ-law audio
    Media { media: MediaPayload },
    /// Stream end
    Stop,
    #[serde(other)]
    Unknown,
}

impl CarrierEnvelope {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Payload of the `start` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    #[serde(default)]
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    /// Per-call parameters supplied by the dial webhook (caller/callee)
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StreamStart {
    /// The call identifier: the stream SID, falling back to the call SID.
    pub fn call_id(&self) -> Option<&str> {
        self.stream_sid
            .as_deref()
            .or(self.call_sid.as_deref())
    }

    pub fn caller_number(&self) -> Option<&str> {
        self.custom_parameters.get("from").map(String::as_str)
    }

    pub fn callee_number(&self) -> Option<&str> {
        self.custom_parameters.get("to").map(String::as_str)
    }
}

/// Payload of an inbound `media` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded µ-law 8kHz bytes
    pub payload: String,
}

/// Outbound `media` frame sent to the carrier, one per ~20ms.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMediaFrame {
    pub event: &'static str,
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    pub media: OutboundMedia,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    pub track: &'static str,
    /// Sequential frame index, stringly typed on the wire
    pub chunk: String,
    /// Milliseconds since epoch, stringly typed on the wire
    pub timestamp: String,
    /// Base64-encoded µ-law 8kHz bytes, at most 160 of them
    pub payload: String,
}

impl OutboundMediaFrame {
    pub fn new(stream_sid: &str, chunk_index: u64, payload: String) -> Self {
        Self {
            event: "media",
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                track: "outbound",
                chunk: chunk_index.to_string(),
                timestamp: Utc::now().timestamp_millis().to_string(),
                payload,
            },
        }
    }
}

/// Outbound `clear` event: tells the carrier to drop any buffered audio.
#[derive(Debug, Clone, Serialize)]
pub struct ClearFrame {
    pub event: &'static str,
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
}

impl ClearFrame {
    pub fn new(stream_sid: &str) -> Self {
        Self {
            event: "clear",
            stream_sid: stream_sid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let text = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ1234",
            "start": {
                "streamSid": "MZ1234",
                "callSid": "CA5678",
                "customParameters": {"from": "+15550001111", "to": "+15551230000"}
            }
        }"#;

        match CarrierEnvelope::parse(text).unwrap() {
            CarrierEnvelope::Start { stream_sid, start } => {
                assert_eq!(stream_sid.as_deref(), Some("MZ1234"));
                assert_eq!(start.call_id(), Some("MZ1234"));
                assert_eq!(start.caller_number(), Some("+15550001111"));
                assert_eq!(start.callee_number(), Some("+15551230000"));
            }
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_media_and_stop() {
        let media = r#"{"event":"media","media":{"track":"inbound","chunk":"2","timestamp":"160","payload":"//8="}}"#;
        assert!(matches!(
            CarrierEnvelope::parse(media).unwrap(),
            CarrierEnvelope::Media { .. }
        ));

        let stop = r#"{"event":"stop","stop":{"callSid":"CA5678"}}"#;
        assert!(matches!(CarrierEnvelope::parse(stop).unwrap(), CarrierEnvelope::Stop));
    }

    #[test]
    fn test_unknown_event_is_tolerated() {
        let mark = r#"{"event":"mark","mark":{"name":"x"}}"#;
        assert!(matches!(CarrierEnvelope::parse(mark).unwrap(), CarrierEnvelope::Unknown));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(CarrierEnvelope::parse("{nope").is_err());
    }

    #[test]
    fn test_outbound_frame_shape() {
        let frame = OutboundMediaFrame::new("MZ1234", 7, "AAAA".to_string());
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "MZ1234");
        assert_eq!(json["media"]["track"], "outbound");
        assert_eq!(json["media"]["chunk"], "7");
        assert_eq!(json["media"]["payload"], "AAAA");
        // timestamp is a decimal string
        assert!(json["media"]["timestamp"]
            .as_str()
            .unwrap()
            .chars()
            .all(|c| c.is_ascii_digit()));
    }
}
