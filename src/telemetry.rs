//! Telemetry/Transcript sink
//!
//! Transcript deltas and turn-detection marks are forwarded to an external
//! collaborator. Delivery is fire-and-forget: a slow or broken sink must
//! never affect call audio, so HTTP posts happen on detached tasks and
//! failures are only logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;

/// One telemetry record for a call.
#[derive(Debug, Clone, Serialize)]
pub struct CallTelemetry {
    pub call_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TelemetryKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryKind {
    /// Partial AI speech transcript
    AgentTranscriptDelta { text: String },
    /// Completed transcription of a caller utterance
    CallerTranscript { text: String },
    /// Caller started speaking (VAD)
    SpeechStarted,
    /// Caller stopped speaking (VAD)
    SpeechStopped,
    /// Session lifecycle marker (started, streaming, closed)
    Lifecycle { state: String },
}

impl CallTelemetry {
    pub fn now(call_id: &str, kind: TelemetryKind) -> Self {
        Self {
            call_id: call_id.to_string(),
            at: Utc::now(),
            kind,
        }
    }
}

/// Destination for telemetry records.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish(&self, record: CallTelemetry);
}

/// Posts records to the record-management service.
#[derive(Clone)]
pub struct HttpTelemetrySink {
    client: Client,
    url: String,
    api_key: String,
}

impl HttpTelemetrySink {
    pub fn new(url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn publish(&self, record: CallTelemetry) {
        let client = self.client.clone();
        let url = self.url.clone();
        let api_key = self.api_key.clone();

        // Detached: the session never waits on the sink.
        tokio::spawn(async move {
            let result = client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&record)
                .send()
                .await;

            match result {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(
                        call_id = %record.call_id,
                        status = %response.status(),
                        "telemetry sink rejected record"
                    );
                }
                Err(e) => {
                    tracing::warn!(call_id = %record.call_id, "telemetry post failed: {}", e);
                }
                _ => {}
            }
        });
    }
}

/// Logs records via tracing when no sink URL is configured.
#[derive(Clone, Default)]
pub struct LogTelemetrySink;

#[async_trait]
impl TelemetrySink for LogTelemetrySink {
    async fn publish(&self, record: CallTelemetry) {
        match &record.kind {
            TelemetryKind::AgentTranscriptDelta { text } => {
                tracing::debug!(call_id = %record.call_id, "agent transcript: {}", text)
            }
            TelemetryKind::CallerTranscript { text } => {
                tracing::info!(call_id = %record.call_id, "caller said: {}", text)
            }
            TelemetryKind::SpeechStarted => {
                tracing::debug!(call_id = %record.call_id, "caller speech started")
            }
            TelemetryKind::SpeechStopped => {
                tracing::debug!(call_id = %record.call_id, "caller speech stopped")
            }
            TelemetryKind::Lifecycle { state } => {
                tracing::info!(call_id = %record.call_id, "session {}", state)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization() {
        let record = CallTelemetry::now(
            "MZ1",
            TelemetryKind::CallerTranscript {
                text: "hello".to_string(),
            },
        );
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["call_id"], "MZ1");
        assert_eq!(json["kind"], "caller_transcript");
        assert_eq!(json["text"], "hello");
    }

    #[tokio::test]
    async fn test_log_sink_never_errors() {
        let sink = LogTelemetrySink;
        sink.publish(CallTelemetry::now("MZ1", TelemetryKind::SpeechStarted))
            .await;
    }
}
