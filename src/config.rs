//! Bridge configuration
//!
//! Everything is environment-driven. A missing AI API key does not stop
//! the process from starting (health checks and the carrier endpoint stay
//! up); it makes each session fail fatally at start instead, which closes
//! the carrier leg immediately.

use std::time::Duration;

/// Process-wide bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Port for the carrier-facing HTTP/WebSocket listener
    pub port: u16,

    /// AI service API key (fatal per-session when absent)
    pub ai_api_key: String,

    /// Full WebSocket URL of the AI realtime endpoint
    pub realtime_url: String,

    /// Transcription model requested in the session handshake
    pub transcription_model: String,

    /// Server-VAD turn detection knobs
    pub vad_threshold: f64,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,

    /// Configuration Provider endpoint (None: every lookup misses and the
    /// built-in default config is used)
    pub provider_base_url: Option<String>,
    pub provider_api_key: String,

    /// Telemetry sink endpoint (None: records go to the log)
    pub telemetry_url: Option<String>,

    /// Reconnect policy for the AI socket
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,

    /// Heartbeat ping cadence on the AI socket
    pub heartbeat_interval: Duration,
}

const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            ai_api_key: String::new(),
            realtime_url: format!(
                "wss://api.openai.com/v1/realtime?model={}",
                DEFAULT_REALTIME_MODEL
            ),
            transcription_model: "whisper-1".to_string(),
            vad_threshold: 0.5,
            vad_prefix_padding_ms: 300,
            vad_silence_duration_ms: 500,
            provider_base_url: None,
            provider_api_key: String::new(),
            telemetry_url: None,
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl BridgeConfig {
    /// Build configuration from environment variables, with defaults for
    /// everything except credentials.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let realtime_url = std::env::var("REALTIME_URL").unwrap_or_else(|_| {
            let model = std::env::var("REALTIME_MODEL")
                .unwrap_or_else(|_| DEFAULT_REALTIME_MODEL.to_string());
            format!("wss://api.openai.com/v1/realtime?model={}", model)
        });

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            ai_api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            realtime_url,
            transcription_model: std::env::var("TRANSCRIPTION_MODEL")
                .unwrap_or(defaults.transcription_model),
            vad_threshold: std::env::var("VAD_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.vad_threshold),
            vad_prefix_padding_ms: std::env::var("VAD_PREFIX_PADDING_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.vad_prefix_padding_ms),
            vad_silence_duration_ms: std::env::var("VAD_SILENCE_DURATION_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.vad_silence_duration_ms),
            provider_base_url: std::env::var("CONFIG_PROVIDER_URL").ok(),
            provider_api_key: std::env::var("CONFIG_PROVIDER_API_KEY").unwrap_or_default(),
            telemetry_url: std::env::var("TELEMETRY_URL").ok(),
            max_reconnect_attempts: std::env::var("MAX_RECONNECT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_base_delay: std::env::var("RECONNECT_BASE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_base_delay),
            heartbeat_interval: std::env::var("HEARTBEAT_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
        }
    }

    /// Sanity-check the knobs that would silently break the relay.
    pub fn validate(&self) -> Result<(), String> {
        if self.realtime_url.is_empty() {
            return Err("realtime URL is required".to_string());
        }
        if self.max_reconnect_attempts == 0 {
            return Err("max reconnect attempts must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err("VAD threshold must be between 0.0 and 1.0".to_string());
        }
        if self.heartbeat_interval.is_zero() {
            return Err("heartbeat interval must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(BridgeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_vad_threshold_rejected() {
        let config = BridgeConfig {
            vad_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = BridgeConfig {
            max_reconnect_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
