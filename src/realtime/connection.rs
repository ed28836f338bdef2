//! AI-service socket liveness
//!
//! The connection manager owns everything about reaching the remote
//! service: authentication headers on connect, the heartbeat cadence, and
//! the bounded-backoff reconnect policy. It knows nothing about call
//! business state; the session decides when to give up on a call.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::RealtimeError;

/// An established socket to the AI service.
pub type AiSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect policy: delay grows linearly with the attempt number and the
/// attempt count is capped. A call that cannot reach the AI service after
/// the cap cannot usefully continue.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before the given attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Establishes authenticated sockets to the AI service.
#[derive(Clone)]
pub struct ConnectionManager {
    url: String,
    api_key: String,
    pub policy: ReconnectPolicy,
    pub heartbeat_interval: Duration,
}

impl ConnectionManager {
    pub fn new(url: String, api_key: String) -> Self {
        Self {
            url,
            api_key,
            policy: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Open one socket to the service with the required protocol headers.
    ///
    /// A missing API key is fatal: the caller must not retry, the call
    /// cannot be serviced at all.
    pub async fn connect(&self) -> Result<AiSocket, RealtimeError> {
        if self.api_key.trim().is_empty() {
            return Err(RealtimeError::MissingApiKey);
        }

        let mut request = self.url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| RealtimeError::Connect(format!("invalid authorization header: {}", e)))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (socket, response) = connect_async(request).await?;
        tracing::debug!(status = %response.status(), url = %self.url, "AI service socket open");

        Ok(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_linearly() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };

        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_fatal() {
        let manager = ConnectionManager::new("ws://127.0.0.1:1/v1/realtime".to_string(), "".to_string());
        match manager.connect().await {
            Err(RealtimeError::MissingApiKey) => {}
            other => panic!("expected MissingApiKey, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_connect_error() {
        // Port 1 is essentially guaranteed closed.
        let manager =
            ConnectionManager::new("ws://127.0.0.1:1/v1/realtime".to_string(), "key".to_string());
        assert!(manager.connect().await.is_err());
    }
}
