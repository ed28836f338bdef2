//! Session Registry
//!
//! Process-wide concurrent map from call identifier to live session
//! handle, used for wire-event routing and teardown. Entries are inserted
//! on call start and must be removed on call end; a stale entry is a
//! resource leak.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use super::{SessionError, SessionState};

/// Control handle for one live call session.
///
/// The registry never touches the session's sockets; it can only signal
/// cancellation and observe state transitions.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub call_id: String,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn new(
        call_id: String,
        cancel: CancellationToken,
        state: watch::Receiver<SessionState>,
    ) -> Self {
        Self {
            call_id,
            cancel,
            state,
        }
    }

    /// Unconditional, immediate stop signal for this session only.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A fresh receiver for awaiting state transitions.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

/// Concurrent map `call_id -> SessionHandle`, lifecycle bound to process
/// uptime.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session. A duplicate call-start event is a protocol
    /// error, never a silent overwrite.
    pub async fn create(&self, handle: SessionHandle) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&handle.call_id) {
            return Err(SessionError::DuplicateCall(handle.call_id.clone()));
        }
        sessions.insert(handle.call_id.clone(), handle);
        Ok(())
    }

    pub async fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(call_id).cloned()
    }

    pub async fn remove(&self, call_id: &str) -> Option<SessionHandle> {
        let removed = self.sessions.write().await.remove(call_id);
        if removed.is_some() {
            tracing::debug!(call_id, "session removed from registry");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Route an explicit call-stop event. Unknown call ids are logged and
    /// dropped, never a crash.
    pub async fn stop_call(&self, call_id: &str) -> Result<(), SessionError> {
        match self.get(call_id).await {
            Some(handle) => {
                handle.stop();
                Ok(())
            }
            None => {
                tracing::warn!(call_id, "stop event for unknown call dropped");
                Err(SessionError::CallNotFound(call_id.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(call_id: &str) -> (SessionHandle, watch::Sender<SessionState>) {
        let (tx, rx) = watch::channel(SessionState::Connecting);
        (
            SessionHandle::new(call_id.to_string(), CancellationToken::new(), rx),
            tx,
        )
    }

    #[tokio::test]
    async fn test_create_get_remove() {
        let registry = SessionRegistry::new();
        let (h, _tx) = handle("MZ1");

        registry.create(h).await.unwrap();
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("MZ1").await.is_some());

        assert!(registry.remove("MZ1").await.is_some());
        assert!(registry.get("MZ1").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_a_protocol_error() {
        let registry = SessionRegistry::new();
        let (first, _tx1) = handle("MZ1");
        let (second, _tx2) = handle("MZ1");

        registry.create(first).await.unwrap();
        match registry.create(second).await {
            Err(SessionError::DuplicateCall(id)) => assert_eq!(id, "MZ1"),
            other => panic!("expected DuplicateCall, got {:?}", other),
        }
        // the original entry survives
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_stop_unknown_call_is_dropped() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.stop_call("nope").await,
            Err(SessionError::CallNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_cancels_only_that_session() {
        let registry = SessionRegistry::new();
        let (h1, _tx1) = handle("MZ1");
        let (h2, _tx2) = handle("MZ2");
        let c1 = h1.clone();
        let c2 = h2.clone();

        registry.create(h1).await.unwrap();
        registry.create(h2).await.unwrap();

        registry.stop_call("MZ1").await.unwrap();

        assert!(c1.cancel.is_cancelled());
        assert!(!c2.cancel.is_cancelled());
    }
}
