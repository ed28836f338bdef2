//! Call Session
//!
//! One session per active phone call. The session owns both legs — the
//! carrier media stream (fed to it as a channel by the WebSocket adapter)
//! and the AI-service socket — and runs the handshake state machine plus
//! the duplex audio relay in a single event loop, so every state mutation
//! has exactly one writer.

pub mod registry;


pub use registry::{SessionHandle, SessionRegistry};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::audio;
use crate::carrier::{ClearFrame, OutboundMediaFrame};
use crate::provider::{AgentConfig, AgentConfigProvider};
use crate::realtime::{
    AiSocket, AppendAudio, ConnectionManager, GreetingTrigger, RealtimeError, RealtimeEvent,
    SessionUpdate, TurnDetection,
};
use crate::telemetry::{CallTelemetry, TelemetryKind, TelemetrySink};

/// Longest we wait for the remote "session configured" acknowledgment.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on audio buffered while the remote session is not ready
/// (~5s of 20ms frames). Overflow drops the oldest frame.
const PENDING_FRAME_LIMIT: usize = 256;

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Duplicate call: {0}")]
    DuplicateCall(String),

    #[error("Call not found: {0}")]
    CallNotFound(String),

    #[error("AI service error: {0}")]
    Realtime(#[from] RealtimeError),
}

/// Call direction relative to this bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    /// Caller dialed in
    Inbound,
    /// We dialed out
    Outbound,
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created; fetching agent configuration
    Connecting,
    /// Opening the AI-service socket
    AwaitingRemoteSession,
    /// Socket open; waiting for the session-configured ack
    Negotiating,
    /// Steady state: duplex audio relay
    Streaming,
    /// Tearing down both legs
    Closing,
    /// Terminal
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::AwaitingRemoteSession => write!(f, "awaiting_remote_session"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Events delivered by the carrier socket adapter.
#[derive(Debug, Clone)]
pub enum CarrierEvent {
    /// One media frame: base64 µ-law 8kHz payload
    Media { payload: String },
    /// Explicit stream stop
    Stop,
}

/// Collaborators shared by all sessions.
#[derive(Clone)]
pub struct SessionDeps {
    pub connection: ConnectionManager,
    pub provider: Arc<dyn AgentConfigProvider>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub transcription_model: String,
    pub turn_detection: TurnDetection,
}

/// Identity of one call, supplied by the entry-point adapter.
#[derive(Debug, Clone)]
pub struct CallParams {
    pub call_id: String,
    pub caller_number: String,
    pub callee_number: String,
    pub direction: CallDirection,
}

enum RelayOutcome {
    /// The call is over (stop event, carrier close, or cancellation)
    CallEnded,
    /// The AI leg dropped while the call is still live
    RemoteLost,
}

/// One active phone call bridged to the AI service.
pub struct CallSession {
    params: CallParams,
    deps: SessionDeps,

    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,

    /// Events from the carrier socket (single consumer: this session)
    carrier_rx: mpsc::Receiver<CarrierEvent>,
    /// Serialized JSON envelopes for the carrier socket
    carrier_tx: mpsc::Sender<String>,

    /// Immutable once fetched in `Connecting`
    agent_config: Option<AgentConfig>,

    /// Transcoded caller audio (base64 24kHz PCM) awaiting a ready remote
    /// session; appended only outside `Streaming`, drained FIFO exactly
    /// once on each entry to `Streaming`
    pending: VecDeque<String>,

    /// AI audio already transcoded and chunked, awaiting its 20ms pacing
    /// slot (base64 µ-law payloads, ≤160 bytes each)
    out_frames: VecDeque<String>,
    chunk_index: u64,

    reconnect_attempts: u32,
    greeted: bool,

    frames_from_carrier: u64,
    frames_to_carrier: u64,
}

impl CallSession {
    /// Build a session and its registry handle.
    pub fn new(
        params: CallParams,
        deps: SessionDeps,
        carrier_rx: mpsc::Receiver<CarrierEvent>,
        carrier_tx: mpsc::Sender<String>,
    ) -> (Self, SessionHandle) {
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let cancel = CancellationToken::new();
        let handle = SessionHandle::new(params.call_id.clone(), cancel.clone(), state_rx);

        let session = Self {
            params,
            deps,
            state: SessionState::Connecting,
            state_tx,
            cancel,
            carrier_rx,
            carrier_tx,
            agent_config: None,
            pending: VecDeque::new(),
            out_frames: VecDeque::new(),
            chunk_index: 0,
            reconnect_attempts: 0,
            greeted: false,
            frames_from_carrier: 0,
            frames_to_carrier: 0,
        };

        (session, handle)
    }

    /// Drive the call to completion. Always ends in `Closed`.
    pub async fn run(mut self) {
        tracing::info!(
            call_id = %self.params.call_id,
            caller = %self.params.caller_number,
            callee = %self.params.callee_number,
            direction = ?self.params.direction,
            "call session started"
        );
        self.publish(TelemetryKind::Lifecycle {
            state: "started".to_string(),
        })
        .await;

        if self.fetch_agent_config().await {
            if let Some(socket) = self.establish_remote_session().await {
                self.run_streaming(socket).await;
            }
        }

        self.close_out().await;
    }

    /// `Connecting`: fetch configuration, falling back to the built-in
    /// default on any provider failure. Returns false only on cancellation.
    async fn fetch_agent_config(&mut self) -> bool {
        let callee = self.params.callee_number.clone();

        let config = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            result = self.deps.provider.fetch(&callee) => match result {
                Ok(Some(config)) => config,
                Ok(None) => {
                    tracing::info!(
                        call_id = %self.params.call_id,
                        callee = %callee,
                        "no agent configured for number, using defaults"
                    );
                    AgentConfig::fallback()
                }
                Err(e) => {
                    tracing::warn!(
                        call_id = %self.params.call_id,
                        "agent config lookup failed, using defaults: {}",
                        e
                    );
                    AgentConfig::fallback()
                }
            },
        };

        self.agent_config = Some(config);
        true
    }

    /// `AwaitingRemoteSession`/`Negotiating`: open the AI socket and run
    /// the configure handshake, retrying with bounded backoff. `None`
    /// means the call cannot continue (cancelled, credentials missing, or
    /// attempt cap reached).
    async fn establish_remote_session(&mut self) -> Option<AiSocket> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            self.set_state(SessionState::AwaitingRemoteSession).await;

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                result = self.deps.connection.connect() => result,
            };

            match connected {
                Ok(mut socket) => match self.handshake(&mut socket).await {
                    Ok(()) => {
                        self.reconnect_attempts = 0;
                        return Some(socket);
                    }
                    Err(e) => {
                        tracing::warn!(call_id = %self.params.call_id, "handshake failed: {}", e);
                    }
                },
                Err(RealtimeError::MissingApiKey) => {
                    // Fatal at session start: no retry, the carrier leg is
                    // closed immediately.
                    tracing::error!(
                        call_id = %self.params.call_id,
                        "AI service credentials missing, ending call"
                    );
                    return None;
                }
                Err(e) => {
                    tracing::warn!(call_id = %self.params.call_id, "AI connect failed: {}", e);
                }
            }

            self.reconnect_attempts += 1;
            if self.reconnect_attempts >= self.deps.connection.policy.max_attempts {
                tracing::error!(
                    call_id = %self.params.call_id,
                    attempts = self.reconnect_attempts,
                    "AI service unreachable, giving up on call"
                );
                return None;
            }

            let delay = self.deps.connection.policy.delay(self.reconnect_attempts);
            tracing::info!(
                call_id = %self.params.call_id,
                attempt = self.reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying AI connection"
            );
            if !self.backoff_wait(delay).await {
                return None;
            }
        }
    }

    /// Sleep out a reconnect backoff while continuing to buffer caller
    /// audio. Returns false if the call ended during the wait.
    async fn backoff_wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                event = self.carrier_rx.recv() => match event {
                    Some(CarrierEvent::Media { payload }) => self.buffer_pending(&payload),
                    Some(CarrierEvent::Stop) | None => return false,
                },
            }
        }
    }

    /// Transcode one caller frame and stash it for the next drain.
    fn buffer_pending(&mut self, payload: &str) {
        let ulaw = match audio::decode_payload(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(call_id = %self.params.call_id, "dropping malformed media payload: {}", e);
                return;
            }
        };

        self.frames_from_carrier += 1;
        let transcoded = audio::carrier_to_ai(&audio::AudioFrame::new(
            ulaw,
            audio::SampleFormat::Companded8k,
            audio::FrameDirection::Inbound,
        ));
        self.buffer_transcoded(audio::encode_payload(&transcoded.bytes));
    }

    /// Send the configure message and wait for the remote ack.
    async fn handshake(&mut self, socket: &mut AiSocket) -> Result<(), RealtimeError> {
        let config = self.agent_config.clone().unwrap_or_else(AgentConfig::fallback);

        let update = SessionUpdate::new(
            &config.instructions,
            &config.voice_id,
            &self.deps.transcription_model,
            self.deps.turn_detection.clone(),
        );
        socket.send(Message::Text(serde_json::to_string(&update)?)).await?;

        self.set_state(SessionState::Negotiating).await;

        let ack = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            while let Some(message) = socket.next().await {
                match message? {
                    Message::Text(text) => match RealtimeEvent::parse(&text) {
                        Ok(RealtimeEvent::SessionUpdated) => return Ok(()),
                        Ok(RealtimeEvent::SessionCreated) => continue,
                        Ok(RealtimeEvent::ServiceError { error }) => {
                            return Err(RealtimeError::Handshake(error.to_string()));
                        }
                        // Anything else before the ack is uninteresting
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::warn!(
                                call_id = %self.params.call_id,
                                "unparseable message during negotiation dropped: {}",
                                e
                            );
                            continue;
                        }
                    },
                    _ => continue,
                }
            }
            Err(RealtimeError::Handshake(
                "socket closed during negotiation".to_string(),
            ))
        })
        .await;

        match ack {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::Handshake(
                "timed out waiting for session ack".to_string(),
            )),
        }
    }

    /// `Streaming` with reconnect: relay until the call ends, re-running
    /// the handshake whenever the AI leg drops.
    async fn run_streaming(&mut self, mut socket: AiSocket) {
        loop {
            if let Err(e) = self.enter_streaming(&mut socket).await {
                tracing::warn!(
                    call_id = %self.params.call_id,
                    "remote session lost while entering streaming: {}",
                    e
                );
                match self.establish_remote_session().await {
                    Some(next) => {
                        socket = next;
                        continue;
                    }
                    None => return,
                }
            }

            let (mut ai_tx, mut ai_rx) = socket.split();
            match self.relay(&mut ai_tx, &mut ai_rx).await {
                RelayOutcome::CallEnded => {
                    // Best-effort close so the service can reap the session
                    let _ = ai_tx.send(Message::Close(None)).await;
                    let _ = ai_tx.close().await;
                    return;
                }
                RelayOutcome::RemoteLost => match self.establish_remote_session().await {
                    Some(next) => socket = next,
                    None => return,
                },
            }
        }
    }

    /// Transition to `Streaming`: trigger the greeting (first entry only)
    /// and drain buffered caller audio, in arrival order, exactly once.
    async fn enter_streaming(&mut self, socket: &mut AiSocket) -> Result<(), RealtimeError> {
        self.set_state(SessionState::Streaming).await;

        if !self.greeted {
            let config = self.agent_config.clone().unwrap_or_else(AgentConfig::fallback);
            let trigger = GreetingTrigger::new(&config.greeting);
            socket.send(Message::Text(serde_json::to_string(&trigger)?)).await?;
            self.greeted = true;
        }

        while let Some(audio_b64) = self.pending.pop_front() {
            let append = AppendAudio::new(audio_b64);
            if let Err(e) = socket.send(Message::Text(serde_json::to_string(&append)?)).await {
                // The frame was not delivered; keep it for the next drain.
                self.pending.push_front(append.audio);
                return Err(e.into());
            }
        }

        Ok(())
    }

    /// Steady-state duplex relay. Single writer: every state and queue
    /// mutation happens in this loop.
    async fn relay(
        &mut self,
        ai_tx: &mut SplitSink<AiSocket, Message>,
        ai_rx: &mut SplitStream<AiSocket>,
    ) -> RelayOutcome {
        let mut pace = tokio::time::interval(Duration::from_millis(audio::FRAME_DURATION_MS));
        // Never burst after a stall: frames must not outrun real time.
        pace.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut heartbeat = tokio::time::interval(self.deps.connection.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.reset(); // no ping immediately after (re)connect

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(call_id = %self.params.call_id, "session cancelled");
                    return RelayOutcome::CallEnded;
                }

                event = self.carrier_rx.recv() => match event {
                    Some(CarrierEvent::Media { payload }) => {
                        if let Err(e) = self.forward_caller_audio(&payload, ai_tx).await {
                            tracing::warn!(call_id = %self.params.call_id, "AI send failed: {}", e);
                            return RelayOutcome::RemoteLost;
                        }
                    }
                    Some(CarrierEvent::Stop) => {
                        tracing::info!(call_id = %self.params.call_id, "stop event from carrier");
                        return RelayOutcome::CallEnded;
                    }
                    None => {
                        tracing::info!(call_id = %self.params.call_id, "carrier socket closed");
                        return RelayOutcome::CallEnded;
                    }
                },

                message = ai_rx.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if !self.handle_ai_event(&text).await {
                            return RelayOutcome::CallEnded;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!(call_id = %self.params.call_id, "AI socket closed");
                        return RelayOutcome::RemoteLost;
                    }
                    Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                    Some(Err(e)) => {
                        tracing::warn!(call_id = %self.params.call_id, "AI socket error: {}", e);
                        return RelayOutcome::RemoteLost;
                    }
                },

                _ = pace.tick() => {
                    if !self.send_paced_frame().await {
                        return RelayOutcome::CallEnded;
                    }
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = ai_tx.send(Message::Ping(Vec::new())).await {
                        tracing::warn!(call_id = %self.params.call_id, "heartbeat failed: {}", e);
                        return RelayOutcome::RemoteLost;
                    }
                }
            }
        }
    }

    /// Carrier media -> AI: µ-law 8kHz to linear 24kHz, strict arrival
    /// order.
    async fn forward_caller_audio(
        &mut self,
        payload: &str,
        ai_tx: &mut SplitSink<AiSocket, Message>,
    ) -> Result<(), RealtimeError> {
        let ulaw = match audio::decode_payload(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(call_id = %self.params.call_id, "dropping malformed media payload: {}", e);
                return Ok(());
            }
        };

        self.frames_from_carrier += 1;
        let transcoded = audio::carrier_to_ai(&audio::AudioFrame::new(
            ulaw,
            audio::SampleFormat::Companded8k,
            audio::FrameDirection::Inbound,
        ));
        let append = AppendAudio::new(audio::encode_payload(&transcoded.bytes));

        if let Err(e) = ai_tx.send(Message::Text(serde_json::to_string(&append)?)).await {
            // Not delivered: buffer it so the reconnected session gets it.
            self.buffer_transcoded(append.audio);
            return Err(e.into());
        }

        Ok(())
    }

    fn buffer_transcoded(&mut self, audio_b64: String) {
        if self.pending.len() >= PENDING_FRAME_LIMIT {
            self.pending.pop_front();
            tracing::warn!(
                call_id = %self.params.call_id,
                "pending audio buffer full, dropping oldest frame"
            );
        }
        self.pending.push_back(audio_b64);
    }

    /// AI event dispatch. Returns false when the carrier leg is gone.
    async fn handle_ai_event(&mut self, text: &str) -> bool {
        let event = match RealtimeEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(call_id = %self.params.call_id, "unparseable AI message dropped: {}", e);
                return true;
            }
        };

        match event {
            RealtimeEvent::AudioDelta { delta } => {
                let pcm = match audio::decode_payload(&delta) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(call_id = %self.params.call_id, "dropping malformed audio delta: {}", e);
                        return true;
                    }
                };

                let transcoded = audio::ai_to_carrier(&audio::AudioFrame::new(
                    pcm,
                    audio::SampleFormat::Linear24k,
                    audio::FrameDirection::Outbound,
                ));
                for chunk in audio::chunk_payload(&transcoded.bytes, audio::FRAME_BYTES) {
                    self.out_frames.push_back(audio::encode_payload(&chunk));
                }
            }
            RealtimeEvent::AudioTranscriptDelta { delta } => {
                self.publish(TelemetryKind::AgentTranscriptDelta { text: delta }).await;
            }
            RealtimeEvent::InputTranscriptionCompleted { transcript } => {
                self.publish(TelemetryKind::CallerTranscript { text: transcript }).await;
            }
            RealtimeEvent::SpeechStarted => {
                self.publish(TelemetryKind::SpeechStarted).await;

                // Barge-in: the caller interrupted while we still had AI
                // audio queued; stale audio must not keep playing.
                if !self.out_frames.is_empty() {
                    self.out_frames.clear();
                    let clear = ClearFrame::new(&self.params.call_id);
                    if let Ok(text) = serde_json::to_string(&clear) {
                        if self.carrier_tx.send(text).await.is_err() {
                            return false;
                        }
                    }
                }
            }
            RealtimeEvent::SpeechStopped => {
                self.publish(TelemetryKind::SpeechStopped).await;
            }
            RealtimeEvent::ServiceError { error } => {
                tracing::warn!(call_id = %self.params.call_id, "AI service error event: {}", error);
            }
            RealtimeEvent::SessionCreated | RealtimeEvent::SessionUpdated => {}
            RealtimeEvent::Unknown => {
                tracing::debug!(call_id = %self.params.call_id, "unhandled AI event dropped");
            }
        }

        true
    }

    /// Emit at most one carrier frame per pacing tick. Returns false when
    /// the carrier leg is gone.
    async fn send_paced_frame(&mut self) -> bool {
        let Some(payload) = self.out_frames.pop_front() else {
            return true;
        };

        let frame = OutboundMediaFrame::new(&self.params.call_id, self.chunk_index, payload);
        self.chunk_index += 1;
        self.frames_to_carrier += 1;

        match serde_json::to_string(&frame) {
            Ok(text) => self.carrier_tx.send(text).await.is_ok(),
            Err(e) => {
                tracing::error!(call_id = %self.params.call_id, "frame serialization failed: {}", e);
                true
            }
        }
    }

    async fn close_out(&mut self) {
        if self.state != SessionState::Closing && self.state != SessionState::Closed {
            self.set_state(SessionState::Closing).await;
        }
        self.set_state(SessionState::Closed).await;

        self.publish(TelemetryKind::Lifecycle {
            state: "closed".to_string(),
        })
        .await;

        tracing::info!(
            call_id = %self.params.call_id,
            frames_from_carrier = self.frames_from_carrier,
            frames_to_carrier = self.frames_to_carrier,
            "call session ended"
        );
    }

    async fn set_state(&mut self, state: SessionState) {
        if self.state == state || self.state == SessionState::Closed {
            return;
        }

        tracing::debug!(call_id = %self.params.call_id, from = %self.state, to = %state, "state transition");
        self.state = state;
        let _ = self.state_tx.send(state);

        if state == SessionState::Streaming {
            self.publish(TelemetryKind::Lifecycle {
                state: "streaming".to_string(),
            })
            .await;
        }
    }

    async fn publish(&self, kind: TelemetryKind) {
        self.deps
            .telemetry
            .publish(CallTelemetry::now(&self.params.call_id, kind))
            .await;
    }
}
