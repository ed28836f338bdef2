//! Carrier-facing server
//!
//! Thin entry-point adapters around the Call Session: two WebSocket routes
//! (inbound and outbound calls) that only differ in the direction they
//! stamp, a stop webhook routed through the Session Registry, and a health
//! check. All call logic lives in the session; the handlers here just
//! extract identity from the `start` envelope and pump the socket.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::carrier::{CarrierEnvelope, StreamStart};
use crate::config::BridgeConfig;
use crate::provider::{AgentConfigProvider, HttpAgentProvider, StaticProvider};
use crate::realtime::{ConnectionManager, ReconnectPolicy, TurnDetection};
use crate::session::{
    CallDirection, CallParams, CallSession, CarrierEvent, SessionDeps, SessionRegistry,
};
use crate::telemetry::{HttpTelemetrySink, LogTelemetrySink, TelemetrySink};

/// Longest we wait for the carrier's `start` envelope after upgrade.
const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub session_deps: SessionDeps,
}

impl AppState {
    pub fn from_config(config: &BridgeConfig) -> Self {
        let provider: Arc<dyn AgentConfigProvider> = match &config.provider_base_url {
            Some(base_url) => Arc::new(HttpAgentProvider::new(
                base_url.clone(),
                config.provider_api_key.clone(),
            )),
            None => {
                tracing::info!("no configuration provider set, every call uses the default agent");
                Arc::new(StaticProvider::empty())
            }
        };

        let telemetry: Arc<dyn TelemetrySink> = match &config.telemetry_url {
            Some(url) => Arc::new(HttpTelemetrySink::new(
                url.clone(),
                config.provider_api_key.clone(),
            )),
            None => Arc::new(LogTelemetrySink),
        };

        let connection = ConnectionManager::new(config.realtime_url.clone(), config.ai_api_key.clone())
            .with_policy(ReconnectPolicy {
                max_attempts: config.max_reconnect_attempts,
                base_delay: config.reconnect_base_delay,
            })
            .with_heartbeat_interval(config.heartbeat_interval);

        let turn_detection = TurnDetection {
            kind: "server_vad".to_string(),
            threshold: config.vad_threshold,
            prefix_padding_ms: config.vad_prefix_padding_ms,
            silence_duration_ms: config.vad_silence_duration_ms,
        };

        Self {
            registry: SessionRegistry::new(),
            session_deps: SessionDeps {
                connection,
                provider,
                telemetry,
                transcription_model: config.transcription_model.clone(),
                turn_detection,
            },
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/api/health", get(health_check))
        // Carrier media streams
        .route("/stream/inbound", get(inbound_stream))
        .route("/stream/outbound", get(outbound_stream))
        // Explicit call-stop webhook
        .route("/api/calls/{call_id}/stop", post(stop_call))
        // Active call count
        .route("/api/calls/active", get(active_calls))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(serde::Serialize)]
struct ActiveCalls {
    active: usize,
}

async fn active_calls(State(state): State<Arc<AppState>>) -> Json<ActiveCalls> {
    Json(ActiveCalls {
        active: state.registry.len().await,
    })
}

async fn stop_call(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> StatusCode {
    match state.registry.stop_call(&call_id).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::NOT_FOUND,
    }
}

async fn inbound_stream(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_carrier_socket(state, socket, CallDirection::Inbound))
}

async fn outbound_stream(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_carrier_socket(state, socket, CallDirection::Outbound))
}

/// Per-connection adapter: learn the call identity, hand both directions
/// of the socket to a new session, and clean up the registry afterwards.
async fn handle_carrier_socket(state: Arc<AppState>, socket: WebSocket, direction: CallDirection) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let Some(start) = await_start(&mut ws_rx).await else {
        tracing::warn!("carrier socket closed before a start envelope arrived");
        let _ = ws_tx.send(WsMessage::Close(None)).await;
        return;
    };

    let call_id = match start.call_id() {
        Some(id) => id.to_string(),
        None => {
            let generated = uuid::Uuid::new_v4().to_string();
            tracing::warn!(call_id = %generated, "start envelope without a call identifier");
            generated
        }
    };

    let params = CallParams {
        call_id: call_id.clone(),
        caller_number: start.caller_number().unwrap_or_default().to_string(),
        callee_number: start.callee_number().unwrap_or_default().to_string(),
        direction,
    };

    let (event_tx, event_rx) = mpsc::channel(256);
    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (session, handle) = CallSession::new(params, state.session_deps.clone(), event_rx, frame_tx);

    if let Err(e) = state.registry.create(handle).await {
        tracing::error!(call_id = %call_id, "rejecting carrier stream: {}", e);
        let _ = ws_tx.send(WsMessage::Close(None)).await;
        return;
    }

    let session_task = tokio::spawn(session.run());
    let writer = tokio::spawn(pump_frames(frame_rx, ws_tx));

    pump_events(&mut ws_rx, &event_tx, &call_id).await;
    drop(event_tx); // tells the session its carrier leg is gone

    if let Err(e) = session_task.await {
        tracing::error!(call_id = %call_id, "session task failed: {}", e);
    }
    state.registry.remove(&call_id).await;
    let _ = writer.await;
}

/// Read envelopes until the `start` event arrives.
async fn await_start(ws_rx: &mut SplitStream<WebSocket>) -> Option<StreamStart> {
    let result = tokio::time::timeout(START_TIMEOUT, async {
        while let Some(message) = ws_rx.next().await {
            let text = match message {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            };

            match CarrierEnvelope::parse(text.as_str()) {
                Ok(CarrierEnvelope::Start { stream_sid, mut start }) => {
                    if start.stream_sid.is_none() {
                        start.stream_sid = stream_sid;
                    }
                    return Some(start);
                }
                Ok(CarrierEnvelope::Stop) => return None,
                Ok(CarrierEnvelope::Media { .. }) => {
                    tracing::warn!("media before start envelope dropped");
                }
                Ok(CarrierEnvelope::Connected) | Ok(CarrierEnvelope::Unknown) => {}
                Err(e) => tracing::warn!("malformed carrier envelope dropped: {}", e),
            }
        }
        None
    })
    .await;

    result.unwrap_or(None)
}

/// Carrier socket -> session events, preserving arrival order.
async fn pump_events(
    ws_rx: &mut SplitStream<WebSocket>,
    event_tx: &mpsc::Sender<CarrierEvent>,
    call_id: &str,
) {
    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(call_id, "carrier socket error: {}", e);
                break;
            }
        };

        match CarrierEnvelope::parse(text.as_str()) {
            Ok(CarrierEnvelope::Media { media }) => {
                if event_tx
                    .send(CarrierEvent::Media {
                        payload: media.payload,
                    })
                    .await
                    .is_err()
                {
                    break; // session already gone
                }
            }
            Ok(CarrierEnvelope::Stop) => {
                let _ = event_tx.send(CarrierEvent::Stop).await;
                break;
            }
            Ok(CarrierEnvelope::Start { .. }) => {
                tracing::warn!(call_id, "duplicate start envelope ignored");
            }
            Ok(CarrierEnvelope::Connected) | Ok(CarrierEnvelope::Unknown) => {}
            Err(e) => tracing::warn!(call_id, "malformed carrier envelope dropped: {}", e),
        }
    }
}

/// Session frames -> carrier socket.
async fn pump_frames(
    mut frame_rx: mpsc::Receiver<String>,
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
) {
    while let Some(text) = frame_rx.recv().await {
        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.send(WsMessage::Close(None)).await;
}

/// Initialize and start the server
pub async fn run_server(config: BridgeConfig) -> anyhow::Result<()> {
    if config.ai_api_key.trim().is_empty() {
        tracing::warn!("OPENAI_API_KEY is not set; calls will be rejected at session start");
    }

    let state = AppState::from_config(&config);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("voicebridge listening on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
