//! voicebridge - carrier <-> AI realtime voice bridge
//!
//! Bridges a telephony carrier's per-call media stream (8-bit µ-law at
//! 8kHz over WebSocket) to a speech-to-speech AI service (16-bit linear
//! PCM at 24kHz), in both directions, in real time.

mod audio;
mod carrier;
mod config;
mod provider;
mod realtime;
mod server;
mod session;
mod telemetry;

use config::BridgeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("voicebridge=info".parse().unwrap()))
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = BridgeConfig::from_env();
    if let Err(e) = config.validate() {
        anyhow::bail!("invalid configuration: {}", e);
    }

    server::run_server(config).await
}
