//! Headless smoke probe for the companion agent backend.
//!
//! Drives a real `SessionController` against a live backend with a no-op
//! transport: token issuance, agent start, heartbeats and agent stop all hit
//! the actual server, while the RTC join is stubbed out (there is no
//! headless SDK to join with). Useful for checking a deployment before
//! pointing the real frontend at it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Parser;
use companion_agent::AgentClient;
use companion_core::{
    RealtimeTransport, SessionController, SessionOptions, ToggleOutcome, TransportConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smoke", about = "Companion backend smoke probe", version)]
struct Args {
    /// Agent backend base URL.
    #[arg(long, default_value = "http://localhost:8080")]
    base_url: String,

    /// Channel to run the probe session on.
    #[arg(long, default_value = "test-channel")]
    channel: String,

    /// Graph the backend should run for this session.
    #[arg(long, default_value = "voice_assistant_live2d")]
    graph: String,

    #[arg(long, default_value = "en")]
    language: String,

    #[arg(long, default_value = "female")]
    voice: String,

    /// How long to keep the session (and its heartbeat) alive.
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,
}

/// Stands in for the RTC SDK. Connect always succeeds so the probe can
/// exercise everything on the backend side of the session sequence.
struct HeadlessTransport {
    muted: AtomicBool,
}

#[async_trait]
impl RealtimeTransport for HeadlessTransport {
    async fn connect(&self, config: TransportConfig) -> Result<bool> {
        info!(channel = %config.channel_id, uid = config.user_id, "headless transport joined");
        Ok(true)
    }

    async fn disconnect(&self) -> Result<()> {
        info!("headless transport left");
        Ok(())
    }

    fn is_microphone_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    async fn mute_microphone(&self) -> Result<()> {
        self.muted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unmute_microphone(&self) -> Result<()> {
        self.muted.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Configuration and logging ---
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    // --- 2. Wire the controller ---
    let client = Arc::new(AgentClient::new(&args.base_url));
    let transport = Arc::new(HeadlessTransport {
        muted: AtomicBool::new(false),
    });
    let options = SessionOptions {
        channel_name: args.channel.clone(),
        graph_name: args.graph.clone(),
        language: args.language.clone(),
        voice_type: args.voice.clone(),
        ..SessionOptions::default()
    };
    let controller = SessionController::new(
        transport,
        client.clone(),
        client.clone(),
        client.clone(),
        options,
    );

    // --- 3. Bring the session up ---
    info!(base_url = %args.base_url, channel = %args.channel, "connecting");
    let outcome = controller
        .toggle()
        .await
        .context("session connect failed")?;
    if outcome != ToggleOutcome::Connected {
        bail!("unexpected toggle outcome: {outcome:?}");
    }
    if controller.heartbeat_running() {
        info!("agent started; heartbeat running");
    } else {
        warn!("connected but the agent did not start; no heartbeat will run");
    }

    // --- 4. Let the heartbeat tick, then tear down ---
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted; tearing down early"),
    }

    controller
        .toggle()
        .await
        .context("session disconnect failed")?;
    info!("probe finished cleanly");
    Ok(())
}
