//! Session lifecycle orchestration.
//!
//! `SessionController` owns the ordered connect/disconnect sequence across
//! three capabilities (credential issuer, realtime transport, agent control)
//! plus the heartbeat and speaking-detection timers whose lifetimes are tied
//! to the session. State is an explicit tagged enum published through a
//! `watch` channel; re-entrant toggles are rejected by a gate rather than a
//! boolean flag, and a generation counter keeps late async results from
//! applying state after teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::{
    AgentControl, AgentStartParams, ConnectionStatus, CredentialIssuer, CredentialRequest,
    HeartbeatSink, RealtimeTransport, RemoteAudioTrack, TransportConfig,
};
use crate::error::SessionError;
use crate::heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, HeartbeatScheduler};
use crate::speaking::{
    DEFAULT_REMOTE_POLL_INTERVAL, LOCAL_SPEAKING_THRESHOLD, REMOTE_SPEAKING_THRESHOLD,
    SpeakingDetector,
};

/// Where the session currently is. Owned exclusively by the controller;
/// transitions happen only inside [`SessionController::toggle`] and the
/// connection-status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// What a [`SessionController::toggle`] call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// A session was established.
    Connected,
    /// The active session was torn down.
    Disconnected,
    /// Another toggle was still in flight; this call ran nothing.
    Ignored,
    /// The owning context shut down while this toggle was in flight; no
    /// state was applied.
    Aborted,
}

/// Tunables for a session. Defaults mirror the companion backend's
/// conventions; the local/remote threshold scales differ on purpose because
/// the two signals come from different sources (0-100 SDK callback vs 0-1
/// track accessor).
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub channel_name: String,
    pub graph_name: String,
    pub language: String,
    pub voice_type: String,
    pub heartbeat_interval: Duration,
    pub remote_poll_interval: Duration,
    pub local_speaking_threshold: f32,
    pub remote_speaking_threshold: f32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            channel_name: "test-channel".to_string(),
            graph_name: "voice_assistant_live2d".to_string(),
            language: "en".to_string(),
            voice_type: "female".to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            remote_poll_interval: DEFAULT_REMOTE_POLL_INTERVAL,
            local_speaking_threshold: LOCAL_SPEAKING_THRESHOLD,
            remote_speaking_threshold: REMOTE_SPEAKING_THRESHOLD,
        }
    }
}

/// Drives session setup and teardown as a single idempotent toggle, and owns
/// every timer whose lifetime is tied to the session.
pub struct SessionController {
    transport: Arc<dyn RealtimeTransport>,
    credentials: Arc<dyn CredentialIssuer>,
    agent: Arc<dyn AgentControl>,
    heartbeat: HeartbeatScheduler,
    local_speaking: SpeakingDetector,
    remote_speaking: SpeakingDetector,
    options: SessionOptions,
    state: watch::Sender<SessionState>,
    /// Held for the duration of a toggle; `try_lock` failing is exactly the
    /// re-entrancy condition.
    toggle_gate: tokio::sync::Mutex<()>,
    muted: AtomicBool,
    /// Bumped by `shutdown`; in-flight toggles compare against their starting
    /// value before applying any state.
    generation: AtomicU64,
    active_channel: parking_lot::Mutex<Option<String>>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        credentials: Arc<dyn CredentialIssuer>,
        agent: Arc<dyn AgentControl>,
        heartbeat_sink: Arc<dyn HeartbeatSink>,
        options: SessionOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            transport,
            credentials,
            agent,
            heartbeat: HeartbeatScheduler::new(heartbeat_sink, options.heartbeat_interval),
            local_speaking: SpeakingDetector::push(options.local_speaking_threshold),
            remote_speaking: SpeakingDetector::poll(
                options.remote_speaking_threshold,
                options.remote_poll_interval,
            ),
            options,
            state,
            toggle_gate: tokio::sync::Mutex::new(()),
            muted: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            active_channel: parking_lot::Mutex::new(None),
        }
    }

    /// Connects when idle, disconnects when connected. A call arriving while
    /// a previous toggle is still in flight returns
    /// [`ToggleOutcome::Ignored`] and runs nothing.
    pub async fn toggle(&self) -> Result<ToggleOutcome, SessionError> {
        let Ok(_gate) = self.toggle_gate.try_lock() else {
            debug!("toggle ignored: a transition is already in flight");
            return Ok(ToggleOutcome::Ignored);
        };

        match self.state() {
            SessionState::Idle => self.connect().await,
            SessionState::Connected => self.disconnect().await,
            // Only reachable if a status callback or shutdown raced the gate;
            // nothing sensible to do mid-transition.
            SessionState::Connecting | SessionState::Disconnecting => Ok(ToggleOutcome::Ignored),
        }
    }

    /// Ordered connect sequence: credentials -> transport -> (mute sync,
    /// agent start, heartbeat). Caller holds the toggle gate.
    async fn connect(&self) -> Result<ToggleOutcome, SessionError> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.state.send_replace(SessionState::Connecting);

        let request = CredentialRequest {
            request_id: Uuid::new_v4().to_string(),
            user_id: rand::random_range(0..100_000u32),
            channel_id: self.options.channel_name.clone(),
        };
        let grant = match self.credentials.issue(&request).await {
            Ok(grant) => grant,
            Err(e) => {
                self.settle_idle(generation);
                return Err(SessionError::Credential(e));
            }
        };
        if self.is_stale(generation) {
            return Ok(ToggleOutcome::Aborted);
        }

        let config = match TransportConfig::from_grant(&grant) {
            Ok(config) => config,
            Err(e) => {
                self.settle_idle(generation);
                return Err(e);
            }
        };

        match self.transport.connect(config).await {
            Ok(true) => {}
            Ok(false) => {
                self.settle_idle(generation);
                return Err(SessionError::ConnectRejected);
            }
            Err(e) => {
                self.settle_idle(generation);
                return Err(SessionError::Transport(e));
            }
        }
        if self.is_stale(generation) {
            // The owning context went away while the SDK was joining; leave
            // nothing connected behind.
            if let Err(e) = self.transport.disconnect().await {
                warn!(error = ?e, "failed to release a late transport connection");
            }
            return Ok(ToggleOutcome::Aborted);
        }

        self.state.send_replace(SessionState::Connected);
        // Mirror the SDK's actual mute state rather than assuming unmuted.
        self.muted
            .store(self.transport.is_microphone_muted(), Ordering::SeqCst);
        *self.active_channel.lock() = Some(grant.channel_id.clone());
        info!(channel = %grant.channel_id, uid = grant.user_id, "session connected");

        let params = AgentStartParams {
            channel: grant.channel_id.clone(),
            user_id: grant.user_id,
            graph_name: self.options.graph_name.clone(),
            language: self.options.language.clone(),
            voice_type: self.options.voice_type.clone(),
        };
        match self.agent.start(&params).await {
            Ok(()) => {
                if !self.is_stale(generation) {
                    self.heartbeat.start(&grant.channel_id);
                }
            }
            Err(e) => {
                // The session stays up without a backend agent, and no
                // heartbeat runs in that case.
                warn!(error = ?e, "agent start failed; session is connected without an agent");
            }
        }

        Ok(ToggleOutcome::Connected)
    }

    /// Ordered teardown: agent stop -> transport disconnect -> heartbeat
    /// stop. Always settles to `Idle`, even when individual steps fail.
    /// Caller holds the toggle gate.
    async fn disconnect(&self) -> Result<ToggleOutcome, SessionError> {
        self.state.send_replace(SessionState::Disconnecting);

        let channel = self.active_channel.lock().clone();
        if let Some(ref channel) = channel {
            if let Err(e) = self.agent.stop(channel).await {
                warn!(channel = %channel, error = ?e, "failed to stop agent; tearing down anyway");
            }
        }

        let disconnect_result = self.transport.disconnect().await;

        self.heartbeat.stop();
        self.muted.store(false, Ordering::SeqCst);
        *self.active_channel.lock() = None;
        self.state.send_replace(SessionState::Idle);
        info!("session disconnected");

        disconnect_result.map_err(SessionError::Transport)?;
        Ok(ToggleOutcome::Disconnected)
    }

    /// Mutes or unmutes the microphone. Only valid while connected; the
    /// local flag mirrors the transport and stays unchanged on failure.
    /// Returns the new muted state.
    pub async fn toggle_microphone(&self) -> Result<bool, SessionError> {
        if self.state() != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }

        let muted = self.muted.load(Ordering::SeqCst);
        let result = if muted {
            self.transport.unmute_microphone().await
        } else {
            self.transport.mute_microphone().await
        };
        match result {
            Ok(()) => {
                self.muted.store(!muted, Ordering::SeqCst);
                Ok(!muted)
            }
            Err(e) => {
                error!(error = ?e, "microphone toggle failed");
                Err(SessionError::Transport(e))
            }
        }
    }

    /// Push notification from the transport adapter. A transport-level drop
    /// while connected tears the session down instead of leaving heartbeat
    /// and poll timers running against a dead channel.
    pub fn handle_connection_status(&self, status: ConnectionStatus) {
        if status.transport_connected {
            return;
        }
        let dropped = self.state.send_if_modified(|state| {
            if *state == SessionState::Connected {
                *state = SessionState::Idle;
                true
            } else {
                false
            }
        });
        if dropped {
            warn!("transport dropped outside of a toggle; session reset to idle");
            self.heartbeat.stop();
            self.remote_speaking.detach();
            self.muted.store(false, Ordering::SeqCst);
            *self.active_channel.lock() = None;
        }
    }

    /// Push notification carrying the remote audio track, or `None` when it
    /// went away. Attaching starts the remote speaking poll; removal stops
    /// it and forces not-speaking.
    pub fn handle_remote_track(&self, track: Option<Arc<dyn RemoteAudioTrack>>) {
        match track {
            Some(track) => self.remote_speaking.attach(track),
            None => self.remote_speaking.detach(),
        }
    }

    /// Push notification with the local microphone level in `[0, 100]`.
    pub fn handle_local_volume(&self, level: f32) {
        self.local_speaking.sample(level);
    }

    /// Synchronously clears every session-scoped timer and resets state.
    /// In-flight async results observed after this call apply nothing.
    pub fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.heartbeat.stop();
        self.remote_speaking.detach();
        self.local_speaking.reset();
        self.muted.store(false, Ordering::SeqCst);
        *self.active_channel.lock() = None;
        self.state.send_replace(SessionState::Idle);
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch session state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// True only while connected with a successfully started agent.
    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.is_running()
    }

    pub fn local_speaking(&self) -> &SpeakingDetector {
        &self.local_speaking
    }

    pub fn remote_speaking(&self) -> &SpeakingDetector {
        &self.remote_speaking
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// Settles back to `Idle` unless a shutdown already did.
    fn settle_idle(&self, generation: u64) {
        if !self.is_stale(generation) {
            self.state.send_replace(SessionState::Idle);
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
