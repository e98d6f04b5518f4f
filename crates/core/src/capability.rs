//! Capability traits the session core depends on.
//!
//! The core never talks to an RTC SDK or an HTTP backend directly. It is
//! handed these capabilities as `Arc<dyn Trait>` objects, which keeps the
//! state machine testable and lets the surrounding application decide what
//! actually implements them.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SessionError;

/// The realtime audio/video session object (RTC SDK seam).
///
/// Status changes, remote-track arrival and local volume levels are push
/// notifications: the adapter that owns the SDK forwards them to
/// [`SessionController::handle_connection_status`],
/// [`SessionController::handle_remote_track`] and
/// [`SessionController::handle_local_volume`].
///
/// [`SessionController::handle_connection_status`]: crate::session::SessionController::handle_connection_status
/// [`SessionController::handle_remote_track`]: crate::session::SessionController::handle_remote_track
/// [`SessionController::handle_local_volume`]: crate::session::SessionController::handle_local_volume
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Joins the channel described by `config`. Returns `Ok(false)` when the
    /// SDK declines the connection without raising an error.
    async fn connect(&self, config: TransportConfig) -> Result<bool>;

    /// Leaves the channel and releases local tracks.
    async fn disconnect(&self) -> Result<()>;

    /// Actual microphone mute state as the SDK sees it.
    fn is_microphone_muted(&self) -> bool;

    async fn mute_microphone(&self) -> Result<()>;

    async fn unmute_microphone(&self) -> Result<()>;
}

/// Issues per-session transport credentials (one network call per connect).
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, request: &CredentialRequest) -> Result<CredentialGrant>;
}

/// Starts and stops the backend agent process that runs the conversational
/// logic server-side. Both operations can fail independently of transport
/// state; the controller treats those failures as non-fatal.
#[async_trait]
pub trait AgentControl: Send + Sync {
    async fn start(&self, params: &AgentStartParams) -> Result<()>;

    async fn stop(&self, channel_id: &str) -> Result<()>;
}

/// Fire-and-forget liveness ping. No response contract is relied upon.
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn ping(&self, channel_id: &str) -> Result<()>;
}

/// Pull-based volume access on a remote audio stream.
///
/// SDK builds differ in which accessor they expose, so both are optional and
/// the first one present wins. A track exposing neither reads as silent.
pub trait RemoteAudioTrack: Send + Sync {
    /// Current volume level in `[0, 1]`. `None` when this SDK build does not
    /// expose the accessor.
    fn volume_level(&self) -> Option<Result<f32>> {
        None
    }

    /// Legacy accessor carried by older SDK builds, same range.
    fn current_level(&self) -> Option<Result<f32>> {
        None
    }
}

/// Connection status reported by the transport. Only the transport-level
/// connected bit is interpreted; everything else the SDK reports stays with
/// the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub transport_connected: bool,
}

/// Parameters for the credential-issuing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    pub request_id: String,
    pub user_id: u32,
    pub channel_id: String,
}

/// Credential response from the backend.
///
/// The endpoint identifier arrives under `endpointId` from current backends
/// and under `appId` / `app_id` from legacy ones; all three deserialize into
/// `endpoint_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialGrant {
    #[serde(
        default,
        rename = "endpointId",
        alias = "appId",
        alias = "app_id"
    )]
    pub endpoint_id: Option<String>,
    #[serde(rename = "channel_name", alias = "channelId", alias = "channel")]
    pub channel_id: String,
    #[serde(rename = "token", alias = "authToken")]
    pub auth_token: String,
    #[serde(rename = "uid", alias = "userId")]
    pub user_id: u32,
}

/// Immutable transport configuration, produced once per successful connect
/// attempt and consumed by value in the `connect` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub endpoint_id: String,
    pub channel_id: String,
    pub auth_token: String,
    pub user_id: u32,
}

impl TransportConfig {
    /// Builds the config from a credential grant, whichever field naming the
    /// backend used for the endpoint identifier.
    pub fn from_grant(grant: &CredentialGrant) -> Result<Self, SessionError> {
        let endpoint_id = grant
            .endpoint_id
            .clone()
            .ok_or(SessionError::MissingEndpoint)?;
        Ok(Self {
            endpoint_id,
            channel_id: grant.channel_id.clone(),
            auth_token: grant.auth_token.clone(),
            user_id: grant.user_id,
        })
    }
}

/// Parameters carried by the agent-start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStartParams {
    pub channel: String,
    pub user_id: u32,
    pub graph_name: String,
    pub language: String,
    pub voice_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_parses_current_endpoint_field() {
        let grant: CredentialGrant = serde_json::from_value(serde_json::json!({
            "endpointId": "ep-1",
            "channel_name": "test-channel",
            "token": "tok",
            "uid": 42,
        }))
        .unwrap();
        assert_eq!(grant.endpoint_id.as_deref(), Some("ep-1"));
        assert_eq!(grant.channel_id, "test-channel");
        assert_eq!(grant.auth_token, "tok");
        assert_eq!(grant.user_id, 42);
    }

    #[test]
    fn grant_parses_legacy_endpoint_fields() {
        for key in ["appId", "app_id"] {
            let mut value = serde_json::json!({
                "channel_name": "test-channel",
                "token": "tok",
                "uid": 7,
            });
            value[key] = serde_json::json!("legacy-ep");
            let grant: CredentialGrant = serde_json::from_value(value).unwrap();
            assert_eq!(grant.endpoint_id.as_deref(), Some("legacy-ep"), "key {key}");
        }
    }

    #[test]
    fn config_built_from_whichever_endpoint_field_is_present() {
        let grant: CredentialGrant = serde_json::from_value(serde_json::json!({
            "app_id": "ep-legacy",
            "channel_name": "c",
            "token": "t",
            "uid": 1,
        }))
        .unwrap();
        let config = TransportConfig::from_grant(&grant).unwrap();
        assert_eq!(config.endpoint_id, "ep-legacy");
    }

    #[test]
    fn config_requires_an_endpoint_identifier() {
        let grant: CredentialGrant = serde_json::from_value(serde_json::json!({
            "channel_name": "c",
            "token": "t",
            "uid": 1,
        }))
        .unwrap();
        assert!(matches!(
            TransportConfig::from_grant(&grant),
            Err(SessionError::MissingEndpoint)
        ));
    }
}
