//! HTTP client for the companion agent backend.
//!
//! The backend exposes four endpoints: `/token/generate` issues transport
//! credentials, `/start` and `/stop` control the per-channel agent process,
//! and `/ping` is the liveness heartbeat. This crate implements the
//! corresponding `companion-core` capability traits over `reqwest`, so the
//! session controller stays unaware of HTTP entirely.

use anyhow::{Context, Result};
use async_trait::async_trait;
use companion_core::{
    AgentControl, AgentStartParams, CredentialGrant, CredentialIssuer, CredentialRequest,
    HeartbeatSink,
};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// Client for one agent backend. Cheap to clone; the underlying
/// `reqwest::Client` pools connections.
#[derive(Clone)]
pub struct AgentClient {
    base_url: String,
    http: reqwest::Client,
}

impl AgentClient {
    /// A trailing slash on `base_url` is tolerated.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        response
            .error_for_status()
            .with_context(|| format!("POST {path} returned an error status"))
    }
}

/// Token request body, field names as the backend expects them.
#[derive(Serialize)]
struct TokenBody<'a> {
    request_id: &'a str,
    uid: u32,
    channel_name: &'a str,
}

#[derive(Serialize)]
struct StartBody<'a> {
    request_id: String,
    channel_name: &'a str,
    user_uid: u32,
    graph_name: &'a str,
    language: &'a str,
    voice_type: &'a str,
}

/// Shared body for `/stop` and `/ping`.
#[derive(Serialize)]
struct ChannelBody<'a> {
    request_id: String,
    channel_name: &'a str,
}

/// Unwraps the backend's `{code, data: {...}}` envelope; bare payloads
/// (older backends) parse as-is.
fn grant_from_response(value: serde_json::Value) -> Result<CredentialGrant> {
    let payload = match value.get("data") {
        Some(data) if !data.is_null() => data.clone(),
        _ => value,
    };
    serde_json::from_value(payload).context("malformed credential response")
}

#[async_trait]
impl CredentialIssuer for AgentClient {
    async fn issue(&self, request: &CredentialRequest) -> Result<CredentialGrant> {
        let body = TokenBody {
            request_id: &request.request_id,
            uid: request.user_id,
            channel_name: &request.channel_id,
        };
        let response = self.post_json("/token/generate", &body).await?;
        let value: serde_json::Value = response.json().await?;
        grant_from_response(value)
    }
}

#[async_trait]
impl AgentControl for AgentClient {
    async fn start(&self, params: &AgentStartParams) -> Result<()> {
        let body = StartBody {
            request_id: Uuid::new_v4().to_string(),
            channel_name: &params.channel,
            user_uid: params.user_id,
            graph_name: &params.graph_name,
            language: &params.language,
            voice_type: &params.voice_type,
        };
        self.post_json("/start", &body).await?;
        debug!(channel = %params.channel, graph = %params.graph_name, "agent started");
        Ok(())
    }

    async fn stop(&self, channel_id: &str) -> Result<()> {
        let body = ChannelBody {
            request_id: Uuid::new_v4().to_string(),
            channel_name: channel_id,
        };
        self.post_json("/stop", &body).await?;
        debug!(channel = %channel_id, "agent stopped");
        Ok(())
    }
}

#[async_trait]
impl HeartbeatSink for AgentClient {
    async fn ping(&self, channel_id: &str) -> Result<()> {
        let body = ChannelBody {
            request_id: Uuid::new_v4().to_string(),
            channel_name: channel_id,
        };
        self.post_json("/ping", &body).await?;
        Ok(())
    }
}
