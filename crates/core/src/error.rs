//! Error taxonomy for the session core.
//!
//! Only credential and transport failures may change externally visible
//! session state; agent-control, heartbeat and sampling failures are logged
//! at their call sites and degrade gracefully instead of surfacing here.

/// Failures surfaced by [`SessionController`](crate::session::SessionController)
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The credential-issuing call failed (network error or non-2xx status).
    #[error("credential request failed: {0}")]
    Credential(anyhow::Error),

    /// The credential response carried no endpoint identifier under any of
    /// the accepted field names.
    #[error("credential response carried no endpoint identifier")]
    MissingEndpoint,

    /// The transport declined the connection without raising an error.
    #[error("transport declined the connection")]
    ConnectRejected,

    /// A transport operation (connect, disconnect, mute) failed.
    #[error("transport operation failed: {0}")]
    Transport(anyhow::Error),

    /// Microphone control was requested outside of a connected session.
    #[error("microphone control requires a connected session")]
    NotConnected,
}
