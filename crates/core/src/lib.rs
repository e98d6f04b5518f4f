//! Session connection & liveness core for a realtime voice companion.
//!
//! This crate owns the non-visual logic of a voice-chat session: the
//! connect/disconnect state machine, the liveness heartbeat that runs for
//! exactly the lifetime of an active session, and the debounced
//! speaking-detection signals derived from noisy volume readings. It depends
//! only on abstract capabilities (`RealtimeTransport`, `CredentialIssuer`,
//! `AgentControl`, `HeartbeatSink`), so it can be driven by a real RTC SDK,
//! an HTTP agent backend, or test doubles interchangeably.

pub mod capability;
pub mod error;
pub mod heartbeat;
pub mod session;
pub mod speaking;

pub use capability::{
    AgentControl, AgentStartParams, ConnectionStatus, CredentialGrant, CredentialIssuer,
    CredentialRequest, HeartbeatSink, RealtimeTransport, RemoteAudioTrack, TransportConfig,
};
pub use error::SessionError;
pub use heartbeat::HeartbeatScheduler;
pub use session::{SessionController, SessionOptions, SessionState, ToggleOutcome};
pub use speaking::SpeakingDetector;
