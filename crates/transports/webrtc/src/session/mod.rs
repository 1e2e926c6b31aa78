//! Negotiation sessions
//!
//! One [`NegotiationSession`] per client connection, driven by a
//! [`SessionActor`] that serialises client messages, engine events and
//! shutdown into a single ordered stream.

mod actor;
mod negotiation;
mod registry;

pub use actor::SessionActor;
pub use negotiation::{NegotiationSession, SessionFlow};
pub use registry::{SessionEntry, SessionRegistry};

use crate::peer::ConnectivityState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a negotiation session (UUID v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Negotiation progress of one session.
///
/// Answerer: `Idle → OfferReceived → AnswerSent`.
/// Offerer: `Idle → OfferSent → Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    Idle,
    OfferReceived,
    AnswerSent,
    OfferSent,
    Complete,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::OfferReceived => "offer_received",
            NegotiationState::AnswerSent => "answer_sent",
            NegotiationState::OfferSent => "offer_sent",
            NegotiationState::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The client closed the connection
    ClientClosed,
    /// Reading from or writing to the client failed
    TransportError(String),
    /// The peer connection reached a terminal connectivity state
    PeerState(ConnectivityState),
    /// The server is shutting down
    ServerShutdown,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::ClientClosed => write!(f, "client closed connection"),
            ExitReason::TransportError(e) => write!(f, "transport error: {}", e),
            ExitReason::PeerState(state) => write!(f, "peer connection {}", state),
            ExitReason::ServerShutdown => write!(f, "server shutdown"),
        }
    }
}
