//! Capability surface of the peer-connection engine
//!
//! The session layer drives negotiation only through [`PeerEngine`] and
//! [`PeerSession`]. Engine callbacks never touch session state directly: they
//! push [`PeerEvent`]s onto the channel in [`SessionHooks`], one per handle, and the
//! session actor consumes them in order. Payload bytes bypass the actor and go
//! straight from the engine to the [`ChannelIntake`].

use super::intake::ChannelIntake;
use crate::session::SessionId;
use crate::signaling::protocol::IceCandidate;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// ICE connectivity state of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Checking => "checking",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Completed => "completed",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Kind of inbound channel opened by the remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Data,
    AudioTrack,
    VideoTrack,
}

/// Something the engine observed on a peer session
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A locally gathered candidate; `None` marks the end of gathering
    LocalCandidate(Option<IceCandidate>),
    /// ICE connectivity changed
    Connectivity(ConnectivityState),
    /// The remote opened a channel; `wired` is true if it feeds the recorder
    ChannelOpened {
        label: String,
        kind: ChannelKind,
        wired: bool,
    },
    /// A wired channel stopped delivering payloads
    IntakeEnded { label: String, reason: String },
}

/// Sending half of a session's event queue
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Receiving half of a session's event queue
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// Callbacks a new peer session reports through
#[derive(Clone)]
pub struct SessionHooks {
    pub events: PeerEventSender,
    pub intake: Arc<ChannelIntake>,
}

impl SessionHooks {
    /// Enqueue an event; a closed queue means the session is gone
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }
}

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// A session description and its kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Creates peer sessions
#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Construct one peer session with its callbacks registered
    async fn new_session(
        &self,
        session_id: &SessionId,
        hooks: SessionHooks,
    ) -> Result<Arc<dyn PeerSession>>;
}

/// One negotiated (or negotiating) connection to a remote peer
#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Release the connection; further calls may fail
    async fn close(&self) -> Result<()>;
}
