//! Peer-session engine seam and its webrtc-rs implementation
//!
//! Handles ICE/SDP application, channel intake and connectivity lifecycle.

pub mod connection;
pub mod engine;
pub mod intake;
pub mod lifecycle;

pub use connection::{WebRtcEngine, WebRtcPeerSession};
pub use engine::{
    ChannelKind, ConnectivityState, DescriptionKind, PeerEngine, PeerEvent, PeerEventReceiver,
    PeerEventSender, PeerSession, SessionDescription, SessionHooks,
};
pub use intake::{ChannelIntake, PacketSource, PumpSummary};
pub use lifecycle::{LifecycleAction, LifecycleMonitor};
