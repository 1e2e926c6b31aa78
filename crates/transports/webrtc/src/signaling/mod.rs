//! Signaling wire protocol and transports
//!
//! - [`protocol`]: JSON messages exchanged with clients
//! - [`websocket`]: the connection gateway (accept and dial)
//! - [`relay`]: broadcast relay between clients, no peer sessions

pub mod outbound;
pub mod protocol;
pub mod relay;
pub mod websocket;

pub use outbound::Outbound;
pub use protocol::{Envelope, IceCandidate, ServerMessage, SignalMessage};
pub use relay::SignalingRelay;
pub use websocket::{dial, SharedState, WebSocketServerHandle, WebSocketSignalingServer};
