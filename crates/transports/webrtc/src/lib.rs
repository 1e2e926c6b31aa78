//! WebRTC signaling gateway and media-capture sink
//!
//! Accepts one persistent WebSocket control connection per client, runs the
//! offer/answer/candidate exchange against a webrtc-rs peer connection, and
//! writes the bytes arriving on the negotiated data channel (or audio track)
//! to a file while the client has recording switched on.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Client (browser / native)                             │
//! │  ↓ WebSocket (JSON signaling)                          │
//! │  WebSocketSignalingServer                              │
//! │  └─ per connection: SessionActor                       │
//! │     ├─ NegotiationSession (offer/answer/candidates)    │
//! │     ├─ LifecycleMonitor (ICE state → teardown)         │
//! │     └─ Outbound writer task (single socket writer)     │
//! │  PeerEngine / PeerSession (webrtc-rs)                  │
//! │  └─ ChannelIntake ──→ Recorder (file on disk)          │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use mediasink_webrtc::{NegotiationRole, SinkConfig};
//!
//! let config = SinkConfig::default()
//!     .with_listen_addr("127.0.0.1:3000")
//!     .with_role(NegotiationRole::Answerer);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.ws_path, "/ws");
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use mediasink_webrtc::{SinkConfig, WebRtcEngine, WebSocketSignalingServer};
//! use std::sync::Arc;
//!
//! # async fn example() -> mediasink_webrtc::Result<()> {
//! let config = SinkConfig::default();
//! let engine = Arc::new(WebRtcEngine::new(Arc::new(config.clone())));
//!
//! let handle = WebSocketSignalingServer::new(config, engine).start().await?;
//! println!("listening on {}", handle.local_addr());
//! handle.wait().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod peer;
pub mod recording;
pub mod session;
pub mod shutdown;
pub mod signaling;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-exports for public API
pub use config::{
    IntakeSource, NegotiationRole, RecordingConfig, RecordingScope, SinkConfig,
    TerminalStatePolicy, TurnServerConfig,
};
pub use error::{Error, ErrorClass, Result};
pub use peer::{ConnectivityState, PeerEngine, PeerSession, WebRtcEngine};
pub use recording::{Recorder, RecorderStatus};
pub use session::{ExitReason, NegotiationState, SessionId, SessionRegistry};
pub use shutdown::Shutdown;
pub use signaling::{
    dial, SignalingRelay, WebSocketServerHandle, WebSocketSignalingServer,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
