//! WebSocket connection gateway
//!
//! Accepts (or dials) the persistent control connection and runs one
//! negotiation session per connection over it.

mod dial;
mod handler;
mod server;

pub use dial::dial;
pub(crate) use handler::{accept_on_path, inbound_frame};
pub use handler::{handle_connection, serve_session, SharedState};
pub(crate) use server::accept_loop;
pub use server::{WebSocketServerHandle, WebSocketSignalingServer};
