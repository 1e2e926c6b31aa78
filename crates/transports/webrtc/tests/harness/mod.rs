//! Signaling gateway end-to-end test harness
//!
//! Provides infrastructure for integration testing of the gateway with:
//! - Embedded signaling server on a random port, backed by the in-process
//!   fake peer engine so tests can play the engine side of every session
//! - WebSocket test clients speaking the JSON signaling protocol
//! - A temporary output directory for recordings
//!
//! Basic usage pattern:
//!
//! 1. Start a `TestServer` (optionally adjusting its `SinkConfig`)
//! 2. Connect clients with `server.connect()`
//! 3. Drive the peer side through `server.engine()`
//! 4. Inspect `server.recordings()` and the messages clients received
//! 5. Call `server.shutdown()` to clean up

#![allow(dead_code)]

pub mod test_client;
pub mod test_server;

use std::time::Duration;

pub use test_client::TestClient;
pub use test_server::TestServer;

/// How long a client waits for an expected message
pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Client error: {0}")]
    ClientError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Initialize test logging (safe to call from every test)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,mediasink_webrtc=debug")
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, what: &str, mut check: F) -> HarnessResult<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            return Err(HarnessError::Timeout(what.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
