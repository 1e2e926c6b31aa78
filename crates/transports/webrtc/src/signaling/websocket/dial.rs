//! Outbound (dial) mode: run one negotiation session over a WebSocket
//! connection this process opens, e.g. against a signaling relay.

use super::handler::{serve_session, SharedState};
use crate::config::SinkConfig;
use crate::peer::PeerEngine;
use crate::session::{ExitReason, SessionRegistry};
use crate::shutdown::Shutdown;
use crate::{Error, Result};
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use tracing::info;

/// Connect to `url` and serve a single session until it ends
pub async fn dial(
    url: &str,
    config: SinkConfig,
    engine: Arc<dyn PeerEngine>,
    shutdown: Shutdown,
) -> Result<ExitReason> {
    config.validate()?;
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(Error::InvalidConfig(format!(
            "dial URL must use ws:// or wss://, got {}",
            url
        )));
    }

    info!("Dialling signaling endpoint {}", url);
    let (ws_stream, _response) = connect_async(url).await?;
    info!("Connected to {}", url);

    let state = Arc::new(SharedState::new(
        Arc::new(config),
        engine,
        Arc::new(SessionRegistry::new()),
        shutdown,
    ));
    let reason = serve_session(ws_stream, url.to_string(), Arc::clone(&state)).await;
    state.stop_shared_recording().await;
    Ok(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;

    #[tokio::test]
    async fn test_dial_rejects_non_websocket_url() {
        let err = dial(
            "http://127.0.0.1:1",
            SinkConfig::default(),
            FakeEngine::new(),
            Shutdown::new(),
        )
        .await
        .unwrap_err();
        assert!(err.is_config_error());
    }
}
