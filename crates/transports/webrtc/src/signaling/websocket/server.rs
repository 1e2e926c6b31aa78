//! WebSocket signaling server
//!
//! Accepts client connections and runs one negotiation session per
//! connection until the shutdown signal fires.

use super::handler::{handle_connection, SharedState};
use crate::config::SinkConfig;
use crate::peer::PeerEngine;
use crate::session::SessionRegistry;
use crate::shutdown::Shutdown;
use crate::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket signaling server
pub struct WebSocketSignalingServer {
    /// Shared state
    state: Arc<SharedState>,
}

impl WebSocketSignalingServer {
    pub fn new(config: SinkConfig, engine: Arc<dyn PeerEngine>) -> Self {
        Self::with_shutdown(config, engine, Shutdown::new())
    }

    /// Create a server that stops when `shutdown` is triggered
    pub fn with_shutdown(
        config: SinkConfig,
        engine: Arc<dyn PeerEngine>,
        shutdown: Shutdown,
    ) -> Self {
        let state = Arc::new(SharedState::new(
            Arc::new(config),
            engine,
            Arc::new(SessionRegistry::new()),
            shutdown,
        ));
        Self { state }
    }

    /// Get shared state (for external access)
    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Bind the listener and spawn the accept loop.
    ///
    /// Returns once the socket is bound, so `local_addr()` on the handle is
    /// usable immediately (port 0 binds an ephemeral port).
    pub async fn start(self) -> Result<WebSocketServerHandle> {
        self.state.config.validate()?;
        let addr = self.state.config.socket_addr()?;

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "WebSocket signaling server listening on ws://{}{}",
            local_addr, self.state.config.ws_path
        );

        let state = self.state;
        let shutdown = state.shutdown.clone();
        let task = tokio::spawn(async move {
            let conn_state = Arc::clone(&state);
            accept_loop(listener, state.shutdown.clone(), move |stream, peer_addr| {
                let state = Arc::clone(&conn_state);
                async move {
                    if let Err(e) = handle_connection(stream, peer_addr, state).await {
                        error!("WebSocket connection error from {}: {}", peer_addr, e);
                    }
                }
            })
            .await;
            state.stop_shared_recording().await;
        });

        Ok(WebSocketServerHandle::new(local_addr, shutdown, task))
    }
}

/// Accept connections until `shutdown` fires, then wait for the spawned
/// connection tasks to finish.
pub(crate) async fn accept_loop<F, Fut>(
    listener: TcpListener,
    shutdown: Shutdown,
    mut on_connection: F,
) where
    F: FnMut(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        info!("Accepted WebSocket connection from {}", peer_addr);
                        connections.spawn(on_connection(stream, peer_addr));
                    }
                    Err(e) => {
                        error!("Failed to accept WebSocket connection: {}", e);
                    }
                }
            }
            // reap finished connections so the set does not grow unbounded
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.wait() => {
                info!("WebSocket signaling server received shutdown signal");
                break;
            }
        }
    }

    drop(listener);
    let pending = connections.len();
    if pending > 0 {
        info!("Waiting for {} connection(s) to close", pending);
    }
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "{} connection(s) still open after {:?}, aborting",
            connections.len(),
            DRAIN_TIMEOUT
        );
        connections.shutdown().await;
    }

    info!("WebSocket signaling server accept loop exited");
}

/// Handle for controlling a running server
pub struct WebSocketServerHandle {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl WebSocketServerHandle {
    pub(crate) fn new(local_addr: SocketAddr, shutdown: Shutdown, task: JoinHandle<()>) -> Self {
        Self {
            local_addr,
            shutdown,
            task,
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The signal this server stops on
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Trigger shutdown and wait for the server to drain
    pub async fn shutdown(self) {
        info!("Sending shutdown signal to WebSocket server");
        self.shutdown.trigger();
        self.wait().await;
    }

    /// Wait for the server to stop (e.g. after a terminal-state shutdown)
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!("WebSocket server task failed: {}", e);
        }
        info!("WebSocket signaling server stopped");
    }
}
