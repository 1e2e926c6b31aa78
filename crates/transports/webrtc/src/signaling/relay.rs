//! Pure signaling relay
//!
//! Forwards every `offer`, `answer` and `candidate` frame a client sends,
//! verbatim, to every other connected client. No peer session is created.

use super::websocket::{accept_loop, accept_on_path, inbound_frame, WebSocketServerHandle};
use crate::config::SinkConfig;
use crate::shutdown::Shutdown;
use crate::signaling::protocol::Envelope;
use crate::Result;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Connected clients keyed by client id
type ClientTable = RwLock<HashMap<String, mpsc::Sender<String>>>;

/// Broadcast relay between signaling clients
pub struct SignalingRelay {
    config: Arc<SinkConfig>,
    clients: Arc<ClientTable>,
    shutdown: Shutdown,
}

impl SignalingRelay {
    pub fn new(config: SinkConfig, shutdown: Shutdown) -> Self {
        Self {
            config: Arc::new(config),
            clients: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    /// Number of currently connected clients
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Bind and spawn the relay's accept loop
    pub async fn start(self) -> Result<WebSocketServerHandle> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "Signaling relay listening on ws://{}{}",
            local_addr, self.config.ws_path
        );

        let shutdown = self.shutdown.clone();
        let relay = Arc::new(self);
        let task = tokio::spawn({
            let relay = Arc::clone(&relay);
            async move {
                let shutdown = relay.shutdown.clone();
                accept_loop(listener, shutdown, move |stream, peer_addr| {
                    let relay = Arc::clone(&relay);
                    async move {
                        if let Err(e) = relay.handle_client(stream, peer_addr).await {
                            error!("Relay connection error from {}: {}", peer_addr, e);
                        }
                    }
                })
                .await;
            }
        });

        Ok(WebSocketServerHandle::new(local_addr, shutdown, task))
    }

    #[instrument(skip(self, stream))]
    async fn handle_client(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let ws_stream = accept_on_path(stream, &self.config.ws_path).await?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let client_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::channel::<String>(self.config.outbound_queue_depth);
        self.clients.write().insert(client_id.clone(), tx);
        info!("Relay client {} joined from {}", client_id, peer_addr);

        // Task to forward messages from channel to WebSocket
        let forward_task = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        loop {
            tokio::select! {
                frame = ws_rx.next() => {
                    let Some(frame) = frame else { break };
                    match inbound_frame(frame) {
                        Some(Ok(text)) => self.forward(&client_id, text),
                        Some(Err(e)) if e.is_fatal_to_session() => {
                            debug!("Relay client {} transport ended: {}", client_id, e);
                            break;
                        }
                        Some(Err(e)) => warn!("Relay client {}: {}", client_id, e),
                        None => {}
                    }
                }
                _ = self.shutdown.wait() => break,
            }
        }

        // dropping the table's sender ends the forward task
        self.clients.write().remove(&client_id);
        if let Err(e) = forward_task.await {
            error!("Relay forward task for {} failed: {}", client_id, e);
        }
        info!("Relay client {} left", client_id);
        Ok(())
    }

    /// Send `text` to every client except `from`
    fn forward(&self, from: &str, text: String) {
        let envelope = match Envelope::peek(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Relay client {}: {}", from, e);
                return;
            }
        };
        if !envelope.is_negotiation() {
            warn!(
                "Relay client {} sent unrelayed message type {:?}, dropping",
                from, envelope.kind
            );
            return;
        }

        let clients = self.clients.read();
        for (id, tx) in clients.iter().filter(|(id, _)| id.as_str() != from) {
            match tx.try_send(text.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Relay client {} is not keeping up, dropping {}", id, envelope.kind)
                }
                Err(TrySendError::Closed(_)) => debug!("Relay client {} already gone", id),
            }
        }
        debug!(
            "Relayed {} from {} to {} client(s)",
            envelope.kind,
            from,
            clients.len().saturating_sub(1)
        );
    }
}
