//! WebSocket connection handler
//!
//! Upgrades one connection, builds its negotiation session and runs the
//! session actor over the socket.

use crate::config::{RecordingScope, SinkConfig};
use crate::peer::{ChannelIntake, PeerEngine};
use crate::recording::{Recorder, StopOutcome, SHARED_OWNER};
use crate::session::{ExitReason, NegotiationSession, SessionActor, SessionId, SessionRegistry};
use crate::shutdown::Shutdown;
use crate::signaling::outbound::{spawn_writer, Outbound};
use crate::{Error, Result};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state across all connections of one server
pub struct SharedState {
    pub config: Arc<SinkConfig>,
    pub engine: Arc<dyn PeerEngine>,
    pub registry: Arc<SessionRegistry>,
    pub shutdown: Shutdown,
    shared_recorder: Option<Arc<Recorder>>,
}

impl SharedState {
    pub fn new(
        config: Arc<SinkConfig>,
        engine: Arc<dyn PeerEngine>,
        registry: Arc<SessionRegistry>,
        shutdown: Shutdown,
    ) -> Self {
        let shared_recorder = match config.recording.scope {
            RecordingScope::Shared => Some(Arc::new(Recorder::new(
                SHARED_OWNER,
                config.recording.clone(),
            ))),
            RecordingScope::PerSession => None,
        };
        Self {
            config,
            engine,
            registry,
            shutdown,
            shared_recorder,
        }
    }

    /// Recorder for a new session, and whether the session owns it
    pub fn recorder_for(&self, session_id: &SessionId) -> (Arc<Recorder>, bool) {
        match &self.shared_recorder {
            Some(shared) => (Arc::clone(shared), false),
            None => (
                Arc::new(Recorder::new(
                    session_id.as_str(),
                    self.config.recording.clone(),
                )),
                true,
            ),
        }
    }

    pub fn shared_recorder(&self) -> Option<&Arc<Recorder>> {
        self.shared_recorder.as_ref()
    }

    /// Close the process-wide recording, if there is one
    pub async fn stop_shared_recording(&self) {
        let Some(recorder) = &self.shared_recorder else {
            return;
        };
        match recorder.stop().await {
            Ok(StopOutcome::Stopped {
                path,
                bytes_written,
            }) => info!(
                "Closed shared recording {} ({} bytes)",
                path.display(),
                bytes_written
            ),
            Ok(StopOutcome::NotRecording) => {}
            Err(e) => error!("Failed to close shared recording: {}", e),
        }
    }
}

/// Handle a single inbound TCP connection
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<SharedState>,
) -> Result<()> {
    info!("New WebSocket connection from: {}", addr);

    let ws_stream = accept_on_path(stream, &state.config.ws_path).await?;
    let reason = serve_session(ws_stream, addr.to_string(), state).await;
    debug!("Connection {} finished: {}", addr, reason);
    Ok(())
}

/// Complete the upgrade handshake, answering 404 for any other path
pub(crate) async fn accept_on_path(
    stream: TcpStream,
    ws_path: &str,
) -> Result<WebSocketStream<TcpStream>> {
    let ws_path = ws_path.to_string();
    let check_path = move |req: &Request, resp: Response| {
        if req.uri().path() == ws_path {
            Ok(resp)
        } else {
            warn!("Rejecting upgrade on {} (expected {})", req.uri().path(), ws_path);
            let mut not_found = ErrorResponse::new(Some("not found".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    };
    Ok(accept_hdr_async(stream, check_path).await?)
}

/// Run one negotiation session over an established WebSocket.
///
/// Used for both accepted and dialled connections.
#[instrument(skip(ws, state))]
pub async fn serve_session<S>(
    ws: WebSocketStream<S>,
    remote: String,
    state: Arc<SharedState>,
) -> ExitReason
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session_id = SessionId::new();
    let (ws_tx, ws_rx) = ws.split();

    // Channel for sending messages back to this connection
    let (outbound, queue) = Outbound::channel(state.config.outbound_queue_depth);
    let writer = spawn_writer(ws_tx, queue);

    let (recorder, owns_recorder) = state.recorder_for(&session_id);
    let intake = Arc::new(ChannelIntake::new(state.config.intake.clone(), recorder));

    let session = NegotiationSession::new(
        session_id.clone(),
        state.config.role,
        Arc::clone(&state.engine),
        intake,
        outbound,
    )
    .with_recorder_ownership(owns_recorder);

    state.registry.register(session_id.clone(), remote.clone());
    info!("Session {} serving {}", session_id, remote);

    let actor = SessionActor::new(
        session,
        state.shutdown.clone(),
        state.config.on_terminal_state,
    )
    .with_registry(Arc::clone(&state.registry));

    let inbound = ws_rx.filter_map(|frame| async move { inbound_frame(frame) });
    let reason = actor.run(Box::pin(inbound)).await;

    state.registry.remove(&session_id);

    // the actor dropped the last Outbound; the writer drains and closes the socket
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer)
        .await
        .is_err()
    {
        warn!("Session {}: writer did not finish draining", session_id);
    }

    reason
}

/// Map one WebSocket frame to the text it carries; `None` skips the frame
pub(crate) fn inbound_frame(
    frame: std::result::Result<Message, tungstenite::Error>,
) -> Option<Result<String>> {
    match frame {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(data)) => Some(
            String::from_utf8(data)
                .map_err(|e| Error::DecodeError(format!("binary frame is not UTF-8: {}", e))),
        ),
        Ok(Message::Close(_)) => {
            debug!("WebSocket connection closed by client");
            None
        }
        // ping/pong are answered by tungstenite itself
        Ok(_) => None,
        Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Some(
            Err(Error::ConnectionClosed("WebSocket closed".to_string())),
        ),
        Err(e) => Some(Err(e.into())),
    }
}
