//! Per-session actor: the single consumer of client messages, engine events
//! and the shutdown signal

use super::negotiation::{NegotiationSession, SessionFlow};
use super::{ExitReason, SessionRegistry};
use crate::config::TerminalStatePolicy;
use crate::recording::RecordingFailure;
use crate::shutdown::Shutdown;
use crate::signaling::protocol::{ServerMessage, SignalMessage};
use crate::{Error, Result};
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, instrument, warn};

/// Drives one [`NegotiationSession`] until the client leaves, the transport
/// fails, the peer reaches a terminal state or the server shuts down.
pub struct SessionActor {
    session: NegotiationSession,
    failures: broadcast::Receiver<RecordingFailure>,
    shutdown: Shutdown,
    policy: TerminalStatePolicy,
    registry: Option<Arc<SessionRegistry>>,
}

impl SessionActor {
    pub fn new(
        session: NegotiationSession,
        shutdown: Shutdown,
        policy: TerminalStatePolicy,
    ) -> Self {
        let failures = session.recorder().subscribe_failures();
        Self {
            session,
            failures,
            shutdown,
            policy,
            registry: None,
        }
    }

    /// Keep `registry` up to date with this session's negotiation state
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Run until the session ends, then tear it down.
    ///
    /// `inbound` yields text frames in arrival order. A transport-class error
    /// or the end of the stream ends the session; other errors are reported
    /// to the client and skipped.
    #[instrument(skip_all, fields(session_id = %self.session.id()))]
    pub async fn run<S>(mut self, mut inbound: S) -> ExitReason
    where
        S: Stream<Item = Result<String>> + Unpin + Send,
    {
        info!("Session started ({:?})", self.session.role());

        let reason = match self.session.begin().await {
            Err(e) => self.report(e).await,
            Ok(()) => None,
        };

        let reason = match reason {
            Some(reason) => reason,
            None => loop {
                self.publish_state();
                tokio::select! {
                    frame = inbound.next() => match frame {
                        Some(Ok(text)) => {
                            if let Some(reason) = self.on_text(&text).await {
                                break reason;
                            }
                        }
                        Some(Err(Error::ConnectionClosed(_))) | None => {
                            break ExitReason::ClientClosed;
                        }
                        Some(Err(e)) => {
                            if let Some(reason) = self.report(e).await {
                                break reason;
                            }
                        }
                    },
                    Some(event) = self.session.next_peer_event() => {
                        match self.session.handle_peer_event(event).await {
                            Ok(SessionFlow::Continue) => {}
                            Ok(SessionFlow::Terminate(reason)) => break reason,
                            Err(e) => {
                                if let Some(reason) = self.report(e).await {
                                    break reason;
                                }
                            }
                        }
                    }
                    failure = next_failure(&mut self.failures) => {
                        if let Some(reason) = self.report(failure.to_error()).await {
                            break reason;
                        }
                    }
                    _ = self.shutdown.wait() => break ExitReason::ServerShutdown,
                }
            },
        };

        self.session.teardown(&reason).await;
        self.publish_state();

        if matches!(reason, ExitReason::PeerState(_))
            && self.policy == TerminalStatePolicy::ShutdownServer
        {
            info!("Peer connection ended, shutting the server down");
            self.shutdown.trigger();
        }

        info!("Session ended: {}", reason);
        reason
    }

    async fn on_text(&mut self, text: &str) -> Option<ExitReason> {
        let msg = match SignalMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => return self.report(e).await,
        };
        match self.session.handle_signal(msg).await {
            Ok(()) => None,
            Err(e) => self.report(e).await,
        }
    }

    /// Tell the client about a recoverable error; a transport error ends the session
    async fn report(&mut self, err: Error) -> Option<ExitReason> {
        if err.is_fatal_to_session() {
            return Some(ExitReason::TransportError(err.to_string()));
        }
        warn!("Session {}: {}", self.session.id(), err);
        match self.session.outbound().send(ServerMessage::error(&err)).await {
            Ok(()) => None,
            Err(e) => Some(ExitReason::TransportError(e.to_string())),
        }
    }

    fn publish_state(&self) {
        if let Some(registry) = &self.registry {
            registry.update_state(self.session.id(), self.session.state());
        }
    }
}

async fn next_failure(rx: &mut broadcast::Receiver<RecordingFailure>) -> RecordingFailure {
    loop {
        match rx.recv().await {
            Ok(failure) => return failure,
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} recording failure notifications", missed);
            }
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
