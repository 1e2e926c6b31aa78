//! Per-connection negotiation state machine

use super::{ExitReason, NegotiationState, SessionId};
use crate::config::NegotiationRole;
use crate::peer::{
    ChannelIntake, LifecycleAction, LifecycleMonitor, PeerEngine, PeerEvent, PeerEventReceiver,
    PeerSession, SessionDescription, SessionHooks,
};
use crate::recording::{Recorder, StartOutcome, StopOutcome};
use crate::signaling::outbound::Outbound;
use crate::signaling::protocol::{IceCandidate, ServerMessage, SignalMessage};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Whether the session keeps running after an engine event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    Terminate(ExitReason),
}

/// Mediates signaling messages against exactly one peer-session handle.
///
/// Only one negotiation round is supported; the role is fixed at construction.
///
/// Each handle reports through its own event queue, held here next to the
/// handle. Releasing the handle drops the queue, so events a discarded handle
/// already raised are never acted on.
pub struct NegotiationSession {
    id: SessionId,
    role: NegotiationRole,
    state: NegotiationState,
    engine: Arc<dyn PeerEngine>,
    peer: Option<Arc<dyn PeerSession>>,
    events: Option<PeerEventReceiver>,
    intake: Arc<ChannelIntake>,
    outbound: Outbound,
    monitor: LifecycleMonitor,
    owns_recorder: bool,
    handles_created: u64,
    torn_down: bool,
}

impl NegotiationSession {
    pub fn new(
        id: SessionId,
        role: NegotiationRole,
        engine: Arc<dyn PeerEngine>,
        intake: Arc<ChannelIntake>,
        outbound: Outbound,
    ) -> Self {
        let monitor = LifecycleMonitor::new(id.as_str());
        Self {
            id,
            role,
            state: NegotiationState::Idle,
            engine,
            peer: None,
            events: None,
            intake,
            outbound,
            monitor,
            owns_recorder: true,
            handles_created: 0,
            torn_down: false,
        }
    }

    /// Whether a client-side or server-side exit stops the recorder. A shared
    /// recorder is left to the server to stop then; a terminal peer state
    /// stops it regardless.
    pub fn with_recorder_ownership(mut self, owns: bool) -> Self {
        self.owns_recorder = owns;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    /// Number of peer-session handles this session has constructed
    pub fn handles_created(&self) -> u64 {
        self.handles_created
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        self.intake.recorder()
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Start negotiating if this side offers; no-op for the answering side
    pub async fn begin(&mut self) -> Result<()> {
        if self.role != NegotiationRole::Offerer || self.state != NegotiationState::Idle {
            return Ok(());
        }

        let peer = self.open_peer().await?;
        let offered = async {
            let offer = peer.create_offer().await?;
            peer.set_local_description(offer.clone()).await?;
            Ok::<_, Error>(offer)
        }
        .await;

        match offered {
            Ok(offer) => {
                self.state = NegotiationState::OfferSent;
                info!("Session {}: offer created, sending to client", self.id);
                self.outbound
                    .send(ServerMessage::Offer { sdp: offer.sdp })
                    .await
            }
            Err(e) => {
                self.release_peer().await;
                Err(e)
            }
        }
    }

    /// Apply one client message.
    ///
    /// # Errors
    ///
    /// Negotiation and recording errors leave the negotiation state as it
    /// was; the caller reports them to the client. Transport errors mean the
    /// reply could not be queued.
    pub async fn handle_signal(&mut self, msg: SignalMessage) -> Result<()> {
        debug!("Session {}: handling {} in state {}", self.id, msg.kind(), self.state);
        match msg {
            SignalMessage::Offer { sdp } => self.handle_offer(sdp).await,
            SignalMessage::Answer { sdp } => self.handle_answer(sdp).await,
            SignalMessage::Candidate(candidate) => self.handle_candidate(candidate).await,
            SignalMessage::StartRecording => self.handle_start_recording().await,
            SignalMessage::StopRecording => self.handle_stop_recording().await,
        }
    }

    async fn handle_offer(&mut self, sdp: String) -> Result<()> {
        if self.role != NegotiationRole::Answerer {
            return Err(Error::NegotiationOrder(
                "offer received, but this server sends the offer".to_string(),
            ));
        }
        if self.state != NegotiationState::Idle {
            return Err(Error::NegotiationOrder(format!(
                "offer received in state {}; renegotiation is not supported",
                self.state
            )));
        }

        let peer = self.open_peer().await?;
        self.state = NegotiationState::OfferReceived;

        let answered = async {
            peer.set_remote_description(SessionDescription::offer(sdp))
                .await?;
            let answer = peer.create_answer().await?;
            peer.set_local_description(answer.clone()).await?;
            Ok::<_, Error>(answer)
        }
        .await;

        match answered {
            Ok(answer) => {
                self.state = NegotiationState::AnswerSent;
                info!("Session {}: answer created, sending to client", self.id);
                self.outbound
                    .send(ServerMessage::Answer { sdp: answer.sdp })
                    .await
            }
            Err(e) => {
                self.state = NegotiationState::Idle;
                self.release_peer().await;
                Err(e)
            }
        }
    }

    async fn handle_answer(&mut self, sdp: String) -> Result<()> {
        if self.role != NegotiationRole::Offerer {
            return Err(Error::NegotiationOrder(
                "answer received, but this server answers offers".to_string(),
            ));
        }
        if self.state != NegotiationState::OfferSent {
            return Err(Error::NegotiationOrder(format!(
                "answer received in state {}",
                self.state
            )));
        }
        let peer = self.peer.clone().ok_or_else(|| {
            Error::NegotiationOrder("answer received without a pending offer".to_string())
        })?;

        peer.set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.state = NegotiationState::Complete;
        info!("Session {}: negotiation complete", self.id);
        Ok(())
    }

    async fn handle_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        match &self.peer {
            Some(peer) => peer.add_candidate(candidate).await,
            None => {
                debug!(
                    "Session {}: candidate arrived before negotiation started, discarding",
                    self.id
                );
                Ok(())
            }
        }
    }

    async fn handle_start_recording(&mut self) -> Result<()> {
        match self.recorder().start().await? {
            StartOutcome::Started(path) => {
                info!("Session {}: recording to {}", self.id, path.display())
            }
            StartOutcome::AlreadyRecording(path) => {
                debug!("Session {}: already recording to {}", self.id, path.display())
            }
        }
        self.outbound.send(ServerMessage::RecordingStarted).await
    }

    async fn handle_stop_recording(&mut self) -> Result<()> {
        if let StopOutcome::Stopped {
            path,
            bytes_written,
        } = self.recorder().stop().await?
        {
            info!(
                "Session {}: recording {} closed ({} bytes)",
                self.id,
                path.display(),
                bytes_written
            );
        }
        self.outbound.send(ServerMessage::RecordingStopped).await
    }

    /// Next event from the current handle; pending while there is none
    pub async fn next_peer_event(&mut self) -> Option<PeerEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Apply one engine event
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<SessionFlow> {
        match event {
            PeerEvent::LocalCandidate(Some(candidate)) if !candidate.candidate.is_empty() => {
                self.outbound
                    .send(ServerMessage::Candidate(candidate))
                    .await?;
            }
            PeerEvent::LocalCandidate(_) => {
                debug!("Session {}: ICE gathering complete", self.id);
            }
            PeerEvent::Connectivity(state) => match self.monitor.observe(state) {
                LifecycleAction::Teardown => {
                    return Ok(SessionFlow::Terminate(ExitReason::PeerState(state)));
                }
                LifecycleAction::Ready | LifecycleAction::None => {}
            },
            PeerEvent::ChannelOpened { label, kind, wired } => {
                info!(
                    "Session {}: remote opened {:?} '{}' (wired: {})",
                    self.id, kind, label, wired
                );
            }
            PeerEvent::IntakeEnded { label, reason } => {
                info!("Session {}: intake '{}' ended: {}", self.id, label, reason);
            }
        }
        Ok(SessionFlow::Continue)
    }

    /// Stop recording and release the peer-session handle. Idempotent.
    ///
    /// A terminal peer state always stops the recorder, shared or not; other
    /// exits stop it only if this session owns it.
    pub async fn teardown(&mut self, reason: &ExitReason) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        info!("Session {}: tearing down ({})", self.id, reason);

        if self.owns_recorder || matches!(reason, ExitReason::PeerState(_)) {
            if let Err(e) = self.recorder().stop().await {
                warn!("Session {}: failed to stop recording: {}", self.id, e);
            }
        }
        self.release_peer().await;
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    async fn open_peer(&mut self) -> Result<Arc<dyn PeerSession>> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let hooks = SessionHooks {
            events: events_tx,
            intake: Arc::clone(&self.intake),
        };
        let peer = self.engine.new_session(&self.id, hooks).await?;
        self.handles_created += 1;
        self.peer = Some(Arc::clone(&peer));
        self.events = Some(events_rx);
        Ok(peer)
    }

    async fn release_peer(&mut self) {
        if let Some(mut events) = self.events.take() {
            events.close();
            let mut stale = 0;
            while events.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                debug!(
                    "Session {}: discarded {} events from released peer connection",
                    self.id, stale
                );
            }
        }
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!("Session {}: failed to close peer connection: {}", self.id, e);
            }
        }
    }
}
