//! In-process fake peer engine
//!
//! Implements [`PeerEngine`]/[`PeerSession`] without any networking. Every
//! call is recorded, and tests drive the engine side of a session by
//! injecting candidates, connectivity changes, channels and payloads through
//! the same hooks a real engine would use.

use crate::peer::{
    ChannelKind, ConnectivityState, PeerEngine, PeerEvent, PeerSession, SessionDescription,
    SessionHooks,
};
use crate::recording::{AppendOutcome, Recorder};
use crate::session::SessionId;
use crate::signaling::protocol::IceCandidate;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One recorded call on a [`FakePeerSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    SetRemote(SessionDescription),
    CreateAnswer,
    CreateOffer,
    SetLocal(SessionDescription),
    AddCandidate(IceCandidate),
    Close,
}

#[derive(Default)]
struct Controls {
    fail_next_session: AtomicBool,
    fail_remote_descriptions: AtomicBool,
    fail_candidates: AtomicBool,
}

/// Engine handing out [`FakePeerSession`]s
#[derive(Default)]
pub struct FakeEngine {
    controls: Arc<Controls>,
    sessions: Mutex<Vec<Arc<FakePeerSession>>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `new_session` call fail
    pub fn fail_next_session(&self) {
        self.controls.fail_next_session.store(true, Ordering::SeqCst);
    }

    /// Make `set_remote_description` fail on every session
    pub fn fail_remote_descriptions(&self, fail: bool) {
        self.controls
            .fail_remote_descriptions
            .store(fail, Ordering::SeqCst);
    }

    /// Make `add_candidate` fail on every session
    pub fn fail_candidates(&self, fail: bool) {
        self.controls.fail_candidates.store(fail, Ordering::SeqCst);
    }

    /// Sessions created so far, in creation order
    pub fn sessions(&self) -> Vec<Arc<FakePeerSession>> {
        self.sessions.lock().clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn last_session(&self) -> Option<Arc<FakePeerSession>> {
        self.sessions.lock().last().cloned()
    }

    /// Poll until at least `count` sessions exist
    pub async fn wait_for_sessions(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Option<Arc<FakePeerSession>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.session_count() >= count {
                return self.sessions.lock().get(count - 1).cloned();
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl PeerEngine for FakeEngine {
    async fn new_session(
        &self,
        session_id: &SessionId,
        hooks: SessionHooks,
    ) -> Result<Arc<dyn PeerSession>> {
        if self.controls.fail_next_session.swap(false, Ordering::SeqCst) {
            return Err(Error::PeerConnectionError(
                "fake engine refused to create a session".to_string(),
            ));
        }
        let session = Arc::new(FakePeerSession {
            session_id: session_id.clone(),
            hooks,
            controls: Arc::clone(&self.controls),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

/// Recording stand-in for a peer connection
pub struct FakePeerSession {
    session_id: SessionId,
    hooks: SessionHooks,
    controls: Arc<Controls>,
    calls: Mutex<Vec<FakeCall>>,
    closed: AtomicBool,
}

impl FakePeerSession {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().clone()
    }

    /// Candidates the session applied
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                FakeCall::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// SDP this session produces as its answer
    pub fn answer_sdp(&self) -> String {
        format!(
            "v=0\r\no=- {} 1 IN IP4 127.0.0.1\r\ns=fake-answer\r\n",
            self.session_id
        )
    }

    /// SDP this session produces as its offer
    pub fn offer_sdp(&self) -> String {
        format!(
            "v=0\r\no=- {} 1 IN IP4 127.0.0.1\r\ns=fake-offer\r\n",
            self.session_id
        )
    }

    /// Act as if a local candidate was gathered (`None` ends gathering)
    pub fn emit_candidate(&self, candidate: Option<IceCandidate>) {
        self.hooks.emit(PeerEvent::LocalCandidate(candidate));
    }

    /// Act as if ICE connectivity changed
    pub fn emit_connectivity(&self, state: ConnectivityState) {
        self.hooks.emit(PeerEvent::Connectivity(state));
    }

    /// Act as if the remote opened a channel; returns whether it was wired
    pub fn open_channel(&self, label: &str, kind: ChannelKind) -> bool {
        let wired = self.hooks.intake.claim(label, kind);
        self.hooks.emit(PeerEvent::ChannelOpened {
            label: label.to_string(),
            kind,
            wired,
        });
        wired
    }

    /// Recorder the session's intake feeds
    pub fn recorder(&self) -> &Arc<Recorder> {
        self.hooks.intake.recorder()
    }

    /// Deliver a payload on the wired channel
    pub async fn deliver(&self, payload: &[u8]) -> AppendOutcome {
        self.hooks.intake.deliver(payload).await
    }

    fn record(&self, call: FakeCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PeerSession for FakePeerSession {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(FakeCall::SetRemote(desc));
        if self.controls.fail_remote_descriptions.load(Ordering::SeqCst) {
            return Err(Error::SdpError("fake remote description rejected".to_string()));
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(FakeCall::CreateAnswer);
        Ok(SessionDescription::answer(self.answer_sdp()))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(FakeCall::CreateOffer);
        Ok(SessionDescription::offer(self.offer_sdp()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(FakeCall::SetLocal(desc));
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.controls.fail_candidates.load(Ordering::SeqCst) {
            return Err(Error::IceCandidateError(format!(
                "fake engine rejected {}",
                candidate.candidate
            )));
        }
        self.record(FakeCall::AddCandidate(candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(FakeCall::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
