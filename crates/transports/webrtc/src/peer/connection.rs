//! webrtc-rs implementation of the peer engine

use super::engine::{
    ChannelKind, ConnectivityState, DescriptionKind, PeerEngine, PeerEvent, PeerSession,
    SessionDescription, SessionHooks,
};
use super::intake::PacketSource;
use crate::config::{IntakeSource, NegotiationRole, SinkConfig};
use crate::session::SessionId;
use crate::signaling::protocol::IceCandidate;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

impl From<RTCIceConnectionState> for ConnectivityState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => {
                ConnectivityState::New
            }
            RTCIceConnectionState::Checking => ConnectivityState::Checking,
            RTCIceConnectionState::Connected => ConnectivityState::Connected,
            RTCIceConnectionState::Completed => ConnectivityState::Completed,
            RTCIceConnectionState::Disconnected => ConnectivityState::Disconnected,
            RTCIceConnectionState::Failed => ConnectivityState::Failed,
            RTCIceConnectionState::Closed => ConnectivityState::Closed,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl SessionDescription {
    fn to_rtc(&self) -> Result<RTCSessionDescription> {
        let parsed = match self.kind {
            DescriptionKind::Offer => RTCSessionDescription::offer(self.sdp.clone()),
            DescriptionKind::Answer => RTCSessionDescription::answer(self.sdp.clone()),
        };
        parsed.map_err(|e| Error::SdpError(format!("Failed to parse {:?}: {}", self.kind, e)))
    }
}

/// Builds one `RTCPeerConnection` per negotiation session
pub struct WebRtcEngine {
    config: Arc<SinkConfig>,
}

impl WebRtcEngine {
    pub fn new(config: Arc<SinkConfig>) -> Self {
        Self { config }
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(self.config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect()
    }
}

#[async_trait]
impl PeerEngine for WebRtcEngine {
    #[instrument(skip(self, hooks), fields(session_id = %session_id))]
    async fn new_session(
        &self,
        session_id: &SessionId,
        hooks: SessionHooks,
    ) -> Result<Arc<dyn PeerSession>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            Error::PeerConnectionError(format!("Failed to register codecs: {}", e))
        })?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::PeerConnectionError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(
            |e| Error::PeerConnectionError(format!("Failed to create peer connection: {}", e)),
        )?);

        register_hooks(&peer_connection, session_id, &hooks);

        if self.config.role == NegotiationRole::Offerer {
            declare_receive_side(&peer_connection, &hooks).await?;
        }

        info!("Created peer connection for session {}", session_id);

        Ok(Arc::new(WebRtcPeerSession {
            session_id: session_id.clone(),
            peer_connection,
        }))
    }
}

/// Route engine callbacks into the session's hooks
fn register_hooks(pc: &Arc<RTCPeerConnection>, session_id: &SessionId, hooks: &SessionHooks) {
    let candidate_hooks = hooks.clone();
    let sid = session_id.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let hooks = candidate_hooks.clone();
        let sid = sid.clone();
        Box::pin(async move {
            match candidate {
                Some(candidate) => match candidate.to_json() {
                    Ok(init) => hooks.emit(PeerEvent::LocalCandidate(Some(init.into()))),
                    Err(e) => warn!("Session {}: cannot serialize local candidate: {}", sid, e),
                },
                None => hooks.emit(PeerEvent::LocalCandidate(None)),
            }
        })
    }));

    let state_hooks = hooks.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        state_hooks.emit(PeerEvent::Connectivity(state.into()));
        Box::pin(async {})
    }));

    let channel_hooks = hooks.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let hooks = channel_hooks.clone();
        Box::pin(async move {
            wire_data_channel(dc, hooks);
        })
    }));

    let track_hooks = hooks.clone();
    let sid = session_id.clone();
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let hooks = track_hooks.clone();
        let sid = sid.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => ChannelKind::AudioTrack,
                _ => ChannelKind::VideoTrack,
            };
            let label = track.id();
            let wired = hooks.intake.claim(&label, kind);
            hooks.emit(PeerEvent::ChannelOpened {
                label: label.clone(),
                kind,
                wired,
            });
            if !wired {
                return;
            }

            debug!("Session {}: starting RTP read loop for track {}", sid, label);
            tokio::spawn(async move {
                let summary = hooks.intake.pump(RtpPayloadSource(track)).await;
                hooks.emit(PeerEvent::IntakeEnded {
                    label,
                    reason: summary.reason,
                });
            });
        })
    }));
}

/// Offer-side: announce what this server wants to receive before creating the offer
async fn declare_receive_side(pc: &Arc<RTCPeerConnection>, hooks: &SessionHooks) -> Result<()> {
    match hooks.intake.source().clone() {
        IntakeSource::AudioTrack => {
            pc.add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| {
                Error::PeerConnectionError(format!("Failed to add audio transceiver: {}", e))
            })?;
        }
        IntakeSource::DataChannel { label } => {
            let dc = pc.create_data_channel(&label, None).await.map_err(|e| {
                Error::PeerConnectionError(format!("Failed to create data channel: {}", e))
            })?;
            wire_data_channel(dc, hooks.clone());
        }
    }
    Ok(())
}

fn wire_data_channel(dc: Arc<RTCDataChannel>, hooks: SessionHooks) {
    let label = dc.label().to_string();
    let wired = hooks.intake.claim(&label, ChannelKind::Data);
    hooks.emit(PeerEvent::ChannelOpened {
        label: label.clone(),
        kind: ChannelKind::Data,
        wired,
    });
    if !wired {
        return;
    }

    let intake = Arc::clone(&hooks.intake);
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let intake = Arc::clone(&intake);
        Box::pin(async move {
            intake.deliver(&msg.data).await;
        })
    }));

    dc.on_close(Box::new(move || {
        hooks.emit(PeerEvent::IntakeEnded {
            label: label.clone(),
            reason: "data channel closed".to_string(),
        });
        Box::pin(async {})
    }));
}

struct RtpPayloadSource(Arc<TrackRemote>);

#[async_trait]
impl PacketSource for RtpPayloadSource {
    async fn next_payload(&mut self) -> Result<Bytes> {
        let (packet, _) = self
            .0
            .read_rtp()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("RTP read failed: {}", e)))?;
        Ok(packet.payload)
    }
}

/// One `RTCPeerConnection`, owned by a single negotiation session
pub struct WebRtcPeerSession {
    session_id: SessionId,
    peer_connection: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerSession for WebRtcPeerSession {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        debug!("Setting remote {:?} for session {}", desc.kind, self.session_id);
        self.peer_connection
            .set_remote_description(desc.to_rtc()?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(desc.to_rtc()?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        debug!(
            "Adding ICE candidate for session {}: {}",
            self.session_id, candidate.candidate
        );
        self.peer_connection
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection for session {}", self.session_id);
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close: {}", e)))
    }
}
