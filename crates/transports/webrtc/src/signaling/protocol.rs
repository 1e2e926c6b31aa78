//! Signaling wire format
//!
//! Every frame is one JSON object discriminated by `type`:
//!
//! ```text
//! { "type": "offer"|"answer", "sdp": "<session description>" }
//! { "type": "candidate", "candidate": "<ICE candidate>", "sdpMid": "0", "sdpMLineIndex": 0, "usernameFragment": "..." }
//! { "type": "start-recording" } / { "type": "stop-recording" }
//! ```
//!
//! The server answers with the same `offer`/`answer`/`candidate` shapes plus
//! `recording-started`, `recording-stopped` and `error`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One discovered network path, as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line (e.g. "candidate:1 1 udp 2122260223 ...")
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the m-line this candidate belongs to
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    /// ICE username fragment
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the attribute line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Client → server signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    /// Remote session description offer
    Offer { sdp: String },
    /// Remote session description answer (offer-side role only)
    Answer { sdp: String },
    /// Remote connectivity candidate
    Candidate(IceCandidate),
    /// Open a recording file
    StartRecording,
    /// Close the recording file
    StopRecording,
}

impl SignalMessage {
    /// Wire discriminant, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate(_) => "candidate",
            SignalMessage::StartRecording => "start-recording",
            SignalMessage::StopRecording => "stop-recording",
        }
    }

    /// Decode one text frame.
    ///
    /// Candidates are accepted flat (`"candidate": "<string>"` with sibling
    /// `sdpMid`/`sdpMLineIndex`/`usernameFragment`) or nested
    /// (`"candidate": { "candidate": ..., "sdpMid": ... }`). An `sdp` given as a
    /// `{ "type", "sdp" }` description object is also accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecodeError`] for malformed JSON, unknown types, and
    /// messages whose `sdp`/`candidate` fields do not match their type.
    pub fn from_json(text: &str) -> Result<Self> {
        let wire: InboundFrame = serde_json::from_str(text)
            .map_err(|e| Error::DecodeError(format!("malformed signaling message: {}", e)))?;
        wire.into_message()
    }
}

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    sdp: Option<SdpField>,
    #[serde(default)]
    candidate: Option<CandidateField>,
    #[serde(rename = "sdpMid", default)]
    sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default)]
    username_fragment: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SdpField {
    Text(String),
    Description { sdp: String },
}

impl SdpField {
    fn into_text(self) -> String {
        match self {
            SdpField::Text(sdp) | SdpField::Description { sdp } => sdp,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateField {
    Flat(String),
    Nested(IceCandidate),
}

impl InboundFrame {
    fn into_message(self) -> Result<SignalMessage> {
        match self.kind.as_str() {
            "offer" | "answer" => {
                if self.candidate.is_some() {
                    return Err(Error::DecodeError(format!(
                        "{} must not carry a candidate",
                        self.kind
                    )));
                }
                let sdp = self
                    .sdp
                    .map(SdpField::into_text)
                    .filter(|sdp| !sdp.is_empty())
                    .ok_or_else(|| Error::DecodeError(format!("{} without sdp", self.kind)))?;
                if self.kind == "offer" {
                    Ok(SignalMessage::Offer { sdp })
                } else {
                    Ok(SignalMessage::Answer { sdp })
                }
            }
            "candidate" => {
                if self.sdp.is_some() {
                    return Err(Error::DecodeError(
                        "candidate must not carry an sdp".to_string(),
                    ));
                }
                let candidate = match self.candidate {
                    Some(CandidateField::Flat(candidate)) => IceCandidate {
                        candidate,
                        sdp_mid: self.sdp_mid,
                        sdp_mline_index: self.sdp_mline_index,
                        username_fragment: self.username_fragment,
                    },
                    Some(CandidateField::Nested(nested)) => IceCandidate {
                        sdp_mid: nested.sdp_mid.or(self.sdp_mid),
                        sdp_mline_index: nested.sdp_mline_index.or(self.sdp_mline_index),
                        username_fragment: nested.username_fragment.or(self.username_fragment),
                        candidate: nested.candidate,
                    },
                    None => {
                        return Err(Error::DecodeError(
                            "candidate message without candidate".to_string(),
                        ))
                    }
                };
                Ok(SignalMessage::Candidate(candidate))
            }
            "start-recording" | "stop-recording" => {
                if self.sdp.is_some() || self.candidate.is_some() {
                    return Err(Error::DecodeError(format!(
                        "{} takes no sdp or candidate",
                        self.kind
                    )));
                }
                if self.kind == "start-recording" {
                    Ok(SignalMessage::StartRecording)
                } else {
                    Ok(SignalMessage::StopRecording)
                }
            }
            other => Err(Error::DecodeError(format!(
                "unknown message type '{}'",
                other
            ))),
        }
    }
}

/// Server → client signaling message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Local offer (offer-side role)
    Offer { sdp: String },
    /// Local answer to the client's offer
    Answer { sdp: String },
    /// Locally gathered candidate, flat form
    Candidate(IceCandidate),
    /// Acknowledges `start-recording`
    RecordingStarted,
    /// Acknowledges `stop-recording`
    RecordingStopped,
    /// A message could not be applied
    Error { detail: String },
}

impl ServerMessage {
    /// Error notification carrying the error's display text
    pub fn error(err: &Error) -> Self {
        ServerMessage::Error {
            detail: err.to_string(),
        }
    }

    /// Wire discriminant, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::Candidate(_) => "candidate",
            ServerMessage::RecordingStarted => "recording-started",
            ServerMessage::RecordingStopped => "recording-stopped",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Only the discriminant of a frame; the relay forwards everything else verbatim
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Envelope {
    /// Read the `type` of a frame
    pub fn peek(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::DecodeError(format!("malformed signaling message: {}", e)))
    }

    /// Whether a relay forwards this message type
    pub fn is_negotiation(&self) -> bool {
        matches!(self.kind.as_str(), "offer" | "answer" | "candidate")
    }
}
