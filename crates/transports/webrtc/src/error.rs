//! Error types for the signaling gateway and recorder

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while relaying signaling or capturing media
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket read/write failure
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// The client connection is gone (outbound queue closed)
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Malformed or unrecognised signaling message
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Message not valid for the session's role or negotiation state
    #[error("Negotiation out of order: {0}")]
    NegotiationOrder(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Output file create/write/close failure
    #[error("Recording error: {0}")]
    RecordingError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification of errors, deciding what a session does with them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection read/write failure: ends the session
    Transport,
    /// Malformed message: dropped, session continues
    Decode,
    /// Description/candidate application failure: state unchanged
    Negotiation,
    /// File create/write/close failure: recording reset
    Recording,
    /// Anything else
    Internal,
}

impl Error {
    /// Map this error onto the session's handling taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::WebSocketError(_) | Error::ConnectionClosed(_) => ErrorClass::Transport,
            Error::DecodeError(_) | Error::SerializationError(_) => ErrorClass::Decode,
            Error::SdpError(_)
            | Error::IceCandidateError(_)
            | Error::NegotiationOrder(_)
            | Error::PeerConnectionError(_) => ErrorClass::Negotiation,
            Error::RecordingError(_) => ErrorClass::Recording,
            Error::InvalidConfig(_) | Error::IoError(_) | Error::Other(_) => ErrorClass::Internal,
        }
    }

    /// Transport failures terminate the session and are never retried
    pub fn is_fatal_to_session(&self) -> bool {
        self.class() == ErrorClass::Transport
    }

    /// Errors the session reports to the client and then carries on from
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Decode | ErrorClass::Negotiation | ErrorClass::Recording
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocketError(err.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::PeerConnectionError(err.to_string())
    }
}
