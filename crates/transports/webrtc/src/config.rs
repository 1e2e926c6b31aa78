//! Configuration types for the signaling gateway and recorder

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Main configuration for the media sink server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Address the signaling server listens on (default: 0.0.0.0:8080)
    pub listen_addr: String,

    /// Path clients upgrade on (default: /ws)
    pub ws_path: String,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Which side of the negotiation this server plays (default: answerer)
    pub role: NegotiationRole,

    /// Which inbound channel is persisted (default: data channel "video")
    pub intake: IntakeSource,

    /// Output file settings
    pub recording: RecordingConfig,

    /// What a failed/disconnected peer does to the server (default: close the session)
    pub on_terminal_state: TerminalStatePolicy,

    /// Bounded depth of each connection's outbound message queue (default: 128)
    pub outbound_queue_depth: usize,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Negotiation role, fixed per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationRole {
    /// Client offers, server answers
    #[default]
    Answerer,
    /// Server offers as soon as the client connects, client answers
    Offerer,
}

/// The single inbound stream wired to the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntakeSource {
    /// Binary messages of the data channel with this label
    DataChannel { label: String },
    /// RTP payloads of the first inbound audio track
    AudioTrack,
}

impl Default for IntakeSource {
    fn default() -> Self {
        IntakeSource::DataChannel {
            label: "video".to_string(),
        }
    }
}

/// Output file settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Directory new recordings are created in (default: current directory)
    pub output_dir: PathBuf,

    /// File name prefix (default: recording)
    pub file_prefix: String,

    /// File extension without the dot (default: webm)
    pub extension: String,

    /// One recorder per session, or one for the whole process
    pub scope: RecordingScope,
}

/// Recorder ownership policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingScope {
    /// Every negotiation session owns its own recorder
    #[default]
    PerSession,
    /// All sessions share a single process-wide recorder
    Shared,
}

/// Reaction to a failed/disconnected peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatePolicy {
    /// Tear the session down, keep serving other clients
    #[default]
    CloseSession,
    /// Tear the session down and gracefully stop the whole server
    ShutdownServer,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            ws_path: "/ws".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            role: NegotiationRole::Answerer,
            intake: IntakeSource::default(),
            recording: RecordingConfig::default(),
            on_terminal_state: TerminalStatePolicy::CloseSession,
            outbound_queue_depth: 128,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            file_prefix: "recording".to_string(),
            extension: "webm".to_string(),
            scope: RecordingScope::PerSession,
        }
    }
}

impl SinkConfig {
    /// Load a configuration from a TOML file.
    ///
    /// Missing keys fall back to their defaults. The result is not validated;
    /// call [`SinkConfig::validate`] after layering any overrides.
    pub fn from_toml_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        use crate::Error;

        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> crate::Result<Self> {
        toml::from_str(text).map_err(|e| crate::Error::InvalidConfig(e.to_string()))
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `listen_addr` is not a socket address
    /// - `ws_path` does not start with `/`
    /// - no STUN or TURN server is configured
    /// - a STUN URL lacks `stun:`/`stuns:` or a TURN URL lacks `turn:`/`turns:`
    /// - the data channel label, file prefix or extension is empty
    /// - `outbound_queue_depth` is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        self.socket_addr()?;

        if !self.ws_path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "ws_path must start with '/', got {}",
                self.ws_path
            )));
        }

        if self.stun_servers.is_empty() && self.turn_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN or TURN server is required".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        if let IntakeSource::DataChannel { label } = &self.intake {
            if label.is_empty() {
                return Err(Error::InvalidConfig(
                    "data channel label must not be empty".to_string(),
                ));
            }
        }

        if self.recording.file_prefix.is_empty() {
            return Err(Error::InvalidConfig(
                "recording.file_prefix must not be empty".to_string(),
            ));
        }

        if self.recording.extension.is_empty() {
            return Err(Error::InvalidConfig(
                "recording.extension must not be empty".to_string(),
            ));
        }

        if self.outbound_queue_depth == 0 {
            return Err(Error::InvalidConfig(
                "outbound_queue_depth must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed listen address
    pub fn socket_addr(&self) -> crate::Result<SocketAddr> {
        self.listen_addr.parse().map_err(|e| {
            crate::Error::InvalidConfig(format!(
                "listen_addr must be host:port, got {} ({})",
                self.listen_addr, e
            ))
        })
    }

    /// Preset matching a single ephemeral browser session: the browser offers
    /// a "video" data channel, every session writes through one shared
    /// recorder, and a failed peer stops the server.
    ///
    /// # Example
    ///
    /// ```
    /// use mediasink_webrtc::config::{RecordingScope, SinkConfig, TerminalStatePolicy};
    ///
    /// let config = SinkConfig::single_session_preset();
    /// assert_eq!(config.recording.scope, RecordingScope::Shared);
    /// assert_eq!(config.on_terminal_state, TerminalStatePolicy::ShutdownServer);
    /// ```
    pub fn single_session_preset() -> Self {
        Self {
            recording: RecordingConfig {
                scope: RecordingScope::Shared,
                ..RecordingConfig::default()
            },
            on_terminal_state: TerminalStatePolicy::ShutdownServer,
            ..Self::default()
        }
    }

    /// Preset for capturing a remote microphone: the server offers a
    /// receive-only audio transceiver and records raw RTP payloads.
    ///
    /// # Example
    ///
    /// ```
    /// use mediasink_webrtc::config::{IntakeSource, NegotiationRole, SinkConfig};
    ///
    /// let config = SinkConfig::audio_capture_preset();
    /// assert_eq!(config.role, NegotiationRole::Offerer);
    /// assert_eq!(config.intake, IntakeSource::AudioTrack);
    /// assert_eq!(config.recording.extension, "raw");
    /// ```
    pub fn audio_capture_preset() -> Self {
        Self {
            role: NegotiationRole::Offerer,
            intake: IntakeSource::AudioTrack,
            recording: RecordingConfig {
                file_prefix: "audio".to_string(),
                extension: "raw".to_string(),
                ..RecordingConfig::default()
            },
            ..Self::default()
        }
    }

    /// Set the listen address
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Replace the STUN server list
    pub fn with_stun_servers(mut self, servers: Vec<String>) -> Self {
        self.stun_servers = servers;
        self
    }

    /// Add TURN servers to configuration
    pub fn with_turn_servers(mut self, servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = servers;
        self
    }

    /// Set the negotiation role
    pub fn with_role(mut self, role: NegotiationRole) -> Self {
        self.role = role;
        self
    }

    /// Set the inbound stream that gets recorded
    pub fn with_intake(mut self, intake: IntakeSource) -> Self {
        self.intake = intake;
        self
    }

    /// Set the directory recordings are written to
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recording.output_dir = dir.into();
        self
    }

    /// Set the recorder scope
    pub fn with_recording_scope(mut self, scope: RecordingScope) -> Self {
        self.recording.scope = scope;
        self
    }

    /// Set the terminal-state policy
    pub fn with_terminal_state_policy(mut self, policy: TerminalStatePolicy) -> Self {
        self.on_terminal_state = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SinkConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.role, NegotiationRole::Answerer);
        assert_eq!(
            config.intake,
            IntakeSource::DataChannel {
                label: "video".to_string()
            }
        );
        assert_eq!(config.recording.extension, "webm");
        assert_eq!(config.recording.scope, RecordingScope::PerSession);
        assert_eq!(config.outbound_queue_depth, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_listen_addr() {
        let config = SinkConfig::default().with_listen_addr("localhost");
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_validate_requires_ice_server() {
        let config = SinkConfig::default().with_stun_servers(Vec::new());
        assert!(config.validate().is_err());

        let config = SinkConfig::default()
            .with_stun_servers(Vec::new())
            .with_turn_servers(vec![TurnServerConfig {
                url: "turn:turn.example.com:3478".to_string(),
                username: "user".to_string(),
                credential: "pass".to_string(),
            }]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_url_schemes() {
        let config =
            SinkConfig::default().with_stun_servers(vec!["http://stun.example.com".to_string()]);
        assert!(config.validate().is_err());

        let config = SinkConfig::default().with_turn_servers(vec![TurnServerConfig {
            url: "stun:wrong.example.com".to_string(),
            username: String::new(),
            credential: String::new(),
        }]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        let config = SinkConfig::default().with_intake(IntakeSource::DataChannel {
            label: String::new(),
        });
        assert!(config.validate().is_err());

        let mut config = SinkConfig::default();
        config.recording.file_prefix.clear();
        assert!(config.validate().is_err());

        let mut config = SinkConfig::default();
        config.recording.extension.clear();
        assert!(config.validate().is_err());

        let mut config = SinkConfig::default();
        config.outbound_queue_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_presets_validate() {
        assert!(SinkConfig::single_session_preset().validate().is_ok());
        assert!(SinkConfig::audio_capture_preset().validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial_uses_defaults() {
        let config = SinkConfig::from_toml_str(
            r#"
            listen_addr = "127.0.0.1:9000"
            role = "offerer"
            on_terminal_state = "shutdown_server"

            [intake]
            kind = "audio_track"

            [recording]
            output_dir = "/tmp/captures"
            scope = "shared"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.role, NegotiationRole::Offerer);
        assert_eq!(config.intake, IntakeSource::AudioTrack);
        assert_eq!(config.on_terminal_state, TerminalStatePolicy::ShutdownServer);
        assert_eq!(config.recording.output_dir, PathBuf::from("/tmp/captures"));
        assert_eq!(config.recording.scope, RecordingScope::Shared);
        assert_eq!(config.recording.file_prefix, "recording");
        assert_eq!(config.ws_path, "/ws");
    }

    #[test]
    fn test_from_toml_data_channel_label() {
        let config = SinkConfig::from_toml_str(
            r#"
            [intake]
            kind = "data_channel"
            label = "videoChannel"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.intake,
            IntakeSource::DataChannel {
                label: "videoChannel".to_string()
            }
        );
    }

    #[test]
    fn test_from_toml_rejects_unknown_role() {
        let err = SinkConfig::from_toml_str(r#"role = "both""#).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sink.toml");
        std::fs::write(&path, "outbound_queue_depth = 16\n").unwrap();

        let config = SinkConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.outbound_queue_depth, 16);

        let missing = SinkConfig::from_toml_file(dir.path().join("missing.toml"));
        assert!(missing.is_err());
    }
}
