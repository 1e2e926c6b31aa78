//! WebRTC sink server binary entry point
//!
//! Runs the signaling gateway that negotiates WebRTC sessions with clients and
//! records the media they send.
//!
//! # Usage
//!
//! ```bash
//! # Accept clients on 0.0.0.0:8080/ws, record each session to ./recordings
//! cargo run -p mediasink-webrtc-server -- serve --output-dir ./recordings
//!
//! # Single ephemeral session: one shared file, stop when the peer goes away
//! cargo run -p mediasink-webrtc-server -- \
//!   --recording-scope shared --exit-on-disconnect serve
//!
//! # Offer an audio track to a client reached through a relay
//! cargo run -p mediasink-webrtc-server -- \
//!   --role offerer --intake audio-track \
//!   dial --url ws://localhost:3000
//!
//! # Plain signaling relay between browser peers
//! cargo run -p mediasink-webrtc-server -- --listen 0.0.0.0:3000 relay
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mediasink_webrtc::{
    dial, IntakeSource, NegotiationRole, RecordingScope, Shutdown, SignalingRelay, SinkConfig,
    TerminalStatePolicy, WebRtcEngine, WebSocketSignalingServer,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// MediaSink WebRTC Server
///
/// Signaling gateway and media-capture sink. Flags override values from
/// the config file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "MEDIASINK_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "MEDIASINK_LOG_FORMAT")]
    log_format: LogFormat,

    /// Listen address (host:port)
    #[arg(long, env = "MEDIASINK_LISTEN")]
    listen: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "MEDIASINK_STUN_SERVERS")]
    stun_servers: Option<Vec<String>>,

    /// Which side creates the offer
    #[arg(long, value_enum, env = "MEDIASINK_ROLE")]
    role: Option<RoleArg>,

    /// What inbound media is recorded
    #[arg(long, value_enum, env = "MEDIASINK_INTAKE")]
    intake: Option<IntakeArg>,

    /// Data channel label to record (data-channel intake)
    #[arg(long, env = "MEDIASINK_CHANNEL_LABEL")]
    channel_label: Option<String>,

    /// Directory recordings are written to
    #[arg(long, env = "MEDIASINK_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Recording file name prefix
    #[arg(long, env = "MEDIASINK_FILE_PREFIX")]
    file_prefix: Option<String>,

    /// One recorder per session, or one shared by every session
    #[arg(long, value_enum, env = "MEDIASINK_RECORDING_SCOPE")]
    recording_scope: Option<ScopeArg>,

    /// Shut the server down when a peer connection fails or closes
    #[arg(long, env = "MEDIASINK_EXIT_ON_DISCONNECT")]
    exit_on_disconnect: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug, Clone)]
enum Mode {
    /// Accept client connections and negotiate a session with each
    Serve,
    /// Connect out to a signaling endpoint and negotiate one session
    Dial {
        /// WebSocket URL to connect to
        #[arg(long, env = "MEDIASINK_DIAL_URL")]
        url: String,
    },
    /// Forward offer/answer/candidate messages between connected clients
    Relay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RoleArg {
    Answerer,
    Offerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum IntakeArg {
    DataChannel,
    AudioTrack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScopeArg {
    PerSession,
    Shared,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    init_tracing(args.log_format)?;

    let shutdown = Shutdown::new();
    let shutdown_handler = shutdown.clone();
    let interrupted = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            eprintln!("Second Ctrl+C received, forcing exit");
            std::process::exit(130);
        }
        eprintln!("Ctrl+C received, shutting down (press again to force)");
        shutdown_handler.trigger();
    })
    .context("failed to set Ctrl+C handler")?;

    // Create multi-threaded tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("webrtc-worker")
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async_main(args, shutdown))
}

async fn async_main(args: Args, shutdown: Shutdown) -> Result<()> {
    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?args.mode,
        listen = %config.listen_addr,
        role = ?config.role,
        intake = ?config.intake,
        output_dir = %config.recording.output_dir.display(),
        scope = ?config.recording.scope,
        "MediaSink WebRTC server starting"
    );

    match args.mode {
        Mode::Serve => {
            let engine = Arc::new(WebRtcEngine::new(Arc::new(config.clone())));
            let handle = WebSocketSignalingServer::with_shutdown(config, engine, shutdown)
                .start()
                .await
                .context("failed to start signaling server")?;
            info!("Server running. Press Ctrl+C to shutdown.");
            handle.wait().await;
        }
        Mode::Dial { url } => {
            let engine = Arc::new(WebRtcEngine::new(Arc::new(config.clone())));
            let reason = dial(&url, config, engine, shutdown)
                .await
                .with_context(|| format!("dial session with {} failed", url))?;
            info!("Dial session ended: {}", reason);
        }
        Mode::Relay => {
            let handle = SignalingRelay::new(config, shutdown)
                .start()
                .await
                .context("failed to start signaling relay")?;
            info!("Relay running. Press Ctrl+C to shutdown.");
            handle.wait().await;
        }
    }

    info!("MediaSink WebRTC server shut down gracefully");
    Ok(())
}

/// Config file values (or defaults) with command line flags layered on top
fn load_config(args: &Args) -> Result<SinkConfig> {
    let mut config = match &args.config {
        Some(path) => SinkConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SinkConfig::default(),
    };

    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(stun) = &args.stun_servers {
        config.stun_servers = stun.clone();
    }
    if let Some(role) = args.role {
        config.role = match role {
            RoleArg::Answerer => NegotiationRole::Answerer,
            RoleArg::Offerer => NegotiationRole::Offerer,
        };
    }
    if let Some(intake) = args.intake {
        config.intake = match intake {
            IntakeArg::DataChannel => IntakeSource::default(),
            IntakeArg::AudioTrack => {
                // raw RTP payloads are not a container format
                config.recording.extension = "raw".to_string();
                IntakeSource::AudioTrack
            }
        };
    }
    if let Some(label) = &args.channel_label {
        match &mut config.intake {
            IntakeSource::DataChannel { label: current } => *current = label.clone(),
            IntakeSource::AudioTrack => {
                warn!("--channel-label {} ignored with audio-track intake", label)
            }
        }
    }
    if let Some(dir) = &args.output_dir {
        config.recording.output_dir = dir.clone();
    }
    if let Some(prefix) = &args.file_prefix {
        config.recording.file_prefix = prefix.clone();
    }
    if let Some(scope) = args.recording_scope {
        config.recording.scope = match scope {
            ScopeArg::PerSession => RecordingScope::PerSession,
            ScopeArg::Shared => RecordingScope::Shared,
        };
    }
    if args.exit_on_disconnect {
        config.on_terminal_state = TerminalStatePolicy::ShutdownServer;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_tracing(format: LogFormat) -> Result<()> {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid RUST_LOG filter")?;

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
    .context("failed to initialise logging")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "webrtc-server",
            "--listen",
            "127.0.0.1:3000",
            "--role",
            "offerer",
            "--intake",
            "audio-track",
            "--recording-scope",
            "shared",
            "--exit-on-disconnect",
            "serve",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.role, NegotiationRole::Offerer);
        assert_eq!(config.intake, IntakeSource::AudioTrack);
        assert_eq!(config.recording.scope, RecordingScope::Shared);
        assert_eq!(config.on_terminal_state, TerminalStatePolicy::ShutdownServer);
    }

    #[test]
    fn test_channel_label_and_dial_url() {
        let args = Args::parse_from([
            "webrtc-server",
            "--channel-label",
            "camera",
            "dial",
            "--url",
            "ws://localhost:3000",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(
            config.intake,
            IntakeSource::DataChannel {
                label: "camera".to_string()
            }
        );
        assert!(matches!(args.mode, Mode::Dial { ref url } if url == "ws://localhost:3000"));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = Args::parse_from(["webrtc-server", "--listen", "not-an-address", "relay"]);
        assert!(load_config(&args).is_err());
    }
}
