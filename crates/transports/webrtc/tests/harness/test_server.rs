//! Embedded signaling server for gateway E2E testing

use super::{HarnessError, HarnessResult, TestClient};
use mediasink_webrtc::testing::FakeEngine;
use mediasink_webrtc::{
    SessionRegistry, Shutdown, SinkConfig, WebSocketServerHandle, WebSocketSignalingServer,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Signaling server on 127.0.0.1 with a fake peer engine
pub struct TestServer {
    addr: SocketAddr,
    ws_path: String,
    engine: Arc<FakeEngine>,
    registry: Arc<SessionRegistry>,
    handle: WebSocketServerHandle,
    output_dir: tempfile::TempDir,
}

impl TestServer {
    /// Start with the default configuration
    pub async fn start() -> HarnessResult<Self> {
        Self::with_config(|config| config).await
    }

    /// Start with a configuration adjusted by `customize`.
    ///
    /// The listen address and output directory are set before `customize`
    /// runs.
    pub async fn with_config<F>(customize: F) -> HarnessResult<Self>
    where
        F: FnOnce(SinkConfig) -> SinkConfig,
    {
        let output_dir = tempfile::tempdir()?;
        let config = customize(
            SinkConfig::default()
                .with_listen_addr("127.0.0.1:0")
                .with_output_dir(output_dir.path()),
        );
        let ws_path = config.ws_path.clone();

        let engine = FakeEngine::new();
        let server = WebSocketSignalingServer::with_shutdown(config, engine.clone(), Shutdown::new());
        let registry = server.registry();
        let handle = server
            .start()
            .await
            .map_err(|e| HarnessError::ServerError(format!("Failed to start: {}", e)))?;
        let addr = handle.local_addr();

        info!("Test server listening on {}", addr);

        Ok(Self {
            addr,
            ws_path,
            engine,
            registry,
            handle,
            output_dir,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL clients upgrade on
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.addr, self.ws_path)
    }

    pub fn engine(&self) -> &Arc<FakeEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.handle.shutdown_signal()
    }

    pub fn output_dir(&self) -> &Path {
        self.output_dir.path()
    }

    /// Files in the output directory, sorted by name
    pub fn recordings(&self) -> HarnessResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(self.output_dir.path())? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Connect a new client
    pub async fn connect(&self) -> HarnessResult<TestClient> {
        TestClient::connect(&self.ws_url()).await
    }

    /// Trigger shutdown and wait for the server to drain
    pub async fn shutdown(self) -> tempfile::TempDir {
        self.handle.shutdown().await;
        self.output_dir
    }

    /// Wait for the server to stop on its own
    pub async fn wait_stopped(self, timeout: Duration) -> HarnessResult<tempfile::TempDir> {
        tokio::time::timeout(timeout, self.handle.wait())
            .await
            .map_err(|_| HarnessError::Timeout("server did not stop".to_string()))?;
        Ok(self.output_dir)
    }
}
