//! Mutex-guarded output file shared by the intake callbacks and the session

use super::recording_file_name;
use crate::config::RecordingConfig;
use crate::{Error, Result};
use chrono::Utc;
use std::path::PathBuf;
#[cfg(any(test, feature = "test-util"))]
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

/// Result of [`Recorder::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new file was created
    Started(PathBuf),
    /// A file was already open; nothing changed
    AlreadyRecording(PathBuf),
}

/// Result of [`Recorder::stop`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The open file was flushed and closed
    Stopped { path: PathBuf, bytes_written: u64 },
    /// No file was open; nothing changed
    NotRecording,
}

/// Result of [`Recorder::append`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Bytes were appended to the open file
    Written(usize),
    /// Bytes were discarded (not recording, or the write failed)
    Dropped(usize),
}

/// Snapshot of a recorder's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderStatus {
    pub recording: bool,
    pub path: Option<PathBuf>,
    pub bytes_written: u64,
    pub dropped_bytes: u64,
    pub files_opened: u64,
}

/// A write failure that closed the recording
#[derive(Debug, Clone)]
pub struct RecordingFailure {
    pub owner: String,
    pub path: PathBuf,
    pub detail: String,
}

impl RecordingFailure {
    /// The failure as a recording-class error
    pub fn to_error(&self) -> Error {
        Error::RecordingError(format!(
            "write to {} failed, recording stopped: {}",
            self.path.display(),
            self.detail
        ))
    }
}

struct ActiveRecording {
    file: File,
    path: PathBuf,
    bytes_written: u64,
}

#[derive(Default)]
struct RecorderState {
    active: Option<ActiveRecording>,
    sequence: u64,
    files_opened: u64,
    dropped_bytes: u64,
}

/// Owns at most one open output file.
///
/// `start`, `stop`, `append` and `status` all take the same lock and hold it
/// across their whole check-then-act sequence, file I/O included, so
/// concurrent callers can never open a second file or write to a closed one.
pub struct Recorder {
    owner: String,
    config: RecordingConfig,
    state: Mutex<RecorderState>,
    failures: broadcast::Sender<RecordingFailure>,
    #[cfg(any(test, feature = "test-util"))]
    fail_next_write: AtomicBool,
}

impl Recorder {
    /// Create a recorder whose files are labelled with `owner`
    pub fn new(owner: impl Into<String>, config: RecordingConfig) -> Self {
        let (failures, _) = broadcast::channel(16);
        Self {
            owner: owner.into(),
            config,
            state: Mutex::new(RecorderState::default()),
            failures,
            #[cfg(any(test, feature = "test-util"))]
            fail_next_write: AtomicBool::new(false),
        }
    }

    /// Label used in file names and logs
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Receive notifications of write failures that ended a recording
    pub fn subscribe_failures(&self) -> broadcast::Receiver<RecordingFailure> {
        self.failures.subscribe()
    }

    /// Open a new output file unless one is already open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordingError`] if the output directory or file cannot
    /// be created. The recorder stays not-recording in that case.
    pub async fn start(&self) -> Result<StartOutcome> {
        let mut state = self.state.lock().await;

        if let Some(active) = &state.active {
            warn!(
                owner = %self.owner,
                "Recording already in progress: {}",
                active.path.display()
            );
            return Ok(StartOutcome::AlreadyRecording(active.path.clone()));
        }

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| {
                Error::RecordingError(format!(
                    "cannot create output directory {}: {}",
                    self.config.output_dir.display(),
                    e
                ))
            })?;

        let sequence = state.sequence + 1;
        let path = self.config.output_dir.join(recording_file_name(
            &self.config.file_prefix,
            &self.owner,
            Utc::now(),
            sequence,
            &self.config.extension,
        ));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                Error::RecordingError(format!("cannot create {}: {}", path.display(), e))
            })?;

        state.sequence = sequence;
        state.files_opened += 1;
        state.active = Some(ActiveRecording {
            file,
            path: path.clone(),
            bytes_written: 0,
        });

        info!(owner = %self.owner, "Recording started: {}", path.display());
        Ok(StartOutcome::Started(path))
    }

    /// Flush, sync and close the open file.
    ///
    /// The recorder is not-recording afterwards even if closing fails.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut state = self.state.lock().await;

        let Some(mut active) = state.active.take() else {
            warn!(owner = %self.owner, "Stop requested but no recording in progress");
            return Ok(StopOutcome::NotRecording);
        };

        let closed = async {
            active.file.flush().await?;
            active.file.sync_all().await
        }
        .await;

        match closed {
            Ok(()) => {
                info!(
                    owner = %self.owner,
                    bytes = active.bytes_written,
                    "Recording stopped: {}",
                    active.path.display()
                );
                Ok(StopOutcome::Stopped {
                    path: active.path,
                    bytes_written: active.bytes_written,
                })
            }
            Err(e) => {
                error!(
                    owner = %self.owner,
                    "Failed to close {}: {}",
                    active.path.display(),
                    e
                );
                Err(Error::RecordingError(format!(
                    "cannot close {}: {}",
                    active.path.display(),
                    e
                )))
            }
        }
    }

    /// Append bytes to the open file, or drop them if not recording.
    ///
    /// Never fails: a write error closes the recording, resets the recorder to
    /// not-recording and is published to [`Recorder::subscribe_failures`].
    pub async fn append(&self, payload: &[u8]) -> AppendOutcome {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let Some(active) = state.active.as_mut() else {
            state.dropped_bytes += payload.len() as u64;
            debug!(
                owner = %self.owner,
                bytes = payload.len(),
                dropped_total = state.dropped_bytes,
                "Not recording, payload dropped"
            );
            return AppendOutcome::Dropped(payload.len());
        };

        if payload.is_empty() {
            return AppendOutcome::Written(0);
        }

        let written = match self.injected_write_fault() {
            Some(e) => Err(e),
            None => active.file.write_all(payload).await,
        };

        match written {
            Ok(()) => {
                active.bytes_written += payload.len() as u64;
                AppendOutcome::Written(payload.len())
            }
            Err(e) => {
                let failure = RecordingFailure {
                    owner: self.owner.clone(),
                    path: active.path.clone(),
                    detail: e.to_string(),
                };
                state.active = None;
                state.dropped_bytes += payload.len() as u64;
                error!(
                    owner = %self.owner,
                    "Write to {} failed, recording stopped: {}",
                    failure.path.display(),
                    e
                );
                // no subscribers is fine
                let _ = self.failures.send(failure);
                AppendOutcome::Dropped(payload.len())
            }
        }
    }

    /// Make the next non-empty write to an open file fail
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    #[cfg(any(test, feature = "test-util"))]
    fn injected_write_fault(&self) -> Option<std::io::Error> {
        self.fail_next_write
            .swap(false, Ordering::SeqCst)
            .then(|| std::io::Error::new(std::io::ErrorKind::Other, "injected write failure"))
    }

    #[cfg(not(any(test, feature = "test-util")))]
    fn injected_write_fault(&self) -> Option<std::io::Error> {
        None
    }

    /// Whether a file is currently open
    pub async fn is_recording(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    /// Snapshot of the recorder's counters
    pub async fn status(&self) -> RecorderStatus {
        let state = self.state.lock().await;
        RecorderStatus {
            recording: state.active.is_some(),
            path: state.active.as_ref().map(|a| a.path.clone()),
            bytes_written: state.active.as_ref().map_or(0, |a| a.bytes_written),
            dropped_bytes: state.dropped_bytes,
            files_opened: state.files_opened,
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("owner", &self.owner)
            .field("output_dir", &self.config.output_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn recorder_in(dir: &Path) -> Recorder {
        Recorder::new(
            "test",
            RecordingConfig {
                output_dir: dir.to_path_buf(),
                ..RecordingConfig::default()
            },
        )
    }

    fn files_in(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_start_append_stop() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());

        let path = match recorder.start().await.unwrap() {
            StartOutcome::Started(path) => path,
            other => panic!("expected Started, got {:?}", other),
        };
        assert!(path.starts_with(dir.path()));
        assert!(path.extension().is_some_and(|e| e == "webm"));

        assert_eq!(recorder.append(b"hello ").await, AppendOutcome::Written(6));
        assert_eq!(recorder.append(b"world").await, AppendOutcome::Written(5));

        let stopped = recorder.stop().await.unwrap();
        assert_eq!(
            stopped,
            StopOutcome::Stopped {
                path: path.clone(),
                bytes_written: 11
            }
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_double_start_opens_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());

        let first = recorder.start().await.unwrap();
        let second = recorder.start().await.unwrap();
        match (first, second) {
            (StartOutcome::Started(a), StartOutcome::AlreadyRecording(b)) => assert_eq!(a, b),
            other => panic!("unexpected outcomes {:?}", other),
        }
        assert_eq!(files_in(dir.path()).len(), 1);
        assert_eq!(recorder.status().await.files_opened, 1);
    }

    #[tokio::test]
    async fn test_stop_when_not_recording() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());
        assert_eq!(recorder.stop().await.unwrap(), StopOutcome::NotRecording);
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_append_while_stopped_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());

        assert_eq!(recorder.append(&[1, 2, 3]).await, AppendOutcome::Dropped(3));
        assert!(files_in(dir.path()).is_empty());

        let status = recorder.status().await;
        assert!(!status.recording);
        assert_eq!(status.dropped_bytes, 3);
    }

    #[tokio::test]
    async fn test_restart_gets_fresh_file_with_only_new_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());

        recorder.start().await.unwrap();
        recorder.append(b"first").await;
        recorder.stop().await.unwrap();

        assert_eq!(recorder.append(b"lost").await, AppendOutcome::Dropped(4));

        let second = match recorder.start().await.unwrap() {
            StartOutcome::Started(path) => path,
            other => panic!("expected Started, got {:?}", other),
        };
        recorder.append(b"second").await;
        recorder.stop().await.unwrap();

        assert_eq!(files_in(dir.path()).len(), 2);
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
        assert_eq!(recorder.status().await.files_opened, 2);
    }

    #[tokio::test]
    async fn test_zero_length_append_while_recording() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());

        recorder.start().await.unwrap();
        assert_eq!(recorder.append(&[]).await, AppendOutcome::Written(0));
        let status = recorder.status().await;
        assert!(status.recording);
        assert_eq!(status.bytes_written, 0);
    }

    #[tokio::test]
    async fn test_start_fails_when_output_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let recorder = recorder_in(&blocker);

        let err = recorder.start().await.unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::Recording);
        assert!(!recorder.is_recording().await);
        assert_eq!(recorder.status().await.files_opened, 0);
    }

    #[tokio::test]
    async fn test_start_creates_missing_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("captures").join("today");
        let recorder = recorder_in(&nested);

        recorder.start().await.unwrap();
        recorder.stop().await.unwrap();
        assert_eq!(files_in(&nested).len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_closes_recording_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_in(dir.path());
        let mut failures = recorder.subscribe_failures();

        let path = match recorder.start().await.unwrap() {
            StartOutcome::Started(path) => path,
            other => panic!("expected Started, got {:?}", other),
        };
        assert_eq!(recorder.append(b"kept").await, AppendOutcome::Written(4));

        recorder.fail_next_write();
        assert_eq!(recorder.append(b"lost").await, AppendOutcome::Dropped(4));
        assert!(!recorder.is_recording().await);
        assert_eq!(recorder.status().await.dropped_bytes, 4);

        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.owner, "test");
        assert_eq!(failure.path, path);
        assert_eq!(failure.to_error().class(), crate::ErrorClass::Recording);

        // stays stopped until started again, then uses a fresh file
        assert_eq!(recorder.append(b"after").await, AppendOutcome::Dropped(5));
        assert_eq!(recorder.stop().await.unwrap(), StopOutcome::NotRecording);
        match recorder.start().await.unwrap() {
            StartOutcome::Started(next) => assert_ne!(next, path),
            other => panic!("expected Started, got {:?}", other),
        }
    }
}
