//! Recorder concurrency stress tests
//!
//! Starts, stops and appends from independent tasks on a multi-threaded
//! runtime and checks that every file holds exactly the bytes reported as
//! written, with no torn or interleaved payloads.

mod harness;

use harness::init_test_tracing;
use mediasink_webrtc::recording::{AppendOutcome, StartOutcome, StopOutcome};
use mediasink_webrtc::{Recorder, RecordingConfig};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WRITERS: usize = 8;
const APPENDS_PER_WRITER: usize = 400;

fn recorder_in(dir: &std::path::Path) -> Arc<Recorder> {
    Arc::new(Recorder::new(
        "stress",
        RecordingConfig {
            output_dir: dir.to_path_buf(),
            extension: "bin".to_string(),
            ..RecordingConfig::default()
        },
    ))
}

/// Payload made of `len` copies of `tag`, so a torn write is detectable
fn payload(tag: u8, len: usize) -> Vec<u8> {
    vec![tag; len]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_append_start_stop() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder_in(dir.path());
    let written = Arc::new(AtomicU64::new(0));
    let closed_total = Arc::new(AtomicU64::new(0));

    let mut tasks = Vec::new();
    for w in 0..WRITERS {
        let recorder = Arc::clone(&recorder);
        let written = Arc::clone(&written);
        tasks.push(tokio::spawn(async move {
            let tag = b'a' + w as u8;
            for _ in 0..APPENDS_PER_WRITER {
                let len = rand::thread_rng().gen_range(0..512);
                if let AppendOutcome::Written(n) = recorder.append(&payload(tag, len)).await {
                    assert_eq!(n, len);
                    written.fetch_add(n as u64, Ordering::Relaxed);
                }
                let pause = rand::thread_rng().gen_bool(0.1);
                if pause {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }

    // a control task toggles recording while writers run
    let control = {
        let recorder = Arc::clone(&recorder);
        let closed_total = Arc::clone(&closed_total);
        tokio::spawn(async move {
            for _ in 0..40 {
                match recorder.start().await.unwrap() {
                    StartOutcome::Started(_) | StartOutcome::AlreadyRecording(_) => {}
                }
                let pause = rand::thread_rng().gen_range(0..3);
                tokio::time::sleep(Duration::from_millis(pause)).await;
                if let StopOutcome::Stopped { bytes_written, .. } = recorder.stop().await.unwrap() {
                    closed_total.fetch_add(bytes_written, Ordering::Relaxed);
                }
            }
        })
    };

    for task in tasks {
        task.await.unwrap();
    }
    control.await.unwrap();
    if let StopOutcome::Stopped { bytes_written, .. } = recorder.stop().await.unwrap() {
        closed_total.fetch_add(bytes_written, Ordering::Relaxed);
    }

    let total = written.load(Ordering::Relaxed);
    assert_eq!(closed_total.load(Ordering::Relaxed), total);

    let status = recorder.status().await;
    assert!(!status.recording);
    assert_eq!(status.files_opened, 40);

    let mut on_disk = 0u64;
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let bytes = std::fs::read(entry.unwrap().path()).unwrap();
        on_disk += bytes.len() as u64;
        for byte in bytes {
            assert!((b'a'..b'a' + WRITERS as u8).contains(&byte));
        }
    }
    assert_eq!(on_disk, total);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_payloads_are_never_interleaved() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder_in(dir.path());
    recorder.start().await.unwrap();

    let mut tasks = Vec::new();
    for w in 0..WRITERS {
        let recorder = Arc::clone(&recorder);
        tasks.push(tokio::spawn(async move {
            let tag = b'a' + w as u8;
            for _ in 0..50 {
                // fixed length per writer so runs can be checked afterwards
                recorder.append(&payload(tag, 1000 + w)).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let path = match recorder.stop().await.unwrap() {
        StopOutcome::Stopped { path, .. } => path,
        StopOutcome::NotRecording => panic!("recording was not active"),
    };
    let bytes = std::fs::read(path).unwrap();
    assert_eq!(
        bytes.len(),
        (0..WRITERS).map(|w| 50 * (1000 + w)).sum::<usize>()
    );

    // walk the file run by run; each run is one whole payload
    let mut offset = 0;
    while offset < bytes.len() {
        let tag = bytes[offset];
        let len = 1000 + (tag - b'a') as usize;
        assert!(
            bytes[offset..offset + len].iter().all(|b| *b == tag),
            "torn payload at offset {}",
            offset
        );
        offset += len;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_starts_open_one_file() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder_in(dir.path());

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let recorder = Arc::clone(&recorder);
        tasks.push(tokio::spawn(async move { recorder.start().await.unwrap() }));
    }
    let mut started = 0;
    for task in tasks {
        if let StartOutcome::Started(_) = task.await.unwrap() {
            started += 1;
        }
    }
    assert_eq!(started, 1);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let recorder = Arc::clone(&recorder);
        tasks.push(tokio::spawn(async move { recorder.stop().await.unwrap() }));
    }
    let mut stopped = 0;
    for task in tasks {
        if let StopOutcome::Stopped { .. } = task.await.unwrap() {
            stopped += 1;
        }
    }
    assert_eq!(stopped, 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
