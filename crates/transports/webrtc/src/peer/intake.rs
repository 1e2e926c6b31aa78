//! Channel/track intake: selects the inbound stream of interest and feeds its
//! payloads to the recorder

use super::engine::ChannelKind;
use crate::config::IntakeSource;
use crate::recording::{AppendOutcome, Recorder};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Yields the payload of each inbound media packet
#[async_trait]
pub trait PacketSource: Send {
    /// Next unwrapped payload; an error ends the track
    async fn next_payload(&mut self) -> Result<Bytes>;
}

/// What a finished track loop delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpSummary {
    pub packets: u64,
    pub bytes: u64,
    pub reason: String,
}

/// Routes exactly one inbound channel or track into a [`Recorder`]
pub struct ChannelIntake {
    source: IntakeSource,
    recorder: Arc<Recorder>,
    wired: AtomicBool,
}

impl ChannelIntake {
    pub fn new(source: IntakeSource, recorder: Arc<Recorder>) -> Self {
        Self {
            source,
            recorder,
            wired: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &IntakeSource {
        &self.source
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    /// Whether a channel with this label/kind is the one of interest
    pub fn matches(&self, label: &str, kind: ChannelKind) -> bool {
        match &self.source {
            IntakeSource::DataChannel { label: wanted } => {
                kind == ChannelKind::Data && label == wanted
            }
            IntakeSource::AudioTrack => kind == ChannelKind::AudioTrack,
        }
    }

    /// Claim the intake for a newly opened channel.
    ///
    /// Returns true for the first matching channel only; later channels, even
    /// matching ones, are left unwired.
    pub fn claim(&self, label: &str, kind: ChannelKind) -> bool {
        if !self.matches(label, kind) {
            debug!(label, ?kind, "Channel does not match intake, ignoring");
            return false;
        }
        let claimed = self
            .wired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            info!(label, ?kind, "Channel wired to recorder");
        } else {
            debug!(label, ?kind, "Intake already wired, ignoring duplicate channel");
        }
        claimed
    }

    /// Whether a channel has been wired
    pub fn is_wired(&self) -> bool {
        self.wired.load(Ordering::Acquire)
    }

    /// Hand one payload to the recorder
    pub async fn deliver(&self, payload: &[u8]) -> AppendOutcome {
        self.recorder.append(payload).await
    }

    /// Read packets until the source fails, appending each payload.
    ///
    /// A read error ends the loop; it is not retried.
    pub async fn pump<S: PacketSource>(&self, mut source: S) -> PumpSummary {
        let mut packets = 0u64;
        let mut bytes = 0u64;
        loop {
            match source.next_payload().await {
                Ok(payload) => {
                    packets += 1;
                    if let AppendOutcome::Written(n) = self.deliver(&payload).await {
                        bytes += n as u64;
                    }
                }
                Err(e) => {
                    info!(packets, bytes, "Track read loop ended: {}", e);
                    return PumpSummary {
                        packets,
                        bytes,
                        reason: e.to_string(),
                    };
                }
            }
        }
    }
}
