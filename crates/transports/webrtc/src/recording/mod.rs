//! Capture of inbound payload bytes to files on disk

mod recorder;

pub use recorder::{
    AppendOutcome, Recorder, RecorderStatus, RecordingFailure, StartOutcome, StopOutcome,
};

use chrono::{DateTime, Utc};

/// Owner label used by the process-wide recorder in shared scope
pub const SHARED_OWNER: &str = "shared";

/// File name of the `sequence`-th recording of `owner`.
///
/// `{prefix}-{owner}-{yyyymmddTHHMMSS.mmmZ}-{sequence}.{extension}`
pub fn recording_file_name(
    prefix: &str,
    owner: &str,
    at: DateTime<Utc>,
    sequence: u64,
    extension: &str,
) -> String {
    format!(
        "{}-{}-{}-{}.{}",
        prefix,
        owner,
        at.format("%Y%m%dT%H%M%S%.3fZ"),
        sequence,
        extension
    )
}
