//! Per-queue wire protocols.
//!
//! Every queue in the master declares its protocol as a verb enum here.
//! The first frame of a message is the ASCII verb; structured payloads
//! ride in a single JSON frame after it, except on the file-transfer
//! queue, where integers travel as decimal ASCII frames and chunk bodies
//! as raw bytes (builders stream those straight to and from disk).
//!
//! Exhaustive pattern matching over these enums stands in for dynamic
//! verb-string dispatch: an unhandled verb is a compile error, and a
//! malformed payload is a [`WireError`] the owning task converts into
//! peer eviction.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use wheelhouse_transport::{Frames, WireError};

mod admin;
mod control;
mod file;
mod fs;
mod index;
mod planner;
mod skip;
mod slave;
mod status;
mod statsin;

pub use admin::{ImportBuild, ImportReply, ImportRequest, RebuildTarget};
pub use control::ControlMsg;
pub use file::{FileReply, FileRequest};
pub use fs::{FsReply, FsRequest};
pub use index::IndexMsg;
pub use planner::{PlannerReply, PlannerRequest};
pub use skip::SkipMsg;
pub use slave::{BuiltReport, HelloInfo, SlaveReply, SlaveRequest};
pub use status::StatusEvent;
pub use statsin::StatsMsg;

/// A verb-only message.
fn bare(verb: &'static str) -> Frames {
    vec![Bytes::from_static(verb.as_bytes())]
}

/// A verb plus one JSON payload frame.
fn with_json<T: Serialize>(verb: &'static str, payload: &T) -> Frames {
    // Serialization of our own types cannot fail; the fallback keeps the
    // encoder total without panicking in release builds.
    let body = serde_json::to_vec(payload).unwrap_or_default();
    vec![Bytes::from_static(verb.as_bytes()), Bytes::from(body)]
}

/// Decode the JSON payload of a two-frame message.
fn json_payload<T: DeserializeOwned>(verb: &str, frames: &[Bytes]) -> Result<T, WireError> {
    if frames.len() != 2 {
        return Err(WireError::frame_count(verb, frames.len()));
    }
    serde_json::from_slice(&frames[1]).map_err(|err| WireError::payload(verb, err))
}

/// Require a verb-only message.
fn no_payload(verb: &str, frames: &[Bytes]) -> Result<(), WireError> {
    if frames.len() != 1 {
        return Err(WireError::frame_count(verb, frames.len()));
    }
    Ok(())
}

/// Decode a decimal-ASCII integer frame (file-transfer queue).
fn ascii_u64(verb: &str, frame: &Bytes) -> Result<u64, WireError> {
    std::str::from_utf8(frame)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| WireError::payload(verb, "expected decimal ASCII integer"))
}

/// Encode a decimal-ASCII integer frame.
fn u64_frame(value: u64) -> Bytes {
    Bytes::from(value.to_string().into_bytes())
}
