//! The typed layer over raw frames.

use bytes::Bytes;
use thiserror::Error;

use crate::Frames;

/// A message type that knows its frame representation.
///
/// Encoding is infallible: a value of the verb enum is by construction a
/// valid message for its queue, which is the send-side half of schema
/// validation. Decoding validates the receive side; any failure is a
/// protocol violation attributable to the peer.
pub trait Wire: Sized {
    fn to_frames(&self) -> Frames;
    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError>;
}

/// A message that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("message has no verb frame")]
    Empty,
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),
    #[error("wrong frame count for {verb}: got {got}")]
    FrameCount { verb: String, got: usize },
    #[error("malformed payload for {verb}: {detail}")]
    Payload { verb: String, detail: String },
}

impl WireError {
    /// Helper for decoders: name the verb of the offending message.
    pub fn payload(verb: &str, detail: impl std::fmt::Display) -> Self {
        WireError::Payload {
            verb: verb.to_owned(),
            detail: detail.to_string(),
        }
    }

    pub fn frame_count(verb: &str, got: usize) -> Self {
        WireError::FrameCount {
            verb: verb.to_owned(),
            got,
        }
    }
}

/// Decode the verb (first) frame as UTF-8.
pub fn verb_frame(frames: &[Bytes]) -> Result<&str, WireError> {
    let verb = frames.first().ok_or(WireError::Empty)?;
    std::str::from_utf8(verb).map_err(|_| WireError::UnknownVerb(format!("{verb:?}")))
}
