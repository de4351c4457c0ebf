//! The file-transfer protocol: the receiver's ROUTER queue.
//!
//! This queue moves artifact bytes, so its framing stays binary-friendly:
//! integers are decimal ASCII frames and chunk bodies are raw frames that
//! the receiver writes straight to the staging file.

use bytes::Bytes;
use wheelhouse_transport::{Frames, Wire, WireError, verb_frame};

use crate::{ascii_u64, u64_frame};

/// builder → master on the file queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRequest {
    /// Opens (or, after heavy packet loss, re-opens) the transfer for the
    /// given builder.
    Hello { slave_id: u64 },
    /// One chunk of the file at the given offset.
    Chunk { offset: u64, data: Bytes },
}

impl Wire for FileRequest {
    fn to_frames(&self) -> Frames {
        match self {
            FileRequest::Hello { slave_id } => {
                vec![Bytes::from_static(b"HELLO"), u64_frame(*slave_id)]
            }
            FileRequest::Chunk { offset, data } => vec![
                Bytes::from_static(b"CHUNK"),
                u64_frame(*offset),
                data.clone(),
            ],
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "HELLO" => {
                if frames.len() != 2 {
                    return Err(WireError::frame_count(verb, frames.len()));
                }
                Ok(FileRequest::Hello {
                    slave_id: ascii_u64(verb, &frames[1])?,
                })
            }
            "CHUNK" => {
                if frames.len() != 3 {
                    return Err(WireError::frame_count(verb, frames.len()));
                }
                Ok(FileRequest::Chunk {
                    offset: ascii_u64(verb, &frames[1])?,
                    data: frames[2].clone(),
                })
            }
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}

/// master → builder on the file queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileReply {
    /// Request `length` bytes starting at `offset`.
    Fetch { offset: u64, length: u64 },
    /// Every byte has arrived; the builder may report SENT.
    Done,
}

impl Wire for FileReply {
    fn to_frames(&self) -> Frames {
        match self {
            FileReply::Fetch { offset, length } => vec![
                Bytes::from_static(b"FETCH"),
                u64_frame(*offset),
                u64_frame(*length),
            ],
            FileReply::Done => vec![Bytes::from_static(b"DONE")],
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "FETCH" => {
                if frames.len() != 3 {
                    return Err(WireError::frame_count(verb, frames.len()));
                }
                Ok(FileReply::Fetch {
                    offset: ascii_u64(verb, &frames[1])?,
                    length: ascii_u64(verb, &frames[2])?,
                })
            }
            "DONE" => {
                if frames.len() != 1 {
                    return Err(WireError::frame_count(verb, frames.len()));
                }
                Ok(FileReply::Done)
            }
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}
