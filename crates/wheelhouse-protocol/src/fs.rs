//! The receiver's control queue, used by the slave driver and the admin
//! ingress to stage, verify and remove artifacts.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use wheelhouse_transport::{Frames, Wire, WireError, verb_frame};
use wheelhouse_types::{ArtifactFile, DiskStats};

use crate::{bare, json_payload, no_payload, with_json};

/// caller → receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum FsRequest {
    /// Announce the next file the named builder will upload.
    Expect { slave_id: u64, file: ArtifactFile },
    /// Verify and commit the builder's completed transfer.
    Verify { slave_id: u64, package: String },
    /// Unlink an artifact; missing files are not an error.
    Remove { package: String, filename: String },
    /// Report repository filesystem totals.
    StatFs,
}

#[derive(Serialize, Deserialize)]
struct ExpectPayload {
    slave_id: u64,
    file: ArtifactFile,
}

#[derive(Serialize, Deserialize)]
struct VerifyPayload {
    slave_id: u64,
    package: String,
}

#[derive(Serialize, Deserialize)]
struct RemovePayload {
    package: String,
    filename: String,
}

impl Wire for FsRequest {
    fn to_frames(&self) -> Frames {
        match self {
            FsRequest::Expect { slave_id, file } => with_json(
                "EXPECT",
                &ExpectPayload {
                    slave_id: *slave_id,
                    file: file.clone(),
                },
            ),
            FsRequest::Verify { slave_id, package } => with_json(
                "VERIFY",
                &VerifyPayload {
                    slave_id: *slave_id,
                    package: package.clone(),
                },
            ),
            FsRequest::Remove { package, filename } => with_json(
                "REMOVE",
                &RemovePayload {
                    package: package.clone(),
                    filename: filename.clone(),
                },
            ),
            FsRequest::StatFs => bare("STATFS"),
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "EXPECT" => {
                let payload: ExpectPayload = json_payload(verb, frames)?;
                Ok(FsRequest::Expect {
                    slave_id: payload.slave_id,
                    file: payload.file,
                })
            }
            "VERIFY" => {
                let payload: VerifyPayload = json_payload(verb, frames)?;
                Ok(FsRequest::Verify {
                    slave_id: payload.slave_id,
                    package: payload.package,
                })
            }
            "REMOVE" => {
                let payload: RemovePayload = json_payload(verb, frames)?;
                Ok(FsRequest::Remove {
                    package: payload.package,
                    filename: payload.filename,
                })
            }
            "STATFS" => no_payload(verb, frames).map(|_| FsRequest::StatFs),
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}

/// receiver → caller. REP discipline: every request gets exactly one of
/// these, including failures.
#[derive(Debug, Clone, PartialEq)]
pub enum FsReply {
    Done,
    Stats(DiskStats),
    Error(String),
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    reason: String,
}

impl Wire for FsReply {
    fn to_frames(&self) -> Frames {
        match self {
            FsReply::Done => bare("DONE"),
            FsReply::Stats(stats) => with_json("STATS", stats),
            FsReply::Error(reason) => with_json(
                "ERROR",
                &ErrorPayload {
                    reason: reason.clone(),
                },
            ),
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "DONE" => no_payload(verb, frames).map(|_| FsReply::Done),
            "STATS" => Ok(FsReply::Stats(json_payload(verb, frames)?)),
            "ERROR" => {
                let payload: ErrorPayload = json_payload(verb, frames)?;
                Ok(FsReply::Error(payload.reason))
            }
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}
