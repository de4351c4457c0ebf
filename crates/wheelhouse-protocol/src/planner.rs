//! The build-queue protocol between the driver and the planner.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use wheelhouse_transport::{Frames, Wire, WireError, verb_frame};

use crate::{bare, json_payload, no_payload, with_json};

/// driver → planner: the next job for a builder of the given ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerRequest {
    pub abi: String,
}

#[derive(Serialize, Deserialize)]
struct NextPayload {
    abi: String,
}

impl Wire for PlannerRequest {
    fn to_frames(&self) -> Frames {
        with_json("NEXT", &NextPayload {
            abi: self.abi.clone(),
        })
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "NEXT" => {
                let payload: NextPayload = json_payload(verb, frames)?;
                Ok(PlannerRequest { abi: payload.abi })
            }
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}

/// planner → driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerReply {
    /// The next pending (package, version) for the requested ABI.
    Job { package: String, version: String },
    /// Nothing to do this time round; the planner is rebuilding.
    Empty,
}

#[derive(Serialize, Deserialize)]
struct JobPayload {
    package: String,
    version: String,
}

impl Wire for PlannerReply {
    fn to_frames(&self) -> Frames {
        match self {
            PlannerReply::Job { package, version } => with_json(
                "JOB",
                &JobPayload {
                    package: package.clone(),
                    version: version.clone(),
                },
            ),
            PlannerReply::Empty => bare("EMPTY"),
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "JOB" => {
                let payload: JobPayload = json_payload(verb, frames)?;
                Ok(PlannerReply::Job {
                    package: payload.package,
                    version: payload.version,
                })
            }
            "EMPTY" => no_payload(verb, frames).map(|_| PlannerReply::Empty),
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let request = PlannerRequest {
            abi: "cp34m".to_owned(),
        };
        assert_eq!(
            PlannerRequest::from_frames(&request.to_frames()).expect("decode"),
            request
        );
        for reply in [
            PlannerReply::Job {
                package: "foo".to_owned(),
                version: "0.1".to_owned(),
            },
            PlannerReply::Empty,
        ] {
            assert_eq!(
                PlannerReply::from_frames(&reply.to_frames()).expect("decode"),
                reply
            );
        }
    }
}
