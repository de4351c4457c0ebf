//! The skip queue: admin notifications that pending work should be
//! dropped from the planner's in-memory queues. The catalog is already
//! authoritative by the time these are sent; the queue only saves the
//! planner from handing out work that was just skipped or removed.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use wheelhouse_transport::{Frames, Wire, WireError, verb_frame};

use crate::{json_payload, with_json};

/// admin → planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipMsg {
    pub package: String,
    /// Prune one version, or every version when absent.
    pub version: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SkipPayload {
    package: String,
    version: Option<String>,
}

impl Wire for SkipMsg {
    fn to_frames(&self) -> Frames {
        with_json("SKIP", &SkipPayload {
            package: self.package.clone(),
            version: self.version.clone(),
        })
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "SKIP" => {
                let payload: SkipPayload = json_payload(verb, frames)?;
                Ok(SkipMsg {
                    package: payload.package,
                    version: payload.version,
                })
            }
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        for msg in [
            SkipMsg {
                package: "foo".to_owned(),
                version: None,
            },
            SkipMsg {
                package: "foo".to_owned(),
                version: Some("0.1".to_owned()),
            },
        ] {
            assert_eq!(SkipMsg::from_frames(&msg.to_frames()).expect("decode"), msg);
        }
    }
}
