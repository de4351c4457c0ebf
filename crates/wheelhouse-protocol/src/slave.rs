//! The builder (slave) protocol: the driver's ROUTER queue.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use wheelhouse_transport::{Frames, Wire, WireError, verb_frame};
use wheelhouse_types::{ArtifactFile, SlaveStats};

use crate::{json_payload, no_payload, with_json};

/// Everything a builder declares about itself in its first message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloInfo {
    /// How long a build may run before the builder is presumed wedged.
    #[serde(with = "humantime_serde")]
    pub build_timeout: Duration,
    /// How long the master waits between heartbeats before evicting.
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
    pub native_py_version: String,
    pub native_abi: String,
    pub native_platform: String,
    pub label: String,
    pub os_name: String,
    pub os_version: String,
    pub board_revision: String,
    pub board_serial: String,
}

/// A completed build as reported by the builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltReport {
    pub status: bool,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub output: String,
    pub files: Vec<ArtifactFile>,
}

/// builder → master.
#[derive(Debug, Clone, PartialEq)]
pub enum SlaveRequest {
    Hello(HelloInfo),
    Idle(SlaveStats),
    Busy(SlaveStats),
    Built(BuiltReport),
    Sent,
    Bye,
}

impl SlaveRequest {
    /// The wire verb, used in logs and status events.
    pub fn verb(&self) -> &'static str {
        match self {
            SlaveRequest::Hello(_) => "HELLO",
            SlaveRequest::Idle(_) => "IDLE",
            SlaveRequest::Busy(_) => "BUSY",
            SlaveRequest::Built(_) => "BUILT",
            SlaveRequest::Sent => "SENT",
            SlaveRequest::Bye => "BYE",
        }
    }
}

impl Wire for SlaveRequest {
    fn to_frames(&self) -> Frames {
        match self {
            SlaveRequest::Hello(info) => with_json("HELLO", info),
            SlaveRequest::Idle(stats) => with_json("IDLE", stats),
            SlaveRequest::Busy(stats) => with_json("BUSY", stats),
            SlaveRequest::Built(report) => with_json("BUILT", report),
            SlaveRequest::Sent => crate::bare("SENT"),
            SlaveRequest::Bye => crate::bare("BYE"),
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "HELLO" => Ok(SlaveRequest::Hello(json_payload(verb, frames)?)),
            "IDLE" => Ok(SlaveRequest::Idle(json_payload(verb, frames)?)),
            "BUSY" => Ok(SlaveRequest::Busy(json_payload(verb, frames)?)),
            "BUILT" => Ok(SlaveRequest::Built(json_payload(verb, frames)?)),
            "SENT" => no_payload(verb, frames).map(|_| SlaveRequest::Sent),
            "BYE" => no_payload(verb, frames).map(|_| SlaveRequest::Bye),
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}

/// master → builder.
#[derive(Debug, Clone, PartialEq)]
pub enum SlaveReply {
    /// Assigns the stable id and the canonical upstream URL.
    Ack { slave_id: u64, pypi_url: String },
    /// Re-echo of the builder's HELLO, replayed for monitors.
    Hello(HelloInfo),
    Sleep,
    Build { package: String, version: String },
    Send { filename: String },
    Done,
    /// Empty keepalive; never recorded as the last reply.
    Cont,
    Die,
}

impl SlaveReply {
    pub fn verb(&self) -> &'static str {
        match self {
            SlaveReply::Ack { .. } => "ACK",
            SlaveReply::Hello(_) => "HELLO",
            SlaveReply::Sleep => "SLEEP",
            SlaveReply::Build { .. } => "BUILD",
            SlaveReply::Send { .. } => "SEND",
            SlaveReply::Done => "DONE",
            SlaveReply::Cont => "CONT",
            SlaveReply::Die => "DIE",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct AckPayload {
    slave_id: u64,
    pypi_url: String,
}

#[derive(Serialize, Deserialize)]
struct BuildPayload {
    package: String,
    version: String,
}

#[derive(Serialize, Deserialize)]
struct SendPayload {
    filename: String,
}

impl Wire for SlaveReply {
    fn to_frames(&self) -> Frames {
        match self {
            SlaveReply::Ack { slave_id, pypi_url } => with_json(
                "ACK",
                &AckPayload {
                    slave_id: *slave_id,
                    pypi_url: pypi_url.clone(),
                },
            ),
            SlaveReply::Hello(info) => with_json("HELLO", info),
            SlaveReply::Sleep => crate::bare("SLEEP"),
            SlaveReply::Build { package, version } => with_json(
                "BUILD",
                &BuildPayload {
                    package: package.clone(),
                    version: version.clone(),
                },
            ),
            SlaveReply::Send { filename } => with_json(
                "SEND",
                &SendPayload {
                    filename: filename.clone(),
                },
            ),
            SlaveReply::Done => crate::bare("DONE"),
            SlaveReply::Cont => crate::bare("CONT"),
            SlaveReply::Die => crate::bare("DIE"),
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "ACK" => {
                let payload: AckPayload = json_payload(verb, frames)?;
                Ok(SlaveReply::Ack {
                    slave_id: payload.slave_id,
                    pypi_url: payload.pypi_url,
                })
            }
            "HELLO" => Ok(SlaveReply::Hello(json_payload(verb, frames)?)),
            "SLEEP" => no_payload(verb, frames).map(|_| SlaveReply::Sleep),
            "BUILD" => {
                let payload: BuildPayload = json_payload(verb, frames)?;
                Ok(SlaveReply::Build {
                    package: payload.package,
                    version: payload.version,
                })
            }
            "SEND" => {
                let payload: SendPayload = json_payload(verb, frames)?;
                Ok(SlaveReply::Send {
                    filename: payload.filename,
                })
            }
            "DONE" => no_payload(verb, frames).map(|_| SlaveReply::Done),
            "CONT" => no_payload(verb, frames).map(|_| SlaveReply::Cont),
            "DIE" => no_payload(verb, frames).map(|_| SlaveReply::Die),
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    pub(crate) fn hello_info() -> HelloInfo {
        HelloInfo {
            build_timeout: Duration::from_secs(3600),
            busy_timeout: Duration::from_secs(300),
            native_py_version: "cp34".to_owned(),
            native_abi: "cp34m".to_owned(),
            native_platform: "linux_armv7l".to_owned(),
            label: "builder-2".to_owned(),
            os_name: "Raspbian GNU/Linux".to_owned(),
            os_version: "9".to_owned(),
            board_revision: "a02082".to_owned(),
            board_serial: "000000001234abcd".to_owned(),
        }
    }

    fn roundtrip_request(msg: SlaveRequest) {
        let decoded = SlaveRequest::from_frames(&msg.to_frames()).expect("decode");
        assert_eq!(decoded, msg);
    }

    fn roundtrip_reply(msg: SlaveReply) {
        let decoded = SlaveReply::from_frames(&msg.to_frames()).expect("decode");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn requests_roundtrip() {
        let stats = SlaveStats {
            timestamp: Utc::now(),
            disk_size: 16 << 30,
            disk_free: 8 << 30,
            mem_size: 1 << 30,
            mem_free: 1 << 29,
            swap_size: 100,
            swap_free: 100,
            load_average: 0.75,
            cpu_temp: 52.1,
        };
        let file = ArtifactFile::from_filename(
            "foo-0.1-cp34-cp34m-linux_armv7l.whl",
            123_456,
            "cafebabe",
            BTreeMap::new(),
        )
        .expect("artifact");
        roundtrip_request(SlaveRequest::Hello(hello_info()));
        roundtrip_request(SlaveRequest::Idle(stats.clone()));
        roundtrip_request(SlaveRequest::Busy(stats));
        roundtrip_request(SlaveRequest::Built(BuiltReport {
            status: true,
            duration: Duration::from_secs(5),
            output: "ok".to_owned(),
            files: vec![file],
        }));
        roundtrip_request(SlaveRequest::Sent);
        roundtrip_request(SlaveRequest::Bye);
    }

    #[test]
    fn replies_roundtrip() {
        roundtrip_reply(SlaveReply::Ack {
            slave_id: 1,
            pypi_url: "https://pypi.org/simple".to_owned(),
        });
        roundtrip_reply(SlaveReply::Hello(hello_info()));
        roundtrip_reply(SlaveReply::Sleep);
        roundtrip_reply(SlaveReply::Build {
            package: "foo".to_owned(),
            version: "0.1".to_owned(),
        });
        roundtrip_reply(SlaveReply::Send {
            filename: "foo-0.1-cp34-cp34m-linux_armv7l.whl".to_owned(),
        });
        roundtrip_reply(SlaveReply::Done);
        roundtrip_reply(SlaveReply::Cont);
        roundtrip_reply(SlaveReply::Die);
    }

    #[test]
    fn unknown_verb_is_rejected() {
        let frames = vec![Bytes::from_static(b"EXPLODE")];
        assert!(matches!(
            SlaveRequest::from_frames(&frames),
            Err(WireError::UnknownVerb(_))
        ));
    }

    #[test]
    fn bad_payload_is_rejected() {
        let frames = vec![Bytes::from_static(b"IDLE"), Bytes::from_static(b"{")];
        assert!(matches!(
            SlaveRequest::from_frames(&frames),
            Err(WireError::Payload { .. })
        ));
    }

    #[test]
    fn payload_on_bare_verb_is_rejected() {
        let frames = vec![Bytes::from_static(b"SENT"), Bytes::from_static(b"junk")];
        assert!(matches!(
            SlaveRequest::from_frames(&frames),
            Err(WireError::FrameCount { .. })
        ));
    }
}
