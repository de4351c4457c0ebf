//! The control plane: external PULL verbs, relayed verbatim onto the
//! internal control topic that every task subscribes to.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use wheelhouse_transport::{Frames, Wire, WireError, verb_frame};

use crate::{bare, json_payload, no_payload, with_json};

/// operator → master, and master → every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMsg {
    /// Orderly shutdown in reverse-start order.
    Quit,
    /// Stop handing out builds; builders are told to sleep.
    Pause,
    Resume,
    /// Terminate one builder at its next interaction.
    Kill(u64),
    /// Stop handing builds to one builder without terminating it.
    Skip(u64),
    /// Pause one builder.
    Sleep(u64),
    /// Clear one builder's killed/skipped/paused flags.
    Wake(u64),
    /// A monitor attached; replay every builder's state.
    Hello,
    /// Dump current builder records onto the status fan-out.
    List,
}

impl ControlMsg {
    pub fn verb(&self) -> &'static str {
        match self {
            ControlMsg::Quit => "QUIT",
            ControlMsg::Pause => "PAUSE",
            ControlMsg::Resume => "RESUME",
            ControlMsg::Kill(_) => "KILL",
            ControlMsg::Skip(_) => "SKIP",
            ControlMsg::Sleep(_) => "SLEEP",
            ControlMsg::Wake(_) => "WAKE",
            ControlMsg::Hello => "HELLO",
            ControlMsg::List => "LIST",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SlavePayload {
    slave_id: u64,
}

impl Wire for ControlMsg {
    fn to_frames(&self) -> Frames {
        match self {
            ControlMsg::Quit => bare("QUIT"),
            ControlMsg::Pause => bare("PAUSE"),
            ControlMsg::Resume => bare("RESUME"),
            ControlMsg::Kill(slave_id) => with_json("KILL", &SlavePayload {
                slave_id: *slave_id,
            }),
            ControlMsg::Skip(slave_id) => with_json("SKIP", &SlavePayload {
                slave_id: *slave_id,
            }),
            ControlMsg::Sleep(slave_id) => with_json("SLEEP", &SlavePayload {
                slave_id: *slave_id,
            }),
            ControlMsg::Wake(slave_id) => with_json("WAKE", &SlavePayload {
                slave_id: *slave_id,
            }),
            ControlMsg::Hello => bare("HELLO"),
            ControlMsg::List => bare("LIST"),
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "QUIT" => no_payload(verb, frames).map(|_| ControlMsg::Quit),
            "PAUSE" => no_payload(verb, frames).map(|_| ControlMsg::Pause),
            "RESUME" => no_payload(verb, frames).map(|_| ControlMsg::Resume),
            "KILL" => {
                let payload: SlavePayload = json_payload(verb, frames)?;
                Ok(ControlMsg::Kill(payload.slave_id))
            }
            "SKIP" => {
                let payload: SlavePayload = json_payload(verb, frames)?;
                Ok(ControlMsg::Skip(payload.slave_id))
            }
            "SLEEP" => {
                let payload: SlavePayload = json_payload(verb, frames)?;
                Ok(ControlMsg::Sleep(payload.slave_id))
            }
            "WAKE" => {
                let payload: SlavePayload = json_payload(verb, frames)?;
                Ok(ControlMsg::Wake(payload.slave_id))
            }
            "HELLO" => no_payload(verb, frames).map(|_| ControlMsg::Hello),
            "LIST" => no_payload(verb, frames).map(|_| ControlMsg::List),
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
            ControlMsg::Quit,
            ControlMsg::Pause,
            ControlMsg::Resume,
            ControlMsg::Kill(3),
            ControlMsg::Skip(4),
            ControlMsg::Sleep(5),
            ControlMsg::Wake(6),
            ControlMsg::Hello,
            ControlMsg::List,
        ] {
            assert_eq!(
                ControlMsg::from_frames(&msg.to_frames()).expect("decode"),
                msg
            );
        }
    }

    #[test]
    fn kill_requires_a_slave_id() {
        let frames = vec![Bytes::from_static(b"KILL")];
        assert!(ControlMsg::from_frames(&frames).is_err());
    }
}
