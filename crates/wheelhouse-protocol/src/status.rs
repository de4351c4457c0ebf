//! The status fan-out consumed by monitors.

use std::collections::BTreeMap;

use bytes::Bytes;
use wheelhouse_transport::{Frames, Wire, WireError, verb_frame};
use wheelhouse_types::{MasterStats, SlaveEvent};

use crate::{json_payload, with_json};

/// master → monitors.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Something happened on one builder's channel.
    Slave(SlaveEvent),
    /// A fresh aggregate statistics sample.
    Stats(MasterStats),
    /// Build-queue depths per ABI.
    BuildQueue(BTreeMap<String, u64>),
    /// The sample that was also sent to the landing page.
    Home(MasterStats),
}

impl Wire for StatusEvent {
    fn to_frames(&self) -> Frames {
        match self {
            StatusEvent::Slave(event) => with_json("SLAVE", event),
            StatusEvent::Stats(stats) => with_json("STATS", stats),
            StatusEvent::BuildQueue(depths) => with_json("STATBQ", depths),
            StatusEvent::Home(stats) => with_json("HOME", stats),
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "SLAVE" => Ok(StatusEvent::Slave(json_payload(verb, frames)?)),
            "STATS" => Ok(StatusEvent::Stats(json_payload(verb, frames)?)),
            "STATBQ" => Ok(StatusEvent::BuildQueue(json_payload(verb, frames)?)),
            "HOME" => Ok(StatusEvent::Home(json_payload(verb, frames)?)),
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}
