//! The stats aggregator's ingress queue: gauges pushed by other tasks.

use bytes::Bytes;
use std::collections::BTreeMap;
use wheelhouse_transport::{Frames, Wire, WireError, verb_frame};
use wheelhouse_types::DiskStats;

use crate::{json_payload, with_json};

/// receiver / planner → stats aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsMsg {
    /// Repository filesystem totals, pushed by the receiver after each
    /// commit.
    StatFs(DiskStats),
    /// Queue depths per ABI, pushed by the planner after each rebuild.
    BuildQueue(BTreeMap<String, u64>),
}

impl Wire for StatsMsg {
    fn to_frames(&self) -> Frames {
        match self {
            StatsMsg::StatFs(stats) => with_json("STATFS", stats),
            StatsMsg::BuildQueue(depths) => with_json("STATBQ", depths),
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "STATFS" => Ok(StatsMsg::StatFs(json_payload(verb, frames)?)),
            "STATBQ" => Ok(StatsMsg::BuildQueue(json_payload(verb, frames)?)),
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}
