//! Heartbeat and aggregate statistics records.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Filesystem totals for the repository volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStats {
    /// Total size of the filesystem in bytes.
    pub size: u64,
    /// Bytes available to unprivileged writers.
    pub free: u64,
}

/// One heartbeat statistics sample reported by a builder with IDLE or
/// BUSY. The driver keeps a ring of the last 100 of these per builder and
/// derives its clock-skew estimate from `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaveStats {
    pub timestamp: DateTime<Utc>,
    pub disk_size: u64,
    pub disk_free: u64,
    pub mem_size: u64,
    pub mem_free: u64,
    pub swap_size: u64,
    pub swap_free: u64,
    pub load_average: f64,
    pub cpu_temp: f64,
}

/// The aggregate sample produced by the stats task every tick, pushed to
/// both the publisher (landing page) and the status fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterStats {
    pub timestamp: DateTime<Utc>,
    /// Packages with at least one successful build.
    pub packages_built: u64,
    /// Builds completed in the trailing hour.
    pub builds_last_hour: u64,
    /// Cumulative time spent building.
    #[serde(with = "humantime_serde")]
    pub builds_time: Duration,
    /// Cumulative bytes of committed artifacts.
    pub builds_size: u64,
    /// Pending (package, version) pairs per ABI.
    pub builds_pending: BTreeMap<String, u64>,
    /// Packages first seen in the trailing hour.
    pub new_last_hour: u64,
    /// Committed artifact count.
    pub files_count: u64,
    /// Download counters, absent until accounting is plugged in.
    pub downloads_last_hour: Option<u64>,
    pub downloads_last_month: Option<u64>,
    pub downloads_all: Option<u64>,
    pub disk_size: u64,
    pub disk_free: u64,
    pub mem_size: u64,
    pub mem_free: u64,
    pub swap_size: u64,
    pub swap_free: u64,
    pub load_average: f64,
    pub cpu_temp: f64,
}

impl MasterStats {
    /// Total queue depth across all ABIs.
    pub fn total_pending(&self) -> u64 {
        self.builds_pending.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MasterStats {
        MasterStats {
            timestamp: Utc::now(),
            packages_built: 10,
            builds_last_hour: 3,
            builds_time: Duration::from_secs(3600),
            builds_size: 1 << 30,
            builds_pending: BTreeMap::from([("cp34m".to_owned(), 5), ("cp35m".to_owned(), 2)]),
            new_last_hour: 1,
            files_count: 25,
            downloads_last_hour: None,
            downloads_last_month: None,
            downloads_all: None,
            disk_size: 100,
            disk_free: 60,
            mem_size: 8,
            mem_free: 4,
            swap_size: 1,
            swap_free: 1,
            load_average: 0.5,
            cpu_temp: 48.2,
        }
    }

    #[test]
    fn total_pending_sums_abis() {
        assert_eq!(sample().total_pending(), 7);
    }

    #[test]
    fn master_stats_roundtrips_through_json() {
        let stats = sample();
        let encoded = serde_json::to_string(&stats).expect("encode");
        let decoded: MasterStats = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, stats);
    }

    #[test]
    fn slave_stats_roundtrips_through_json() {
        let stats = SlaveStats {
            timestamp: Utc::now(),
            disk_size: 1,
            disk_free: 2,
            mem_size: 3,
            mem_free: 4,
            swap_size: 5,
            swap_free: 6,
            load_average: 0.25,
            cpu_temp: 51.0,
        };
        let encoded = serde_json::to_string(&stats).expect("encode");
        let decoded: SlaveStats = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, stats);
    }
}
