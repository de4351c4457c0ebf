//! The publisher's ingress queue.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use wheelhouse_transport::{Frames, Wire, WireError, verb_frame};
use wheelhouse_types::MasterStats;

use crate::{bare, json_payload, no_payload, with_json};

/// anyone → publisher.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexMsg {
    /// Rebuild one package's project index.
    Project(String),
    /// Rebuild the package's project index and, if the package is new,
    /// the root index.
    Both(String),
    /// Remove a package's directory and aliases.
    DeletePackage(String),
    /// Remove one version's artifacts and rewrite the package index.
    DeleteVersion(String, String),
    /// Force regeneration of the root package listing.
    Search,
    /// Rewrite the landing page with fresh statistics.
    Home(MasterStats),
}

#[derive(Serialize, Deserialize)]
struct PackagePayload {
    package: String,
}

#[derive(Serialize, Deserialize)]
struct VersionPayload {
    package: String,
    version: String,
}

impl Wire for IndexMsg {
    fn to_frames(&self) -> Frames {
        match self {
            IndexMsg::Project(package) => with_json(
                "PKGPROJ",
                &PackagePayload {
                    package: package.clone(),
                },
            ),
            IndexMsg::Both(package) => with_json(
                "PKGBOTH",
                &PackagePayload {
                    package: package.clone(),
                },
            ),
            IndexMsg::DeletePackage(package) => with_json(
                "DELPKG",
                &PackagePayload {
                    package: package.clone(),
                },
            ),
            IndexMsg::DeleteVersion(package, version) => with_json(
                "DELVER",
                &VersionPayload {
                    package: package.clone(),
                    version: version.clone(),
                },
            ),
            IndexMsg::Search => bare("SEARCH"),
            IndexMsg::Home(stats) => with_json("HOME", stats),
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "PKGPROJ" => {
                let payload: PackagePayload = json_payload(verb, frames)?;
                Ok(IndexMsg::Project(payload.package))
            }
            "PKGBOTH" => {
                let payload: PackagePayload = json_payload(verb, frames)?;
                Ok(IndexMsg::Both(payload.package))
            }
            "DELPKG" => {
                let payload: PackagePayload = json_payload(verb, frames)?;
                Ok(IndexMsg::DeletePackage(payload.package))
            }
            "DELVER" => {
                let payload: VersionPayload = json_payload(verb, frames)?;
                Ok(IndexMsg::DeleteVersion(payload.package, payload.version))
            }
            "SEARCH" => no_payload(verb, frames).map(|_| IndexMsg::Search),
            "HOME" => Ok(IndexMsg::Home(json_payload(verb, frames)?)),
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn roundtrips() {
        let stats = MasterStats {
            timestamp: Utc::now(),
            packages_built: 1,
            builds_last_hour: 2,
            builds_time: Duration::from_secs(3),
            builds_size: 4,
            builds_pending: BTreeMap::new(),
            new_last_hour: 5,
            files_count: 6,
            downloads_last_hour: Some(7),
            downloads_last_month: None,
            downloads_all: None,
            disk_size: 8,
            disk_free: 9,
            mem_size: 10,
            mem_free: 11,
            swap_size: 12,
            swap_free: 13,
            load_average: 1.5,
            cpu_temp: 45.0,
        };
        for msg in [
            IndexMsg::Project("foo".to_owned()),
            IndexMsg::Both("foo".to_owned()),
            IndexMsg::DeletePackage("foo".to_owned()),
            IndexMsg::DeleteVersion("foo".to_owned(), "0.1".to_owned()),
            IndexMsg::Search,
            IndexMsg::Home(stats),
        ] {
            assert_eq!(IndexMsg::from_frames(&msg.to_frames()).expect("decode"), msg);
        }
    }
}
