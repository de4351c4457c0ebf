//! The admin ingress: one-shot import and catalog-maintenance requests.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use wheelhouse_transport::{Frames, Wire, WireError, verb_frame};
use wheelhouse_types::ArtifactFile;

use crate::{bare, json_payload, no_payload, with_json};

/// A build supplied by the importer rather than a builder. The ABI may be
/// omitted, in which case the master assigns the lexicographically
/// smallest supported one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBuild {
    pub abi_tag: Option<String>,
    pub package: String,
    pub version: String,
    pub status: bool,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub output: String,
    pub files: Vec<ArtifactFile>,
}

/// What a REBUILD request should regenerate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "target", content = "package")]
pub enum RebuildTarget {
    /// The landing page.
    Home,
    /// The root package listing.
    Search,
    /// One package's project index.
    Project(String),
    /// Project and root indexes for one package, or for every known
    /// package when none is named.
    Both(Option<String>),
}

/// importer → master.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportRequest {
    Import(ImportBuild),
    /// The importer finished uploading the requested file.
    Sent,
    AddPkg {
        package: String,
        skip: Option<String>,
    },
    AddVer {
        package: String,
        version: String,
        skip: Option<String>,
        yanked: bool,
    },
    RemovePkg {
        package: String,
        /// Also delete the package's build history.
        builds: bool,
    },
    RemoveVer {
        package: String,
        version: String,
        builds: bool,
    },
    Rebuild(RebuildTarget),
}

impl ImportRequest {
    pub fn verb(&self) -> &'static str {
        match self {
            ImportRequest::Import(_) => "IMPORT",
            ImportRequest::Sent => "SENT",
            ImportRequest::AddPkg { .. } => "ADDPKG",
            ImportRequest::AddVer { .. } => "ADDVER",
            ImportRequest::RemovePkg { .. } => "REMPKG",
            ImportRequest::RemoveVer { .. } => "REMVER",
            ImportRequest::Rebuild(_) => "REBUILD",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct AddPkgPayload {
    package: String,
    skip: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct AddVerPayload {
    package: String,
    version: String,
    skip: Option<String>,
    yanked: bool,
}

#[derive(Serialize, Deserialize)]
struct RemovePkgPayload {
    package: String,
    builds: bool,
}

#[derive(Serialize, Deserialize)]
struct RemoveVerPayload {
    package: String,
    version: String,
    builds: bool,
}

impl Wire for ImportRequest {
    fn to_frames(&self) -> Frames {
        match self {
            ImportRequest::Import(build) => with_json("IMPORT", build),
            ImportRequest::Sent => bare("SENT"),
            ImportRequest::AddPkg { package, skip } => with_json(
                "ADDPKG",
                &AddPkgPayload {
                    package: package.clone(),
                    skip: skip.clone(),
                },
            ),
            ImportRequest::AddVer {
                package,
                version,
                skip,
                yanked,
            } => with_json(
                "ADDVER",
                &AddVerPayload {
                    package: package.clone(),
                    version: version.clone(),
                    skip: skip.clone(),
                    yanked: *yanked,
                },
            ),
            ImportRequest::RemovePkg { package, builds } => with_json(
                "REMPKG",
                &RemovePkgPayload {
                    package: package.clone(),
                    builds: *builds,
                },
            ),
            ImportRequest::RemoveVer {
                package,
                version,
                builds,
            } => with_json(
                "REMVER",
                &RemoveVerPayload {
                    package: package.clone(),
                    version: version.clone(),
                    builds: *builds,
                },
            ),
            ImportRequest::Rebuild(target) => with_json("REBUILD", target),
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        match verb {
            "IMPORT" => Ok(ImportRequest::Import(json_payload(verb, frames)?)),
            "SENT" => no_payload(verb, frames).map(|_| ImportRequest::Sent),
            "ADDPKG" => {
                let payload: AddPkgPayload = json_payload(verb, frames)?;
                Ok(ImportRequest::AddPkg {
                    package: payload.package,
                    skip: payload.skip,
                })
            }
            "ADDVER" => {
                let payload: AddVerPayload = json_payload(verb, frames)?;
                Ok(ImportRequest::AddVer {
                    package: payload.package,
                    version: payload.version,
                    skip: payload.skip,
                    yanked: payload.yanked,
                })
            }
            "REMPKG" => {
                let payload: RemovePkgPayload = json_payload(verb, frames)?;
                Ok(ImportRequest::RemovePkg {
                    package: payload.package,
                    builds: payload.builds,
                })
            }
            "REMVER" => {
                let payload: RemoveVerPayload = json_payload(verb, frames)?;
                Ok(ImportRequest::RemoveVer {
                    package: payload.package,
                    version: payload.version,
                    builds: payload.builds,
                })
            }
            "REBUILD" => Ok(ImportRequest::Rebuild(json_payload(verb, frames)?)),
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}

/// master → importer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportReply {
    /// Upload this file now through the file queue.
    Send { filename: String },
    /// The named operation completed.
    Done { verb: String },
    Error { reason: String },
}

#[derive(Serialize, Deserialize)]
struct SendPayload {
    filename: String,
}

#[derive(Serialize, Deserialize)]
struct DonePayload {
    verb: String,
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    reason: String,
}

impl Wire for ImportReply {
    fn to_frames(&self) -> Frames {
        match self {
            ImportReply::Send { filename } => with_json(
                "SEND",
                &SendPayload {
                    filename: filename.clone(),
                },
            ),
            ImportReply::Done { verb } => with_json("DONE", &DonePayload { verb: verb.clone() }),
            ImportReply::Error { reason } => with_json(
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
            "SEND" => {
                let payload: SendPayload = json_payload(verb, frames)?;
                Ok(ImportReply::Send {
                    filename: payload.filename,
                })
            }
            "DONE" => {
                let payload: DonePayload = json_payload(verb, frames)?;
                Ok(ImportReply::Done { verb: payload.verb })
            }
            "ERROR" => {
                let payload: ErrorPayload = json_payload(verb, frames)?;
                Ok(ImportReply::Error {
                    reason: payload.reason,
                })
            }
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn requests_roundtrip() {
        let file = ArtifactFile::from_filename(
            "foo-0.1-cp34-cp34m-linux_armv7l.whl",
            123_456,
            "cafebabe",
            BTreeMap::new(),
        )
        .expect("artifact");
        for msg in [
            ImportRequest::Import(ImportBuild {
                abi_tag: None,
                package: "foo".to_owned(),
                version: "0.1".to_owned(),
                status: true,
                duration: Duration::from_secs(90),
                output: "built externally".to_owned(),
                files: vec![file],
            }),
            ImportRequest::Sent,
            ImportRequest::AddPkg {
                package: "foo".to_owned(),
                skip: Some("legal".to_owned()),
            },
            ImportRequest::AddVer {
                package: "foo".to_owned(),
                version: "0.2".to_owned(),
                skip: None,
                yanked: true,
            },
            ImportRequest::RemovePkg {
                package: "foo".to_owned(),
                builds: true,
            },
            ImportRequest::RemoveVer {
                package: "foo".to_owned(),
                version: "0.1".to_owned(),
                builds: false,
            },
            ImportRequest::Rebuild(RebuildTarget::Home),
            ImportRequest::Rebuild(RebuildTarget::Search),
            ImportRequest::Rebuild(RebuildTarget::Project("foo".to_owned())),
            ImportRequest::Rebuild(RebuildTarget::Both(None)),
            ImportRequest::Rebuild(RebuildTarget::Both(Some("foo".to_owned()))),
        ] {
            assert_eq!(
                ImportRequest::from_frames(&msg.to_frames()).expect("decode"),
                msg
            );
        }
    }

    #[test]
    fn replies_roundtrip() {
        for msg in [
            ImportReply::Send {
                filename: "foo-0.1-cp34-cp34m-linux_armv7l.whl".to_owned(),
            },
            ImportReply::Done {
                verb: "IMPORT".to_owned(),
            },
            ImportReply::Error {
                reason: "armv6l wheels are synthesized, never supplied".to_owned(),
            },
        ] {
            assert_eq!(
                ImportReply::from_frames(&msg.to_frames()).expect("decode"),
                msg
            );
        }
    }
}
