//! Core domain types for wheelhouse.
//!
//! These are the records that flow between the master's tasks: build
//! artifacts ([`ArtifactFile`]), build attempts ([`BuildRecord`]), builder
//! heartbeat samples ([`SlaveStats`]) and the aggregate statistics record
//! ([`MasterStats`]). Everything here crosses task boundaries by value, so
//! the types are plain serde structs with no interior mutability.
//!
//! The one deliberately stateful bit is [`ArtifactFile::transferred`],
//! which is flipped exactly once, after a transfer has been
//! hash-verified.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod stats;
mod wheel;

pub use stats::{DiskStats, MasterStats, SlaveStats};
pub use wheel::{WheelName, WheelNameError};

/// Platform tag of ARMv7 wheels, the source side of the armv6 aliasing.
pub const PLATFORM_ARMV7: &str = "linux_armv7l";

/// Platform tag of ARMv6 wheels, only ever synthesized, never built.
pub const PLATFORM_ARMV6: &str = "linux_armv6l";

/// A single build artifact (a wheel) and the tags extracted from its
/// filename, which obeys `{pkg}-{ver}-{py}-{abi}-{plat}.whl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    /// Original filename of the artifact.
    pub filename: String,
    /// Size of the file in bytes.
    pub filesize: u64,
    /// Lowercase hex SHA-256 of the file contents.
    pub filehash: String,
    /// Package tag (first `-` separated component).
    pub package_tag: String,
    /// Version tag (second component).
    pub version_tag: String,
    /// Python version tag (third from last component).
    pub py_version_tag: String,
    /// ABI tag (second from last component).
    pub abi_tag: String,
    /// Platform tag (last component).
    pub platform_tag: String,
    /// Dependency-source name to ordered list of dependency names.
    pub dependencies: BTreeMap<String, Vec<String>>,
    /// Whether the file has reached the master and been verified.
    pub transferred: bool,
}

impl ArtifactFile {
    /// Build a descriptor by parsing the five tags out of `filename`.
    pub fn from_filename(
        filename: &str,
        filesize: u64,
        filehash: &str,
        dependencies: BTreeMap<String, Vec<String>>,
    ) -> Result<Self, WheelNameError> {
        let name = WheelName::parse(filename)?;
        Ok(Self {
            filename: filename.to_owned(),
            filesize,
            filehash: filehash.to_owned(),
            package_tag: name.package_tag,
            version_tag: name.version_tag,
            py_version_tag: name.py_version_tag,
            abi_tag: name.abi_tag,
            platform_tag: name.platform_tag,
            dependencies,
            transferred: false,
        })
    }

    /// Record that the transfer of this file has been verified.
    pub fn mark_transferred(&mut self) {
        self.transferred = true;
    }

    /// The filename this artifact would carry under the armv6 platform
    /// tag, or `None` if it is not an armv7 wheel.
    pub fn armv6_filename(&self) -> Option<String> {
        self.filename
            .strip_suffix("linux_armv7l.whl")
            .map(|base| format!("{base}linux_armv6l.whl"))
    }
}

/// The state of one build attempt on one builder.
///
/// Created by the slave driver when a builder reports BUILT, logged with
/// the catalog, then drained file by file through the transfer path.
/// `build_id` stays `None` until the catalog has accepted the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// The master's identifier for the builder.
    pub slave_id: u64,
    /// Package that was built.
    pub package: String,
    /// Version that was built.
    pub version: String,
    /// ABI the build targeted. Never the sentinel `"none"`.
    pub abi_tag: String,
    /// Whether the build succeeded.
    pub status: bool,
    /// Wall-clock duration of the build.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Captured builder log.
    pub output: String,
    /// Artifacts produced, keyed by filename. Empty when `status` is
    /// false. The map is ordered so `next_file` is deterministic.
    pub files: BTreeMap<String, ArtifactFile>,
    /// Catalog-assigned id, absent until the build has been logged.
    pub build_id: Option<i64>,
}

impl BuildRecord {
    pub fn new(
        slave_id: u64,
        package: impl Into<String>,
        version: impl Into<String>,
        abi_tag: impl Into<String>,
        status: bool,
        duration: Duration,
        output: impl Into<String>,
        files: Vec<ArtifactFile>,
    ) -> Self {
        let abi_tag = abi_tag.into();
        debug_assert_ne!(abi_tag, "none");
        Self {
            slave_id,
            package: package.into(),
            version: version.into(),
            abi_tag,
            status,
            duration,
            output: output.into(),
            files: files.into_iter().map(|f| (f.filename.clone(), f)).collect(),
            build_id: None,
        }
    }

    /// True once every artifact has been transferred and verified.
    pub fn transfers_done(&self) -> bool {
        self.files.values().all(|f| f.transferred)
    }

    /// Filename of the next artifact awaiting transfer, if any.
    pub fn next_file(&self) -> Option<&str> {
        self.files
            .values()
            .find(|f| !f.transferred)
            .map(|f| f.filename.as_str())
    }

    /// Record the id the catalog assigned to this build.
    pub fn logged(&mut self, build_id: i64) {
        self.build_id = Some(build_id);
    }

    /// For every armv7 artifact, synthesize a twin descriptor with the
    /// platform tag rewritten to armv6, the same content hash, and the
    /// transferred flag pre-set (the twin is materialized as a symlink at
    /// commit time, never moved over the wire). Catalog consumers see both
    /// rows; filesystem clients see the symlink.
    pub fn alias_armv7_to_armv6(&mut self) {
        let twins: Vec<ArtifactFile> = self
            .files
            .values()
            .filter(|f| f.platform_tag == PLATFORM_ARMV7)
            .filter_map(|f| {
                let filename = f.armv6_filename()?;
                Some(ArtifactFile {
                    filename,
                    platform_tag: PLATFORM_ARMV6.to_owned(),
                    transferred: true,
                    ..f.clone()
                })
            })
            .collect();
        for twin in twins {
            self.files.insert(twin.filename.clone(), twin);
        }
    }
}

/// A timestamped status event about one builder, replayed to monitors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaveEvent {
    pub slave_id: u64,
    pub timestamp: DateTime<Utc>,
    pub verb: String,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(filename: &str) -> ArtifactFile {
        ArtifactFile::from_filename(filename, 123_456, "0123abcd", BTreeMap::new())
            .expect("valid wheel name")
    }

    #[test]
    fn from_filename_extracts_tags() {
        let file = artifact("foo-0.1-cp34-cp34m-linux_armv7l.whl");
        assert_eq!(file.package_tag, "foo");
        assert_eq!(file.version_tag, "0.1");
        assert_eq!(file.py_version_tag, "cp34");
        assert_eq!(file.abi_tag, "cp34m");
        assert_eq!(file.platform_tag, "linux_armv7l");
        assert!(!file.transferred);
    }

    #[test]
    fn armv6_filename_rewrites_suffix() {
        let file = artifact("foo-0.1-cp34-cp34m-linux_armv7l.whl");
        assert_eq!(
            file.armv6_filename().as_deref(),
            Some("foo-0.1-cp34-cp34m-linux_armv6l.whl")
        );
    }

    #[test]
    fn armv6_filename_is_none_for_other_platforms() {
        let file = artifact("foo-0.1-py2.py3-none-any.whl");
        assert_eq!(file.armv6_filename(), None);
    }

    fn build_with(files: Vec<ArtifactFile>) -> BuildRecord {
        BuildRecord::new(
            1,
            "foo",
            "0.1",
            "cp34m",
            true,
            Duration::from_secs(5),
            "ok",
            files,
        )
    }

    #[test]
    fn next_file_walks_in_filename_order() {
        let mut build = build_with(vec![
            artifact("foo-0.1-cp35-cp35m-linux_armv7l.whl"),
            artifact("foo-0.1-cp34-cp34m-linux_armv7l.whl"),
        ]);
        assert_eq!(build.next_file(), Some("foo-0.1-cp34-cp34m-linux_armv7l.whl"));
        build
            .files
            .get_mut("foo-0.1-cp34-cp34m-linux_armv7l.whl")
            .unwrap()
            .mark_transferred();
        assert_eq!(build.next_file(), Some("foo-0.1-cp35-cp35m-linux_armv7l.whl"));
        build
            .files
            .get_mut("foo-0.1-cp35-cp35m-linux_armv7l.whl")
            .unwrap()
            .mark_transferred();
        assert_eq!(build.next_file(), None);
        assert!(build.transfers_done());
    }

    #[test]
    fn alias_creates_pretransferred_twin() {
        let mut build = build_with(vec![artifact("foo-0.1-cp34-cp34m-linux_armv7l.whl")]);
        build.alias_armv7_to_armv6();
        assert_eq!(build.files.len(), 2);
        let twin = &build.files["foo-0.1-cp34-cp34m-linux_armv6l.whl"];
        assert_eq!(twin.platform_tag, PLATFORM_ARMV6);
        assert_eq!(twin.filehash, "0123abcd");
        assert!(twin.transferred);
        // The original is untouched and still needs the wire.
        assert!(!build.files["foo-0.1-cp34-cp34m-linux_armv7l.whl"].transferred);
        assert_eq!(build.next_file(), Some("foo-0.1-cp34-cp34m-linux_armv7l.whl"));
    }

    #[test]
    fn alias_skips_non_arm_wheels() {
        let mut build = build_with(vec![artifact("foo-0.1-py2.py3-none-any.whl")]);
        build.alias_armv7_to_armv6();
        assert_eq!(build.files.len(), 1);
    }

    #[test]
    fn alias_is_idempotent() {
        let mut build = build_with(vec![artifact("foo-0.1-cp34-cp34m-linux_armv7l.whl")]);
        build.alias_armv7_to_armv6();
        build.alias_armv7_to_armv6();
        assert_eq!(build.files.len(), 2);
    }

    #[test]
    fn build_record_roundtrips_through_json() {
        let mut build = build_with(vec![artifact("foo-0.1-cp34-cp34m-linux_armv7l.whl")]);
        build.logged(42);
        let encoded = serde_json::to_string(&build).expect("encode");
        let decoded: BuildRecord = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, build);
    }
}
