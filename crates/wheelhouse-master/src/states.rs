//! Builder and transfer state.
//!
//! [`SlaveState`] is owned exclusively by the slave driver, one per
//! connected builder. [`TransferState`] is owned exclusively by the
//! artifact receiver, one per in-flight file. Neither is ever shared;
//! everything other tasks learn about them arrives as status events.

use std::collections::VecDeque;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use wheelhouse_index::mkdir_override_symlink;
use wheelhouse_protocol::{HelloInfo, SlaveReply, SlaveRequest};
use wheelhouse_ranges::{exclude, intersect};
use wheelhouse_transport::Identity;
use wheelhouse_types::{ArtifactFile, BuildRecord, PLATFORM_ARMV7, SlaveEvent, SlaveStats};

/// Heartbeat samples kept per builder for monitor replay.
const STATS_HISTORY: usize = 100;

/// Everything the driver knows about one connected builder.
#[derive(Debug)]
pub struct SlaveState {
    identity: Identity,
    slave_id: u64,
    hello: HelloInfo,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    request: Option<SlaveRequest>,
    reply: Option<SlaveReply>,
    build: Option<BuildRecord>,
    stats: VecDeque<SlaveStats>,
    clock_skew: Option<chrono::Duration>,
    killed: bool,
    skipped: bool,
    paused: bool,
    transfer_retries: u32,
}

impl SlaveState {
    pub fn new(identity: Identity, slave_id: u64, hello: HelloInfo) -> Self {
        let now = Utc::now();
        Self {
            identity,
            slave_id,
            hello,
            first_seen: now,
            last_seen: now,
            request: None,
            reply: None,
            build: None,
            stats: VecDeque::with_capacity(STATS_HISTORY),
            clock_skew: None,
            killed: false,
            skipped: false,
            paused: false,
            transfer_retries: 0,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn slave_id(&self) -> u64 {
        self.slave_id
    }

    pub fn label(&self) -> &str {
        &self.hello.label
    }

    pub fn native_abi(&self) -> &str {
        &self.hello.native_abi
    }

    pub fn hello(&self) -> &HelloInfo {
        &self.hello
    }

    pub fn last_reply(&self) -> Option<&SlaveReply> {
        self.reply.as_ref()
    }

    pub fn last_request(&self) -> Option<&SlaveRequest> {
        self.request.as_ref()
    }

    pub fn build(&self) -> Option<&BuildRecord> {
        self.build.as_ref()
    }

    pub fn build_mut(&mut self) -> Option<&mut BuildRecord> {
        self.build.as_mut()
    }

    pub fn set_build(&mut self, build: BuildRecord) {
        self.build = Some(build);
        self.transfer_retries = 0;
    }

    pub fn clock_skew(&self) -> Option<chrono::Duration> {
        self.clock_skew
    }

    pub fn killed(&self) -> bool {
        self.killed
    }

    pub fn skipped(&self) -> bool {
        self.skipped
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn kill(&mut self) {
        self.killed = true;
    }

    pub fn skip(&mut self) {
        self.skipped = true;
    }

    pub fn sleep(&mut self) {
        self.paused = true;
    }

    pub fn wake(&mut self) {
        self.killed = false;
        self.skipped = false;
        self.paused = false;
    }

    /// Transfer retry bookkeeping for the current build.
    pub fn note_transfer_failure(&mut self) -> u32 {
        self.transfer_retries += 1;
        self.transfer_retries
    }

    pub fn note_transfer_success(&mut self) {
        self.transfer_retries = 0;
    }

    /// True once the builder has been silent past its declared
    /// heartbeat timeout.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.hello.busy_timeout) {
            Ok(timeout) => now - self.last_seen > timeout,
            Err(_) => false,
        }
    }

    fn event(&self, verb: &str, payload: serde_json::Value) -> SlaveEvent {
        SlaveEvent {
            slave_id: self.slave_id,
            timestamp: self.last_seen,
            verb: verb.to_owned(),
            payload,
        }
    }

    /// Record an incoming request: refreshes the liveness clock, folds
    /// heartbeat samples into the stats ring, and returns the status
    /// event the fan-out should carry.
    pub fn record_request(&mut self, request: &SlaveRequest) -> Option<SlaveEvent> {
        self.last_seen = Utc::now();
        self.request = Some(request.clone());
        match request {
            SlaveRequest::Idle(stats) | SlaveRequest::Busy(stats) => {
                if self.stats.len() == STATS_HISTORY {
                    self.stats.pop_front();
                }
                self.stats.push_back(stats.clone());
                self.clock_skew = Some(self.last_seen - stats.timestamp);
                Some(self.event(
                    "STATS",
                    serde_json::to_value(stats).unwrap_or(serde_json::Value::Null),
                ))
            }
            _ => None,
        }
    }

    /// Record an outgoing reply and return its status event. CONT is a
    /// pure keepalive: it is neither recorded nor announced. DONE ends
    /// the build cycle and clears the one-shot skip flag.
    pub fn record_reply(&mut self, reply: &SlaveReply) -> Option<SlaveEvent> {
        if matches!(reply, SlaveReply::Cont) {
            return None;
        }
        if matches!(reply, SlaveReply::Done) {
            self.build = None;
            self.skipped = false;
        }
        self.reply = Some(reply.clone());
        Some(self.event(reply.verb(), reply_payload(reply)))
    }

    /// Replay this builder's state for a newly attached monitor: its
    /// HELLO, the heartbeat history, and the last reply sent.
    pub fn replay(&self) -> Vec<SlaveEvent> {
        let mut events = Vec::with_capacity(self.stats.len() + 2);
        events.push(SlaveEvent {
            slave_id: self.slave_id,
            timestamp: self.first_seen,
            verb: "HELLO".to_owned(),
            payload: serde_json::to_value(&self.hello).unwrap_or(serde_json::Value::Null),
        });
        for stats in &self.stats {
            events.push(self.event(
                "STATS",
                serde_json::to_value(stats).unwrap_or(serde_json::Value::Null),
            ));
        }
        if let Some(reply) = &self.reply {
            events.push(self.event(reply.verb(), reply_payload(reply)));
        }
        events
    }
}

fn reply_payload(reply: &SlaveReply) -> serde_json::Value {
    match reply {
        SlaveReply::Ack { slave_id, pypi_url } => serde_json::json!({
            "slave_id": slave_id,
            "pypi_url": pypi_url,
        }),
        SlaveReply::Hello(info) => {
            serde_json::to_value(info).unwrap_or(serde_json::Value::Null)
        }
        SlaveReply::Build { package, version } => serde_json::json!({
            "package": package,
            "version": version,
        }),
        SlaveReply::Send { filename } => serde_json::json!({ "filename": filename }),
        SlaveReply::Sleep | SlaveReply::Done | SlaveReply::Cont | SlaveReply::Die => {
            serde_json::Value::Null
        }
    }
}

/// Failures of the transfer verify/commit path.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer is not complete: {missing} bytes outstanding")]
    Incomplete { missing: u64 },
    #[error("wrong size for {filename}: expected {expected}, got {actual}")]
    SizeMismatch {
        filename: String,
        expected: u64,
        actual: u64,
    },
    #[error("hash mismatch for {filename}: expected {expected}, got {actual}")]
    HashMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One credit-controlled file transfer.
///
/// The file lands in a temporary in the repository staging area and is
/// renamed into its package directory only after the hash checks out.
/// `missing` is an ascending, disjoint list of byte ranges not yet
/// received; `offset` is where the next FETCH walk starts.
#[derive(Debug)]
pub struct TransferState {
    slave_id: u64,
    file: ArtifactFile,
    temp: Option<tempfile::NamedTempFile>,
    credit: u64,
    offset: u64,
    missing: Vec<Range<u64>>,
    chunk_size: u64,
    pipeline_size: u64,
}

impl TransferState {
    /// Stage a transfer: a sparse temporary of the declared size, the
    /// whole file missing, and an initial grant of credit.
    pub fn new(
        slave_id: u64,
        file: ArtifactFile,
        staging_dir: &Path,
        chunk_size: u64,
        pipeline_size: u64,
    ) -> std::io::Result<Self> {
        let temp = tempfile::NamedTempFile::new_in(staging_dir)?;
        temp.as_file().set_len(file.filesize)?;
        let missing = if file.filesize == 0 {
            Vec::new()
        } else {
            vec![0..file.filesize]
        };
        // The initial grant is sized to the file: a transfer never needs
        // more outstanding requests than it has chunks.
        let credit = (file.filesize / chunk_size).clamp(1, pipeline_size);
        Ok(Self {
            slave_id,
            file,
            temp: Some(temp),
            credit,
            offset: 0,
            missing,
            chunk_size,
            pipeline_size,
        })
    }

    pub fn slave_id(&self) -> u64 {
        self.slave_id
    }

    pub fn file(&self) -> &ArtifactFile {
        &self.file
    }

    pub fn credit(&self) -> u64 {
        self.credit
    }

    pub fn missing(&self) -> &[Range<u64>] {
        &self.missing
    }

    /// All bytes received?
    pub fn done(&self) -> bool {
        self.missing.is_empty()
    }

    /// Restore the full pipeline of credit after a mid-transfer HELLO
    /// (the builder timed out waiting for FETCHes). Recovery maxes out
    /// the in-flight requests regardless of file size; the missing set
    /// and walk offset are untouched, so no committed byte is ever
    /// re-requested.
    pub fn reset_credit(&mut self) {
        self.credit = self.pipeline_size;
    }

    /// Spend one credit on the next range to request, walking `missing`
    /// from the current offset and wrapping to its start.
    pub fn fetch(&mut self) -> Option<Range<u64>> {
        if self.credit == 0 {
            return None;
        }
        self.credit -= 1;
        let mut window = self.offset..self.offset.saturating_add(self.chunk_size);
        loop {
            for gap in &self.missing {
                if let Some(found) = intersect(gap, &window) {
                    self.offset = found.end;
                    return Some(found);
                }
            }
            match self.missing.first() {
                Some(first) => window = first.start..first.start.saturating_add(self.chunk_size),
                None => return None,
            }
        }
    }

    /// Accept one chunk: write it at its offset and shrink the missing
    /// set. Out-of-order and duplicate chunks are idempotent. Earns one
    /// credit under strict flow control, or zeroes the credit when the
    /// transfer completes.
    pub fn chunk(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        if let Some(temp) = self.temp.as_mut() {
            let handle = temp.as_file_mut();
            handle.seek(SeekFrom::Start(offset))?;
            handle.write_all(data)?;
        }
        self.missing = exclude(&self.missing, &(offset..offset + data.len() as u64));
        if self.missing.is_empty() {
            self.credit = 0;
        } else {
            self.credit = (self.credit + 1).min(self.pipeline_size);
        }
        Ok(())
    }

    /// Re-hash the staged file and check it against the descriptor.
    pub fn verify(&mut self) -> Result<(), TransferError> {
        if !self.done() {
            return Err(TransferError::Incomplete {
                missing: wheelhouse_ranges::covered(&self.missing),
            });
        }
        let Some(temp) = self.temp.as_mut() else {
            return Err(TransferError::Io(std::io::Error::other(
                "transfer already finished",
            )));
        };
        let handle = temp.as_file_mut();
        handle.flush()?;
        handle.seek(SeekFrom::Start(0))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 65_536];
        let mut size = 0u64;
        loop {
            let n = handle.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        if size != self.file.filesize {
            return Err(TransferError::SizeMismatch {
                filename: self.file.filename.clone(),
                expected: self.file.filesize,
                actual: size,
            });
        }
        let actual = hex::encode(hasher.finalize());
        if actual != self.file.filehash.to_lowercase() {
            return Err(TransferError::HashMismatch {
                filename: self.file.filename.clone(),
                expected: self.file.filehash.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Move the verified file into its package directory. The rename
    /// replaces any existing file or symlink, so a real armv6 upload
    /// rightly clobbers an armv6 alias already in place. For armv7
    /// wheels the armv6 alias symlink is then created best-effort,
    /// never overwriting a real file.
    pub fn commit(mut self, package: &str, simple_dir: &Path) -> Result<PathBuf, TransferError> {
        let Some(temp) = self.temp.take() else {
            return Err(TransferError::Io(std::io::Error::other(
                "transfer already finished",
            )));
        };
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))?;
        let pkg_dir = simple_dir.join(package);
        mkdir_override_symlink(&pkg_dir)
            .map_err(|err| TransferError::Io(std::io::Error::other(err.to_string())))?;
        let final_path = pkg_dir.join(&self.file.filename);
        temp.persist(&final_path)
            .map_err(|err| TransferError::Io(err.error))?;
        if self.file.platform_tag == PLATFORM_ARMV7
            && let Some(alias_name) = self.file.armv6_filename()
        {
            let alias = pkg_dir.join(alias_name);
            match std::os::unix::fs::symlink(&self.file.filename, &alias) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(TransferError::Io(err)),
            }
        }
        Ok(final_path)
    }

    /// Abandon the transfer; the staged temporary is unlinked.
    pub fn rollback(mut self) {
        // NamedTempFile unlinks on drop.
        self.temp.take();
    }
}
