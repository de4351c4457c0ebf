//! The artifact receiver.
//!
//! Serves two queues: the builders' chunk stream on a ROUTER endpoint,
//! and a REQ/REP control queue on which the slave driver and the admin
//! ingress stage (EXPECT), verify (VERIFY) and remove artifacts. The
//! credit/offset scheme lives in [`TransferState`]; this task wires it
//! to the sockets and owns the transfer table.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, error, info, warn};
use wheelhouse_protocol::{ControlMsg, FileReply, FileRequest, FsReply, FsRequest, StatsMsg};
use wheelhouse_transport::{
    Context, Identity, PushSocket, RepSocket, Router, SubSocket, WireError,
};

use crate::config::{INT_CONTROL_QUEUE, INT_FS_QUEUE, MasterConfig};
use crate::info as sysinfo;
use crate::states::TransferState;
use crate::tasks::{TaskControl, control_or_quit};

const TASK: &str = "master::file_juggler";

pub struct FileJuggler {
    files: Router<FileRequest, FileReply>,
    fs: RepSocket<FsRequest, FsReply>,
    stats: PushSocket<StatsMsg>,
    control: SubSocket<ControlMsg>,
    output_path: PathBuf,
    chunk_size: u64,
    pipeline_size: u64,
    /// Transfers staged by EXPECT, keyed by builder id.
    transfers: HashMap<u64, TransferState>,
    /// File-queue connections bound to a transfer by HELLO.
    active: HashMap<Identity, u64>,
}

impl FileJuggler {
    pub async fn new(ctx: &Context, config: &MasterConfig) -> anyhow::Result<Self> {
        let output_path = config.output_path.clone();
        std::fs::create_dir_all(output_path.join("simple"))?;
        Ok(Self {
            files: ctx
                .router(&config.file_queue, (config.pipeline_size as usize) * 50)
                .await?,
            fs: ctx.rep(INT_FS_QUEUE, 1).await?,
            stats: ctx.push(&config.stats_queue).await?,
            control: ctx.subscribe(INT_CONTROL_QUEUE).await?,
            output_path,
            chunk_size: config.chunk_size,
            pipeline_size: config.pipeline_size,
            transfers: HashMap::new(),
            active: HashMap::new(),
        })
    }

    /// The bound file endpoint (configured port 0 in tests).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.files.local_addr()
    }

    fn simple_dir(&self) -> PathBuf {
        self.output_path.join("simple")
    }

    pub async fn run(mut self) {
        info!(task = TASK, "starting");
        loop {
            tokio::select! {
                result = self.control.recv() => {
                    // Not pauseable: EXPECT/VERIFY turns from the driver
                    // and in-flight chunk streams must keep draining even
                    // while the master is paused.
                    match control_or_quit(TASK, result) {
                        Ok(ControlMsg::Quit) | Err(TaskControl::Quit) => break,
                        Ok(_) | Err(TaskControl::Continue) => continue,
                    }
                }
                request = self.fs.recv() => {
                    match request {
                        Ok(request) => {
                            let reply = self.handle_fs(request).await;
                            if self.fs.send(&reply).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                incoming = self.files.recv() => {
                    match incoming {
                        Ok((identity, request)) => self.handle_file(identity, request).await,
                        Err(_) => break,
                    }
                }
            }
        }
        info!(task = TASK, "stopped");
    }

    /// Handle one control-queue request. REP discipline: every request
    /// is answered, including malformed ones.
    async fn handle_fs(&mut self, request: Result<FsRequest, WireError>) -> FsReply {
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                error!(task = TASK, %err, "malformed fs request");
                return FsReply::Error(err.to_string());
            }
        };
        match request {
            FsRequest::Expect { slave_id, file } => {
                debug!(task = TASK, slave_id, filename = %file.filename, "expecting");
                match TransferState::new(
                    slave_id,
                    file,
                    &self.simple_dir(),
                    self.chunk_size,
                    self.pipeline_size,
                ) {
                    Ok(transfer) => {
                        // A re-EXPECT after a failed verify replaces the
                        // old staging wholesale.
                        if let Some(stale) = self.transfers.insert(slave_id, transfer) {
                            stale.rollback();
                        }
                        FsReply::Done
                    }
                    Err(err) => {
                        error!(task = TASK, slave_id, %err, "cannot stage transfer");
                        FsReply::Error(err.to_string())
                    }
                }
            }
            FsRequest::Verify { slave_id, package } => self.do_verify(slave_id, &package).await,
            FsRequest::Remove { package, filename } => {
                let path = self.simple_dir().join(&package).join(&filename);
                match std::fs::remove_file(&path) {
                    Ok(()) => FsReply::Done,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => FsReply::Done,
                    Err(err) => {
                        error!(task = TASK, package, filename, %err, "cannot remove artifact");
                        FsReply::Error(err.to_string())
                    }
                }
            }
            FsRequest::StatFs => match sysinfo::statvfs(&self.output_path) {
                Ok(stats) => FsReply::Stats(stats),
                Err(err) => FsReply::Error(err.to_string()),
            },
        }
    }

    async fn do_verify(&mut self, slave_id: u64, package: &str) -> FsReply {
        let Some(mut transfer) = self.transfers.remove(&slave_id) else {
            return FsReply::Error(format!("no active transfer for slave {slave_id}"));
        };
        self.active.retain(|_, bound| *bound != slave_id);
        match transfer.verify() {
            Ok(()) => match transfer.commit(package, &self.simple_dir()) {
                Ok(path) => {
                    info!(task = TASK, slave_id, path = %path.display(), "committed");
                    if let Ok(disk) = sysinfo::statvfs(&self.output_path) {
                        let _ = self.stats.send(&StatsMsg::StatFs(disk)).await;
                    }
                    FsReply::Done
                }
                Err(err) => {
                    error!(task = TASK, slave_id, %err, "commit failed");
                    FsReply::Error(err.to_string())
                }
            },
            Err(err) => {
                warn!(task = TASK, slave_id, %err, "verification failed; rolling back");
                transfer.rollback();
                FsReply::Error(err.to_string())
            }
        }
    }

    async fn handle_file(&mut self, identity: Identity, request: Result<FileRequest, WireError>) {
        match request {
            Ok(FileRequest::Hello { slave_id }) => {
                if self.transfers.contains_key(&slave_id) {
                    // The first HELLO fetches under the grant staged by
                    // EXPECT. A repeated HELLO means the builder lost
                    // our FETCHes; restore the full pipeline of credit
                    // and keep walking from the current offset. Bytes
                    // already written are never re-requested.
                    let resumed = self.active.values().any(|&bound| bound == slave_id);
                    self.active.insert(identity, slave_id);
                    if resumed && let Some(transfer) = self.transfers.get_mut(&slave_id) {
                        transfer.reset_credit();
                    }
                    self.pump(identity, slave_id).await;
                } else {
                    warn!(task = TASK, %identity, slave_id, "HELLO with no staged transfer");
                }
            }
            Ok(FileRequest::Chunk { offset, data }) => {
                let Some(slave_id) = self.active.get(&identity).copied() else {
                    debug!(task = TASK, %identity, "ignoring redundant CHUNK from prior transfer");
                    return;
                };
                let Some(transfer) = self.transfers.get_mut(&slave_id) else {
                    debug!(task = TASK, %identity, "ignoring redundant CHUNK from prior transfer");
                    return;
                };
                if let Err(err) = transfer.chunk(offset, &data) {
                    // A staging write failure will surface at VERIFY;
                    // the transfer stays open so the driver can decide.
                    error!(task = TASK, slave_id, offset, %err, "cannot write chunk");
                    return;
                }
                if transfer.done() {
                    debug!(task = TASK, slave_id, "transfer complete");
                    self.active.remove(&identity);
                    let _ = self.files.send(identity, &FileReply::Done).await;
                } else {
                    self.pump(identity, slave_id).await;
                }
            }
            Err(err) => {
                warn!(task = TASK, %identity, %err, "invalid message on file queue");
            }
        }
    }

    /// Issue FETCHes while the transfer has credit to spend.
    async fn pump(&mut self, identity: Identity, slave_id: u64) {
        while let Some(range) = self
            .transfers
            .get_mut(&slave_id)
            .and_then(TransferState::fetch)
        {
            let reply = FileReply::Fetch {
                offset: range.start,
                length: range.end - range.start,
            };
            if self.files.send(identity, &reply).await.is_err() {
                warn!(task = TASK, %identity, slave_id, "builder gone mid-transfer");
                self.active.remove(&identity);
                break;
            }
        }
    }
}
