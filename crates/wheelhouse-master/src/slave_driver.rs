//! The builder protocol state machine and dispatcher.
//!
//! One ROUTER endpoint, one [`SlaveState`] per connected builder,
//! keyed by the connection's ephemeral identity. Builders drive the
//! interaction: the master never pushes work, it answers IDLE with
//! either a job or SLEEP. Anything that arrives out of protocol gets
//! DIE and eviction; a builder that stops heartbeating is evicted at
//! the next sweep and its build becomes eligible again at the next
//! planner rebuild.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, error, info, warn};
use wheelhouse_catalog::CatalogClient;
use wheelhouse_protocol::{
    BuiltReport, ControlMsg, FsReply, FsRequest, IndexMsg, PlannerReply, PlannerRequest,
    SlaveReply, SlaveRequest, StatusEvent,
};
use wheelhouse_transport::{
    Context, Identity, PushSocket, ReqSocket, Router, SubSocket, WireError,
};
use wheelhouse_types::BuildRecord;

use crate::config::{INT_CONTROL_QUEUE, INT_FS_QUEUE, INT_STATUS_QUEUE, MasterConfig};
use crate::states::SlaveState;
use crate::tasks::{TaskControl, control_or_quit};

const TASK: &str = "master::slave_driver";

/// Re-SENDs attempted for one file before the build is abandoned with
/// whatever was committed so far.
const MAX_TRANSFER_RETRIES: u32 = 3;

/// Wheel filename tags escape name separators to `_`; compare a tag to
/// a package name under that normal form, case-insensitively.
fn tag_matches_package(tag: &str, package: &str) -> bool {
    let normalize = |name: &str| {
        name.chars()
            .map(|c| match c {
                '-' | '.' | '_' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect::<String>()
    };
    normalize(tag) == normalize(package)
}

pub struct SlaveDriver {
    router: Router<SlaveRequest, SlaveReply>,
    planner: ReqSocket<PlannerRequest, PlannerReply>,
    fs: ReqSocket<FsRequest, FsReply>,
    status: PushSocket<StatusEvent>,
    web: PushSocket<IndexMsg>,
    control: SubSocket<ControlMsg>,
    catalog: CatalogClient,
    pypi_simple: String,
    slaves: HashMap<Identity, SlaveState>,
    /// Monotonic and process-local; restarting the master restarts it
    /// at zero, which is safe because transport identities are
    /// ephemeral.
    next_slave_id: u64,
    paused: bool,
}

impl SlaveDriver {
    pub async fn new(
        ctx: &Context,
        config: &MasterConfig,
        catalog: CatalogClient,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            router: ctx.router(&config.slave_queue, 64).await?,
            planner: ctx.req(&config.builds_queue).await?,
            fs: ctx.req(INT_FS_QUEUE).await?,
            status: ctx.push(INT_STATUS_QUEUE).await?,
            web: ctx.push(&config.web_queue).await?,
            control: ctx.subscribe(INT_CONTROL_QUEUE).await?,
            catalog,
            pypi_simple: config.pypi_simple.clone(),
            slaves: HashMap::new(),
            next_slave_id: 0,
            paused: false,
        })
    }

    /// The bound builder endpoint (configured port 0 in tests).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.router.local_addr()
    }

    pub async fn run(mut self) {
        info!(task = TASK, "starting");
        let mut sweep = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                result = self.control.recv() => {
                    let msg = match control_or_quit(TASK, result) {
                        Ok(msg) => msg,
                        Err(TaskControl::Continue) => continue,
                        Err(TaskControl::Quit) => break,
                    };
                    if self.handle_control(msg).await == TaskControl::Quit {
                        break;
                    }
                }
                incoming = self.router.recv() => {
                    match incoming {
                        Ok((identity, Ok(request))) => {
                            self.handle_slave(identity, request).await;
                        }
                        Ok((identity, Err(err))) => {
                            self.evict_protocol(identity, &err).await;
                        }
                        Err(_) => break,
                    }
                }
                _ = sweep.tick() => self.sweep_expired(),
            }
        }
        info!(task = TASK, "stopped");
    }

    /// The driver is pauseable in effect rather than by parking: a
    /// paused master answers every IDLE with SLEEP so builders stay
    /// heartbeating without receiving work.
    async fn handle_control(&mut self, msg: ControlMsg) -> TaskControl {
        match msg {
            ControlMsg::Quit => return TaskControl::Quit,
            ControlMsg::Pause => {
                info!(task = TASK, "paused; builders will sleep");
                self.paused = true;
            }
            ControlMsg::Resume => {
                info!(task = TASK, "resumed");
                self.paused = false;
            }
            ControlMsg::Kill(slave_id) => {
                warn!(task = TASK, slave_id, "will kill at next interaction");
                self.with_slave(slave_id, SlaveState::kill);
            }
            ControlMsg::Skip(slave_id) => self.with_slave(slave_id, SlaveState::skip),
            ControlMsg::Sleep(slave_id) => self.with_slave(slave_id, SlaveState::sleep),
            ControlMsg::Wake(slave_id) => self.with_slave(slave_id, SlaveState::wake),
            ControlMsg::Hello | ControlMsg::List => self.replay_all().await,
        }
        TaskControl::Continue
    }

    fn with_slave(&mut self, slave_id: u64, apply: impl FnOnce(&mut SlaveState)) {
        match self
            .slaves
            .values_mut()
            .find(|slave| slave.slave_id() == slave_id)
        {
            Some(slave) => apply(slave),
            None => warn!(task = TASK, slave_id, "no such builder"),
        }
    }

    /// Replay every builder's HELLO, stats history and last reply onto
    /// the status fan-out for a freshly attached monitor.
    async fn replay_all(&mut self) {
        for slave in self.slaves.values() {
            for event in slave.replay() {
                if self.status.send(&StatusEvent::Slave(event)).await.is_err() {
                    return;
                }
            }
        }
    }

    fn sweep_expired(&mut self) {
        let now = Utc::now();
        let expired: Vec<Identity> = self
            .slaves
            .values()
            .filter(|slave| slave.expired(now))
            .map(SlaveState::identity)
            .collect();
        for identity in expired {
            if let Some(slave) = self.slaves.remove(&identity) {
                warn!(
                    task = TASK,
                    slave_id = slave.slave_id(),
                    label = slave.label(),
                    "heartbeat timeout; evicting"
                );
                // Any in-flight build simply becomes eligible again at
                // the next planner rebuild.
            }
        }
    }

    async fn evict_protocol(&mut self, identity: Identity, err: &WireError) {
        let slave_id = self.slaves.get(&identity).map(SlaveState::slave_id);
        error!(task = TASK, %identity, ?slave_id, %err, "protocol violation; evicting");
        self.send_reply(identity, SlaveReply::Die).await;
    }

    async fn handle_slave(&mut self, identity: Identity, request: SlaveRequest) {
        debug!(task = TASK, %identity, verb = request.verb(), "rx");
        if !self.slaves.contains_key(&identity) {
            self.handle_new_connection(identity, request).await;
            return;
        }

        // Record the request (liveness, stats ring) and fan out its
        // status event before dispatching.
        if let Some(slave) = self.slaves.get_mut(&identity) {
            if let Some(event) = slave.record_request(&request) {
                let _ = self.status.send(&StatusEvent::Slave(event)).await;
            }
            if slave.killed() {
                warn!(task = TASK, slave_id = slave.slave_id(), "killed; sending DIE");
                self.send_reply(identity, SlaveReply::Die).await;
                return;
            }
        }

        let reply = match request {
            SlaveRequest::Hello(_) => {
                warn!(task = TASK, %identity, "HELLO from an already-known builder");
                Some(SlaveReply::Die)
            }
            SlaveRequest::Idle(_) => self.do_idle(identity).await,
            SlaveRequest::Busy(_) => self.do_busy(identity),
            SlaveRequest::Built(report) => self.do_built(identity, report).await,
            SlaveRequest::Sent => self.do_sent(identity).await,
            SlaveRequest::Bye => {
                if let Some(slave) = self.slaves.remove(&identity) {
                    warn!(task = TASK, slave_id = slave.slave_id(), "builder shut down");
                }
                None
            }
        };
        if let Some(reply) = reply {
            self.send_reply(identity, reply).await;
        }
    }

    async fn handle_new_connection(&mut self, identity: Identity, request: SlaveRequest) {
        let SlaveRequest::Hello(info) = request else {
            warn!(
                task = TASK,
                %identity,
                verb = request.verb(),
                "first message was not HELLO; dropping"
            );
            let _ = self.router.send(identity, &SlaveReply::Die).await;
            return;
        };
        self.next_slave_id += 1;
        let slave_id = self.next_slave_id;
        warn!(
            task = TASK,
            slave_id,
            label = %info.label,
            abi = %info.native_abi,
            platform = %info.native_platform,
            "builder connected"
        );
        let mut slave = SlaveState::new(identity, slave_id, info.clone());
        slave.record_request(&SlaveRequest::Hello(info));
        // Announce the new builder before its first reply so monitors
        // see HELLO then ACK in order.
        for event in slave.replay() {
            let _ = self.status.send(&StatusEvent::Slave(event)).await;
        }
        self.slaves.insert(identity, slave);
        self.send_reply(
            identity,
            SlaveReply::Ack {
                slave_id,
                pypi_url: self.pypi_simple.clone(),
            },
        )
        .await;
    }

    /// IDLE: hand out the next build for the builder's native ABI, or
    /// SLEEP. Valid only between build cycles.
    async fn do_idle(&mut self, identity: Identity) -> Option<SlaveReply> {
        let Some(slave) = self.slaves.get(&identity) else {
            return None;
        };
        match slave.last_reply() {
            Some(SlaveReply::Ack { .. } | SlaveReply::Sleep | SlaveReply::Done) => {}
            other => {
                error!(
                    task = TASK,
                    slave_id = slave.slave_id(),
                    ?other,
                    "protocol error: IDLE out of sequence"
                );
                return Some(SlaveReply::Die);
            }
        }
        if self.paused || slave.paused() || slave.skipped() {
            debug!(task = TASK, slave_id = slave.slave_id(), "sleeping (paused)");
            return Some(SlaveReply::Sleep);
        }
        let abi = slave.native_abi().to_owned();
        let slave_id = slave.slave_id();
        let job = match self
            .planner
            .request(&PlannerRequest { abi: abi.clone() })
            .await
        {
            Ok(PlannerReply::Job { package, version }) => Some((package, version)),
            Ok(PlannerReply::Empty) => None,
            Err(err) => {
                // Fail open: a planner hiccup must never wedge a
                // builder.
                warn!(task = TASK, %err, "planner unavailable");
                None
            }
        };
        match job {
            Some((package, version)) => {
                // Tie-break: a job already in flight on a live builder
                // is not dispatched twice; this entry is dropped and
                // re-derived at the next queue rebuild if it still
                // needs building.
                if self.active_builds().contains(&(package.clone(), version.clone())) {
                    debug!(task = TASK, slave_id, package, version, "already in flight");
                    Some(SlaveReply::Sleep)
                } else {
                    info!(task = TASK, slave_id, package, version, "dispatching build");
                    Some(SlaveReply::Build { package, version })
                }
            }
            None => {
                debug!(task = TASK, slave_id, abi, "nothing to build");
                Some(SlaveReply::Sleep)
            }
        }
    }

    /// BUSY: a heartbeat while building. The stats were already folded
    /// in by `record_request`; answer with an empty keepalive.
    fn do_busy(&mut self, identity: Identity) -> Option<SlaveReply> {
        let slave = self.slaves.get(&identity)?;
        match slave.last_reply() {
            Some(SlaveReply::Build { .. }) => Some(SlaveReply::Cont),
            other => {
                error!(
                    task = TASK,
                    slave_id = slave.slave_id(),
                    ?other,
                    "protocol error: BUSY while not building"
                );
                Some(SlaveReply::Die)
            }
        }
    }

    /// BUILT: log the build (success or failure), then either start the
    /// artifact transfers or conclude the cycle.
    async fn do_built(&mut self, identity: Identity, report: BuiltReport) -> Option<SlaveReply> {
        let slave = self.slaves.get(&identity)?;
        let slave_id = slave.slave_id();
        let Some(SlaveReply::Build { package, version }) = slave.last_reply().cloned() else {
            error!(
                task = TASK,
                slave_id,
                "protocol error: BUILT without a BUILD in flight"
            );
            return Some(SlaveReply::Die);
        };
        if !report.status && !report.files.is_empty() {
            error!(
                task = TASK,
                slave_id, "protocol error: failed build carrying artifacts"
            );
            return Some(SlaveReply::Die);
        }
        for file in &report.files {
            // Wheel tags escape separators to underscores, so compare
            // under a common normal form.
            if !tag_matches_package(&file.package_tag, &package) {
                warn!(
                    task = TASK,
                    slave_id,
                    filename = %file.filename,
                    package,
                    "artifact package tag does not match the dispatched build"
                );
            }
        }
        let abi = slave.native_abi().to_owned();
        let mut build = BuildRecord::new(
            slave_id,
            package.clone(),
            version.clone(),
            abi,
            report.status,
            report.duration,
            report.output,
            report.files,
        );
        // Synthesize the armv6 catalog twins before logging so catalog
        // consumers see both rows from the start.
        build.alias_armv7_to_armv6();
        match self.catalog.log_build(&build).await {
            Ok(build_id) => build.logged(build_id),
            Err(err) => {
                error!(task = TASK, slave_id, package, version, %err, "cannot log build");
                return Some(SlaveReply::Done);
            }
        }
        if !build.status {
            info!(task = TASK, slave_id, package, version, "build failed");
            // Failed builds refresh the project page only.
            let _ = self.web.send(&IndexMsg::Project(package)).await;
            return Some(SlaveReply::Done);
        }
        let Some(next) = build.next_file().map(str::to_owned) else {
            // Guard retained from the original protocol: a successful
            // build whose transfers are already complete cannot occur,
            // because armv6 twins never arrive pre-transferred without
            // an armv7 original alongside. Dead in practice.
            let _ = self.web.send(&IndexMsg::Both(package)).await;
            return Some(SlaveReply::Done);
        };
        info!(task = TASK, slave_id, package, version, filename = %next, "expecting upload");
        match self.expect_file(slave_id, &build, &next).await {
            Ok(()) => {
                if let Some(slave) = self.slaves.get_mut(&identity) {
                    slave.set_build(build);
                }
                Some(SlaveReply::Send { filename: next })
            }
            Err(err) => {
                error!(task = TASK, slave_id, %err, "receiver rejected EXPECT");
                Some(SlaveReply::Done)
            }
        }
    }

    /// SENT: verify the transfer; on success move to the next file or
    /// conclude, on failure re-stage and re-SEND, bounded.
    async fn do_sent(&mut self, identity: Identity) -> Option<SlaveReply> {
        let slave = self.slaves.get(&identity)?;
        let slave_id = slave.slave_id();
        let Some(SlaveReply::Send { filename }) = slave.last_reply().cloned() else {
            error!(
                task = TASK,
                slave_id,
                "protocol error: SENT without a SEND in flight"
            );
            return Some(SlaveReply::Die);
        };
        let Some(build) = slave.build() else {
            error!(task = TASK, slave_id, "protocol error: SENT with no build");
            return Some(SlaveReply::Die);
        };
        let package = build.package.clone();
        let verified = match self
            .fs
            .request(&FsRequest::Verify {
                slave_id,
                package: package.clone(),
            })
            .await
        {
            Ok(FsReply::Done) => true,
            Ok(FsReply::Error(reason)) => {
                warn!(task = TASK, slave_id, filename, reason, "transfer failed verification");
                false
            }
            Ok(FsReply::Stats(_)) | Err(_) => {
                error!(task = TASK, slave_id, "receiver unavailable for VERIFY");
                false
            }
        };

        if verified {
            let slave = self.slaves.get_mut(&identity)?;
            slave.note_transfer_success();
            if let Some(file) = slave
                .build_mut()
                .and_then(|build| build.files.get_mut(&filename))
            {
                file.mark_transferred();
            }
            info!(task = TASK, slave_id, filename, "verified transfer");
            let next = slave.build().and_then(|b| b.next_file().map(str::to_owned));
            match next {
                None => {
                    // Build cycle complete: project and root indexes.
                    let _ = self.web.send(&IndexMsg::Both(package)).await;
                    Some(SlaveReply::Done)
                }
                Some(next) => {
                    let build = self.slaves.get(&identity)?.build()?.clone();
                    match self.expect_file(slave_id, &build, &next).await {
                        Ok(()) => Some(SlaveReply::Send { filename: next }),
                        Err(err) => {
                            error!(task = TASK, slave_id, %err, "receiver rejected EXPECT");
                            Some(SlaveReply::Done)
                        }
                    }
                }
            }
        } else {
            let slave = self.slaves.get_mut(&identity)?;
            let retries = slave.note_transfer_failure();
            if retries >= MAX_TRANSFER_RETRIES {
                // The build stands logged; whatever was committed is
                // committed, the rest is abandoned and the builder is
                // not penalized.
                error!(
                    task = TASK,
                    slave_id,
                    filename,
                    retries,
                    "giving up on transfer; concluding build with missing artifacts"
                );
                let _ = self.web.send(&IndexMsg::Project(package)).await;
                return Some(SlaveReply::Done);
            }
            let build = self.slaves.get(&identity)?.build()?.clone();
            match self.expect_file(slave_id, &build, &filename).await {
                Ok(()) => Some(SlaveReply::Send { filename }),
                Err(err) => {
                    error!(task = TASK, slave_id, %err, "receiver rejected re-EXPECT");
                    Some(SlaveReply::Done)
                }
            }
        }
    }

    /// Stage the named file with the receiver.
    async fn expect_file(
        &mut self,
        slave_id: u64,
        build: &BuildRecord,
        filename: &str,
    ) -> anyhow::Result<()> {
        let file = build
            .files
            .get(filename)
            .ok_or_else(|| anyhow::anyhow!("no artifact named {filename:?}"))?
            .clone();
        match self.fs.request(&FsRequest::Expect { slave_id, file }).await {
            Ok(FsReply::Done) => Ok(()),
            Ok(FsReply::Error(reason)) => Err(anyhow::anyhow!(reason)),
            Ok(FsReply::Stats(_)) => Err(anyhow::anyhow!("unexpected STATS reply")),
            Err(err) => Err(err.into()),
        }
    }

    /// Builds currently in flight on non-expired builders.
    fn active_builds(&self) -> HashSet<(String, String)> {
        let now = Utc::now();
        self.slaves
            .values()
            .filter(|slave| !slave.expired(now))
            .filter_map(|slave| match slave.last_reply() {
                Some(SlaveReply::Build { package, version }) => {
                    Some((package.clone(), version.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Record the reply on the builder's state, fan out its status
    /// event, and put it on the wire. DIE always evicts.
    async fn send_reply(&mut self, identity: Identity, reply: SlaveReply) {
        if let Some(slave) = self.slaves.get_mut(&identity)
            && let Some(event) = slave.record_reply(&reply)
        {
            let _ = self.status.send(&StatusEvent::Slave(event)).await;
        }
        debug!(task = TASK, %identity, verb = reply.verb(), "tx");
        if let Err(err) = self.router.send(identity, &reply).await {
            warn!(task = TASK, %identity, %err, "builder unreachable; evicting");
            self.slaves.remove(&identity);
            return;
        }
        if matches!(reply, SlaveReply::Die) {
            self.slaves.remove(&identity);
        }
    }
}
