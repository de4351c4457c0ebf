//! The build-queue planner.
//!
//! Answers the slave driver's `next(abi)` turns from an in-memory
//! per-ABI queue. An empty or missing queue answers "nothing this time
//! round" immediately and then rebuilds from the catalog, so a builder
//! is never kept waiting on a catalog query. Skip notifications from
//! the admin ingress prune queued entries that the catalog has already
//! disowned.

use std::collections::{BTreeMap, HashMap, VecDeque};

use tracing::{debug, info, warn};
use wheelhouse_catalog::CatalogClient;
use wheelhouse_protocol::{ControlMsg, PlannerReply, PlannerRequest, SkipMsg, StatsMsg};
use wheelhouse_transport::{Context, PushSocket, RepSocket, SubSocket, TransportError};

use crate::config::{INT_CONTROL_QUEUE, MasterConfig};
use crate::tasks::{TaskControl, control_or_quit};

const TASK: &str = "master::the_architect";

pub struct TheArchitect {
    builds: RepSocket<PlannerRequest, PlannerReply>,
    skip: wheelhouse_transport::PullSocket<SkipMsg>,
    stats: PushSocket<StatsMsg>,
    control: SubSocket<ControlMsg>,
    catalog: CatalogClient,
    queues: HashMap<String, VecDeque<(String, String)>>,
}

impl TheArchitect {
    pub async fn new(
        ctx: &Context,
        config: &MasterConfig,
        catalog: CatalogClient,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            builds: ctx.rep(&config.builds_queue, 1).await?,
            skip: ctx.pull(&config.skip_queue, 16).await?,
            stats: ctx.push(&config.stats_queue).await?,
            control: ctx.subscribe(INT_CONTROL_QUEUE).await?,
            catalog,
            queues: HashMap::new(),
        })
    }

    pub async fn run(mut self) {
        info!(task = TASK, "starting");
        loop {
            tokio::select! {
                result = self.control.recv() => {
                    // Not pauseable: the driver's next(abi) turns must be
                    // answered even while the master is paused, or a
                    // builder's IDLE would wedge mid-request.
                    match control_or_quit(TASK, result) {
                        Ok(ControlMsg::Quit) | Err(TaskControl::Quit) => break,
                        Ok(_) | Err(TaskControl::Continue) => continue,
                    }
                }
                request = self.builds.recv() => {
                    match request {
                        Ok(request) => {
                            if self.handle_build(request).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                skip = self.skip.recv() => {
                    match skip {
                        Ok(msg) => self.handle_skip(msg),
                        Err(TransportError::Schema(err)) => {
                            warn!(task = TASK, %err, "ignoring malformed skip message");
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        info!(task = TASK, "stopped");
    }

    /// Answer one `next(abi)` turn. The REP discipline means even a
    /// malformed request must be answered before the next receive.
    async fn handle_build(
        &mut self,
        request: Result<PlannerRequest, wheelhouse_transport::WireError>,
    ) -> Result<(), TransportError> {
        let abi = match request {
            Ok(request) => request.abi,
            Err(err) => {
                warn!(task = TASK, %err, "malformed build request");
                return self.builds.send(&PlannerReply::Empty).await;
            }
        };
        match self.queues.get_mut(&abi).and_then(VecDeque::pop_front) {
            Some((package, version)) => {
                debug!(task = TASK, abi, package, version, "handing out build");
                self.builds.send(&PlannerReply::Job { package, version }).await
            }
            None => {
                // Fail open: the driver gets its answer now, the queue
                // is rebuilt for next time.
                self.builds.send(&PlannerReply::Empty).await?;
                self.rebuild_queue(&abi).await;
                Ok(())
            }
        }
    }

    async fn rebuild_queue(&mut self, abi: &str) {
        match self.catalog.build_queue(abi).await {
            Ok(pending) => {
                debug!(task = TASK, abi, depth = pending.len(), "rebuilt queue");
                self.queues.insert(abi.to_owned(), pending.into());
                self.report_depths().await;
            }
            Err(err) => {
                warn!(task = TASK, abi, %err, "cannot rebuild build queue");
            }
        }
    }

    /// Drop queued entries the admin ingress has skipped or removed.
    fn handle_skip(&mut self, msg: SkipMsg) {
        for queue in self.queues.values_mut() {
            queue.retain(|(package, version)| {
                package != &msg.package
                    || msg.version.as_ref().is_some_and(|skipped| version != skipped)
            });
        }
    }

    async fn report_depths(&mut self) {
        let depths: BTreeMap<String, u64> = self
            .queues
            .iter()
            .map(|(abi, queue)| (abi.clone(), queue.len() as u64))
            .collect();
        if let Err(err) = self.stats.send(&StatsMsg::BuildQueue(depths)).await {
            warn!(task = TASK, %err, "cannot report queue depths");
        }
    }
}
