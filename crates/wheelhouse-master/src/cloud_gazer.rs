//! The upstream watcher.
//!
//! Long-polls the upstream index for change events and feeds new
//! packages and versions into the catalog, advancing a serial cursor
//! after every successful poll. Transport faults and upstream 5xx are
//! retried forever with capped backoff; a 4xx means the request itself
//! is broken, which no amount of retrying can mend, so the watcher
//! surfaces it by raising QUIT on the control plane and the master
//! shuts down in order.

use std::time::Duration;

use tracing::{debug, error, info, warn};
use wheelhouse_catalog::CatalogClient;
use wheelhouse_protocol::ControlMsg;
use wheelhouse_retry::{BackoffConfig, delay_for};
use wheelhouse_transport::{Context, PushSocket, SubSocket};

use crate::config::{INT_CONTROL_QUEUE, INT_QUIT_QUEUE, MasterConfig};
use crate::pypi::{UpstreamClient, UpstreamEvent};
use crate::tasks::{TaskControl, control_or_quit, pauseable_control};

const TASK: &str = "master::cloud_gazer";

/// Seconds between polls when the upstream is healthy.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct CloudGazer {
    upstream: UpstreamClient,
    catalog: CatalogClient,
    control: SubSocket<ControlMsg>,
    quit: PushSocket<ControlMsg>,
    backoff: BackoffConfig,
    serial: u64,
}

impl CloudGazer {
    pub async fn new(
        ctx: &Context,
        config: &MasterConfig,
        catalog: CatalogClient,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            upstream: UpstreamClient::new(config.pypi_xmlrpc.clone()),
            catalog,
            control: ctx.subscribe(INT_CONTROL_QUEUE).await?,
            quit: ctx.push(INT_QUIT_QUEUE).await?,
            backoff: BackoffConfig::upstream(),
            serial: 0,
        })
    }

    pub async fn run(mut self) {
        info!(task = TASK, "starting");
        match self.catalog.upstream_serial().await {
            Ok(serial) => self.serial = serial,
            Err(err) => {
                error!(task = TASK, %err, "cannot restore upstream serial");
                let _ = self.quit.send(&ControlMsg::Quit).await;
                return;
            }
        }
        info!(task = TASK, serial = self.serial, "watching upstream");
        let mut attempt: u32 = 0;
        loop {
            let delay = if attempt == 0 {
                POLL_INTERVAL
            } else {
                delay_for(&self.backoff, attempt)
            };
            tokio::select! {
                result = self.control.recv() => {
                    let msg = match control_or_quit(TASK, result) {
                        Ok(msg) => msg,
                        Err(TaskControl::Continue) => continue,
                        Err(TaskControl::Quit) => break,
                    };
                    if pauseable_control(TASK, msg, &mut self.control).await == TaskControl::Quit {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {
                    attempt = match self.poll_once().await {
                        PollOutcome::Ok => 0,
                        PollOutcome::Retry => attempt.saturating_add(1),
                        PollOutcome::Halt => {
                            let _ = self.quit.send(&ControlMsg::Quit).await;
                            break;
                        }
                    };
                }
            }
        }
        // Clean shutdown persists the cursor.
        if let Err(err) = self.catalog.set_upstream_serial(self.serial).await {
            warn!(task = TASK, %err, "could not persist upstream serial");
        }
        info!(task = TASK, "stopped");
    }

    async fn poll_once(&mut self) -> PollOutcome {
        let log = match self.upstream.changelog_since(self.serial).await {
            Ok(log) => log,
            Err(err) if err.is_fatal() => {
                error!(task = TASK, %err, "upstream rejected the changelog request; raising QUIT");
                return PollOutcome::Halt;
            }
            Err(err) => {
                warn!(task = TASK, %err, "upstream poll failed; backing off");
                return PollOutcome::Retry;
            }
        };
        for event in &log.events {
            let registered = match event {
                UpstreamEvent::NewPackage(package) => {
                    self.catalog.add_new_package(package).await
                }
                UpstreamEvent::NewVersion(package, version) => {
                    self.catalog.add_new_package_version(package, version).await
                }
            };
            match registered {
                Ok(true) => debug!(task = TASK, ?event, "registered"),
                Ok(false) => debug!(task = TASK, ?event, "already known"),
                Err(err) => {
                    warn!(task = TASK, ?event, %err, "catalog rejected upstream event");
                }
            }
        }
        if log.last_serial != self.serial {
            self.serial = log.last_serial;
            if let Err(err) = self.catalog.set_upstream_serial(self.serial).await {
                warn!(task = TASK, %err, "could not advance upstream serial");
            }
        }
        PollOutcome::Ok
    }
}

enum PollOutcome {
    /// The poll succeeded; back to the regular cadence.
    Ok,
    /// Transient failure; back off and try again.
    Retry,
    /// The request itself is broken; raise QUIT and stop watching.
    Halt,
}
