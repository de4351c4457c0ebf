//! The stats aggregator.
//!
//! Every tick it folds catalog statistics, the local system probes and
//! the gauges other tasks push (receiver disk samples, planner queue
//! depths) into one [`MasterStats`] record, handing it to the publisher
//! for the landing page and to the status fan-out for monitors.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use wheelhouse_catalog::{CatalogClient, CatalogStats};
use wheelhouse_protocol::{ControlMsg, IndexMsg, StatsMsg, StatusEvent};
use wheelhouse_transport::{Context, PullSocket, PushSocket, SubSocket, TransportError};
use wheelhouse_types::{DiskStats, MasterStats};

use crate::config::{INT_CONTROL_QUEUE, INT_STATUS_QUEUE, MasterConfig};
use crate::info as sysinfo;
use crate::tasks::{TaskControl, control_or_quit, pauseable_control};

const TASK: &str = "master::big_brother";

/// Sampling cadence.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

pub struct BigBrother {
    ingress: PullSocket<StatsMsg>,
    web: PushSocket<IndexMsg>,
    status: PushSocket<StatusEvent>,
    control: SubSocket<ControlMsg>,
    catalog: CatalogClient,
    output_path: PathBuf,
    /// Last disk sample pushed by the receiver; fresher than probing
    /// because it follows each commit.
    disk: Option<DiskStats>,
    depths: BTreeMap<String, u64>,
}

impl BigBrother {
    pub async fn new(
        ctx: &Context,
        config: &MasterConfig,
        catalog: CatalogClient,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            ingress: ctx.pull(&config.stats_queue, 16).await?,
            web: ctx.push(&config.web_queue).await?,
            status: ctx.push(INT_STATUS_QUEUE).await?,
            control: ctx.subscribe(INT_CONTROL_QUEUE).await?,
            catalog,
            output_path: config.output_path.clone(),
            disk: None,
            depths: BTreeMap::new(),
        })
    }

    pub async fn run(mut self) {
        info!(task = TASK, "starting");
        let mut tick = tokio::time::interval(SAMPLE_INTERVAL);
        loop {
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
                msg = self.ingress.recv() => {
                    match msg {
                        Ok(StatsMsg::StatFs(disk)) => self.disk = Some(disk),
                        Ok(StatsMsg::BuildQueue(depths)) => {
                            self.depths = depths;
                            let _ = self
                                .status
                                .send(&StatusEvent::BuildQueue(self.depths.clone()))
                                .await;
                        }
                        Err(TransportError::Schema(err)) => {
                            warn!(task = TASK, %err, "ignoring malformed stats message");
                        }
                        Err(_) => break,
                    }
                }
                _ = tick.tick() => {
                    if let Some(stats) = self.sample().await {
                        let _ = self.web.send(&IndexMsg::Home(stats.clone())).await;
                        let _ = self.status.send(&StatusEvent::Stats(stats.clone())).await;
                        let _ = self.status.send(&StatusEvent::Home(stats)).await;
                    }
                }
            }
        }
        info!(task = TASK, "stopped");
    }

    async fn sample(&mut self) -> Option<MasterStats> {
        let catalog_stats = match self.catalog.statistics().await {
            Ok(stats) => stats,
            Err(err) => {
                warn!(task = TASK, %err, "catalog statistics unavailable; skipping sample");
                return None;
            }
        };
        let disk = match self.disk {
            Some(disk) => disk,
            None => sysinfo::statvfs(&self.output_path).unwrap_or_default(),
        };
        Some(assemble_stats(catalog_stats, disk, self.depths.clone()))
    }
}

/// Fold the catalog aggregates and local gauges into one sample. Also
/// used by the admin ingress for forced landing-page rebuilds.
pub(crate) fn assemble_stats(
    catalog: CatalogStats,
    disk: DiskStats,
    depths: BTreeMap<String, u64>,
) -> MasterStats {
    let (mem_size, mem_free, swap_size, swap_free) = sysinfo::memory();
    MasterStats {
        timestamp: Utc::now(),
        packages_built: catalog.packages_built,
        builds_last_hour: catalog.builds_last_hour,
        builds_time: catalog.builds_time,
        builds_size: catalog.builds_size,
        builds_pending: depths,
        new_last_hour: catalog.new_last_hour,
        files_count: catalog.files_count,
        downloads_last_hour: None,
        downloads_last_month: None,
        downloads_all: None,
        disk_size: disk.size,
        disk_free: disk.free,
        mem_size,
        mem_free,
        swap_size,
        swap_free,
        load_average: sysinfo::load_average(),
        cpu_temp: sysinfo::cpu_temp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_folds_catalog_and_gauges() {
        let stats = assemble_stats(
            CatalogStats {
                packages_built: 3,
                builds_last_hour: 1,
                builds_time: Duration::from_secs(60),
                builds_size: 1024,
                new_last_hour: 2,
                files_count: 5,
            },
            DiskStats {
                size: 1000,
                free: 400,
            },
            BTreeMap::from([("cp34m".to_owned(), 7)]),
        );
        assert_eq!(stats.packages_built, 3);
        assert_eq!(stats.disk_free, 400);
        assert_eq!(stats.total_pending(), 7);
        assert!(stats.downloads_all.is_none());
    }
}
