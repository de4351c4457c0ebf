//! The wheelhouse build-farm master.
//!
//! A set of cooperating long-lived tasks communicating exclusively over
//! named queues: the upstream watcher feeds the catalog, the planner
//! derives pending builds per ABI, the slave driver runs the builder
//! protocol, the receiver moves artifacts over a credit-based chunk
//! stream, the publisher rewrites the repository indexes atomically,
//! the stats aggregator samples the whole thing, the control plane
//! bridges operators in, and the admin ingress handles one-shot
//! imports and maintenance.
//!
//! Tasks never share mutable state; everything crosses task boundaries
//! as messages. [`Master::start`] spawns them in dependency order and
//! [`Master::join`] waits out the orderly reverse-order shutdown a QUIT
//! triggers.

pub mod config;
pub mod states;

mod big_brother;
mod cloud_gazer;
mod file_juggler;
mod high_priest;
mod index_scribe;
mod info;
mod mr_chase;
mod pypi;
mod slave_driver;
mod tasks;
mod the_architect;

use std::net::SocketAddr;

use anyhow::{Context as _, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use wheelhouse_catalog::CatalogClient;
use wheelhouse_protocol::ControlMsg;
use wheelhouse_transport::Context;

use crate::big_brother::BigBrother;
use crate::cloud_gazer::CloudGazer;
use crate::config::{INT_QUIT_QUEUE, MasterConfig};
use crate::file_juggler::FileJuggler;
use crate::high_priest::HighPriest;
use crate::index_scribe::IndexScribe;
use crate::mr_chase::MrChase;
use crate::slave_driver::SlaveDriver;
use crate::the_architect::TheArchitect;

/// The running master: its tasks and the addresses they bound.
pub struct Master {
    ctx: Context,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    /// Builder protocol endpoint.
    pub slave_addr: SocketAddr,
    /// File transfer endpoint.
    pub file_addr: SocketAddr,
    /// Admin ingress endpoint.
    pub import_addr: SocketAddr,
    /// External control endpoint, if TCP.
    pub control_addr: Option<SocketAddr>,
    /// External status endpoint, if TCP.
    pub status_addr: Option<SocketAddr>,
}

impl Master {
    /// Bind every queue and spawn every task, in dependency order so
    /// each inproc endpoint exists before anything connects to it.
    pub async fn start(config: MasterConfig, catalog: CatalogClient) -> Result<Self> {
        let ctx = Context::new();

        let priest = HighPriest::new(&ctx, &config)
            .await
            .context("starting control plane")?;
        let control_addr = priest.control_addr();
        let status_addr = priest.status_addr();

        let scribe = IndexScribe::new(&ctx, &config, catalog.clone())
            .await
            .context("starting publisher")?;
        let brother = BigBrother::new(&ctx, &config, catalog.clone())
            .await
            .context("starting stats aggregator")?;
        let architect = TheArchitect::new(&ctx, &config, catalog.clone())
            .await
            .context("starting planner")?;
        let juggler = FileJuggler::new(&ctx, &config)
            .await
            .context("starting artifact receiver")?;
        let file_addr = juggler.local_addr();
        let gazer = CloudGazer::new(&ctx, &config, catalog.clone())
            .await
            .context("starting upstream watcher")?;
        let driver = SlaveDriver::new(&ctx, &config, catalog.clone())
            .await
            .context("starting slave driver")?;
        let slave_addr = driver.local_addr();
        let chase = MrChase::new(&ctx, &config, catalog)
            .await
            .context("starting admin ingress")?;
        let import_addr = chase.local_addr();

        let tasks = vec![
            ("high_priest", tokio::spawn(priest.run())),
            ("index_scribe", tokio::spawn(scribe.run())),
            ("big_brother", tokio::spawn(brother.run())),
            ("the_architect", tokio::spawn(architect.run())),
            ("file_juggler", tokio::spawn(juggler.run())),
            ("cloud_gazer", tokio::spawn(gazer.run())),
            ("slave_driver", tokio::spawn(driver.run())),
            ("mr_chase", tokio::spawn(chase.run())),
        ];
        Ok(Self {
            ctx,
            tasks,
            slave_addr,
            file_addr,
            import_addr,
            control_addr,
            status_addr,
        })
    }

    /// Ask the master to shut down as if an operator had sent QUIT.
    pub async fn shutdown(&self) -> Result<()> {
        let mut quit = self.ctx.push::<ControlMsg>(INT_QUIT_QUEUE).await?;
        quit.send(&ControlMsg::Quit).await?;
        Ok(())
    }

    /// Wait for every task to stop, last-started first.
    pub async fn join(mut self) {
        while let Some((name, handle)) = self.tasks.pop() {
            if let Err(err) = handle.await {
                warn!(task = name, %err, "task ended abnormally");
            }
        }
        info!("all tasks stopped");
    }
}

/// Run the master to completion: start the tasks, relay termination
/// signals as QUIT, and wait out the shutdown.
pub async fn run(config: MasterConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "wheelhouse master starting");
    let catalog = wheelhouse_catalog::connect(&config.database)
        .map_err(|err| anyhow::anyhow!("{err}"))
        .context("opening catalog")?;
    let master = Master::start(config, CatalogClient::new(catalog)).await?;

    let ctx = master.ctx.clone();
    tokio::spawn(async move {
        let terminated = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(_) => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("interrupt; shutting down"),
            _ = terminated => warn!("SIGTERM; shutting down"),
        }
        if let Ok(mut quit) = ctx.push::<ControlMsg>(INT_QUIT_QUEUE).await {
            let _ = quit.send(&ControlMsg::Quit).await;
        }
    });

    master.join().await;
    Ok(())
}
