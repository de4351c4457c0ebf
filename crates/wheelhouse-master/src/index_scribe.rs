//! The publisher.
//!
//! Consumes index messages and rewrites the repository's HTML: package
//! indexes, the root index (only when the known-package set changes),
//! and the landing page. Hashes always come from the catalog. A
//! filesystem failure pauses the task until an operator RESUME, so a
//! sick disk cannot shred the repository one rename at a time.

use std::collections::HashSet;

use tracing::{error, info, warn};
use wheelhouse_catalog::CatalogClient;
use wheelhouse_index::{IndexEntry, IndexWriter};
use wheelhouse_protocol::{ControlMsg, IndexMsg};
use wheelhouse_transport::{Context, PullSocket, SubSocket, TransportError};

use crate::config::{INT_CONTROL_QUEUE, MasterConfig};
use crate::tasks::{TaskControl, control_or_quit, pauseable_control, wait_for_resume};

const TASK: &str = "master::index_scribe";

pub struct IndexScribe {
    web: PullSocket<IndexMsg>,
    control: SubSocket<ControlMsg>,
    catalog: CatalogClient,
    writer: IndexWriter,
    /// Known packages in insertion order, mirrored from the catalog.
    packages: Vec<String>,
    known: HashSet<String>,
}

impl IndexScribe {
    pub async fn new(
        ctx: &Context,
        config: &MasterConfig,
        catalog: CatalogClient,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            web: ctx.pull(&config.web_queue, 100).await?,
            control: ctx.subscribe(INT_CONTROL_QUEUE).await?,
            catalog,
            writer: IndexWriter::new(&config.output_path)?,
            packages: Vec::new(),
            known: HashSet::new(),
        })
    }

    pub async fn run(mut self) {
        info!(task = TASK, "starting");
        match self.catalog.all_packages().await {
            Ok(packages) => {
                self.known = packages.iter().cloned().collect();
                self.packages = packages;
                // Bootstrap the root index so a fresh repository serves
                // the catalog's package set before the first build.
                if let Err(err) = self.writer.write_root_index(&self.packages) {
                    warn!(task = TASK, %err, "cannot write initial root index");
                }
            }
            Err(err) => {
                warn!(task = TASK, %err, "cannot prime package cache; starting empty");
            }
        }
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
                msg = self.web.recv() => {
                    let msg = match msg {
                        Ok(msg) => msg,
                        Err(TransportError::Schema(err)) => {
                            warn!(task = TASK, %err, "ignoring malformed index message");
                            continue;
                        }
                        Err(_) => break,
                    };
                    if let Err(err) = self.handle_index(msg).await {
                        // Filesystem trouble: surface it and freeze all
                        // publication until the operator resumes.
                        error!(task = TASK, %err, "publication failed; pausing until RESUME");
                        if wait_for_resume(TASK, &mut self.control).await == TaskControl::Quit {
                            break;
                        }
                    }
                }
            }
        }
        info!(task = TASK, "stopped");
    }

    async fn handle_index(&mut self, msg: IndexMsg) -> anyhow::Result<()> {
        match msg {
            IndexMsg::Project(package) => self.write_package(&package).await,
            IndexMsg::Both(package) => {
                if !self.known.contains(&package) {
                    self.known.insert(package.clone());
                    self.packages.push(package.clone());
                    info!(task = TASK, package, "new package; rebuilding root index");
                    self.writer.write_root_index(&self.packages)?;
                }
                self.write_package(&package).await
            }
            IndexMsg::DeletePackage(package) => {
                info!(task = TASK, package, "removing package");
                self.writer.delete_package(&package)?;
                if self.known.remove(&package) {
                    self.packages.retain(|known| known != &package);
                    self.writer.write_root_index(&self.packages)?;
                }
                Ok(())
            }
            IndexMsg::DeleteVersion(package, version) => {
                info!(task = TASK, package, version, "rewriting index after version removal");
                self.write_package(&package).await
            }
            IndexMsg::Search => {
                info!(task = TASK, "forced root index rebuild");
                self.writer.write_root_index(&self.packages)?;
                Ok(())
            }
            IndexMsg::Home(stats) => {
                self.writer.write_homepage(&stats)?;
                Ok(())
            }
        }
    }

    async fn write_package(&mut self, package: &str) -> anyhow::Result<()> {
        let files = match self.catalog.package_files(package).await {
            Ok(files) => files,
            Err(err) => {
                // Catalog trouble is not filesystem trouble: log it and
                // carry on, the next index message will retry.
                warn!(task = TASK, package, %err, "cannot read package files");
                return Ok(());
            }
        };
        let entries: Vec<IndexEntry> = files
            .into_iter()
            .map(|row| IndexEntry {
                filename: row.filename,
                filehash: row.filehash,
            })
            .collect();
        info!(task = TASK, package, files = entries.len(), "writing package index");
        self.writer.write_package_index(package, &entries)
    }
}
