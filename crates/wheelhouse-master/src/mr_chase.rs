//! The admin ingress.
//!
//! One-shot operations from the import and maintenance tooling: smuggle
//! an externally built wheel through the same log/EXPECT/SEND/VERIFY
//! path as a real build, manage catalog entries and their skip/yank
//! flags, delete artifacts, and force publisher passes. Every request
//! is answered with DONE or ERROR.

use std::collections::HashMap;

use tracing::{error, info, warn};
use wheelhouse_catalog::CatalogClient;
use wheelhouse_protocol::{
    ControlMsg, FsReply, FsRequest, ImportBuild, ImportReply, ImportRequest, IndexMsg,
    RebuildTarget, SkipMsg,
};
use wheelhouse_transport::{Context, Identity, PushSocket, ReqSocket, Router, SubSocket};
use wheelhouse_types::{BuildRecord, PLATFORM_ARMV6};

use crate::big_brother::assemble_stats;
use crate::config::{INT_CONTROL_QUEUE, INT_FS_QUEUE, MasterConfig};
use crate::info as sysinfo;
use crate::tasks::{TaskControl, control_or_quit, pauseable_control};

const TASK: &str = "master::mr_chase";

/// Imports are staged with the receiver under this pseudo builder id.
const IMPORT_SLAVE_ID: u64 = 0;

pub struct MrChase {
    router: Router<ImportRequest, ImportReply>,
    fs: ReqSocket<FsRequest, FsReply>,
    web: PushSocket<IndexMsg>,
    skip: PushSocket<SkipMsg>,
    control: SubSocket<ControlMsg>,
    catalog: CatalogClient,
    output_path: std::path::PathBuf,
    /// In-flight imports by requester connection.
    states: HashMap<Identity, BuildRecord>,
}

impl MrChase {
    pub async fn new(
        ctx: &Context,
        config: &MasterConfig,
        catalog: CatalogClient,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            router: ctx.router(&config.import_queue, 16).await?,
            fs: ctx.req(INT_FS_QUEUE).await?,
            web: ctx.push(&config.web_queue).await?,
            skip: ctx.push(&config.skip_queue).await?,
            control: ctx.subscribe(INT_CONTROL_QUEUE).await?,
            catalog,
            output_path: config.output_path.clone(),
            states: HashMap::new(),
        })
    }

    /// The bound admin endpoint (configured port 0 in tests).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.router.local_addr()
    }

    pub async fn run(mut self) {
        info!(task = TASK, "starting");
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
                incoming = self.router.recv() => {
                    match incoming {
                        Ok((identity, Ok(request))) => {
                            let reply = self.handle_request(identity, request).await;
                            let _ = self.router.send(identity, &reply).await;
                        }
                        Ok((identity, Err(err))) => {
                            warn!(task = TASK, %identity, %err, "malformed admin request");
                            let _ = self
                                .router
                                .send(identity, &ImportReply::Error {
                                    reason: err.to_string(),
                                })
                                .await;
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        info!(task = TASK, "stopped");
    }

    async fn handle_request(&mut self, identity: Identity, request: ImportRequest) -> ImportReply {
        let verb = request.verb();
        info!(task = TASK, %identity, verb, "admin request");
        let reply = match request {
            ImportRequest::Import(build) => self.do_import(identity, build).await,
            ImportRequest::Sent => self.do_sent(identity).await,
            ImportRequest::AddPkg { package, skip } => self.do_add_pkg(&package, skip).await,
            ImportRequest::AddVer {
                package,
                version,
                skip,
                yanked,
            } => self.do_add_ver(&package, &version, skip, yanked).await,
            ImportRequest::RemovePkg { package, builds } => {
                self.do_remove_pkg(&package, builds).await
            }
            ImportRequest::RemoveVer {
                package,
                version,
                builds,
            } => self.do_remove_ver(&package, &version, builds).await,
            ImportRequest::Rebuild(target) => self.do_rebuild(target).await,
        };
        match reply {
            Ok(reply) => reply,
            Err(reason) => {
                error!(task = TASK, verb, reason, "admin request failed");
                ImportReply::Error { reason }
            }
        }
    }

    /// Validate and log an imported build, then drive it through the
    /// regular transfer path.
    async fn do_import(
        &mut self,
        identity: Identity,
        import: ImportBuild,
    ) -> Result<ImportReply, String> {
        if !import.status {
            return Err("importing a failed build is not supported".to_owned());
        }
        if import.files.is_empty() {
            return Err("no files listed for import".to_owned());
        }
        if import
            .files
            .iter()
            .any(|file| file.platform_tag == PLATFORM_ARMV6)
        {
            return Err("armv6l wheels are synthesized automatically, never supplied".to_owned());
        }
        let abis = self
            .catalog
            .build_abis()
            .await
            .map_err(|err| err.to_string())?;
        let abi_tag = match import.abi_tag {
            Some(abi) => {
                if !abis.contains(&abi) {
                    return Err(format!("invalid ABI: {abi}"));
                }
                abi
            }
            // Caller left the ABI open: take the smallest supported one.
            None => abis
                .iter()
                .next()
                .cloned()
                .ok_or_else(|| "catalog supports no build ABIs".to_owned())?,
        };
        let known = self
            .catalog
            .version_exists(&import.package, &import.version)
            .await
            .map_err(|err| err.to_string())?;
        if !known {
            return Err(format!(
                "unknown package version {}-{}",
                import.package, import.version
            ));
        }
        let mut build = BuildRecord::new(
            IMPORT_SLAVE_ID,
            import.package,
            import.version,
            abi_tag,
            import.status,
            import.duration,
            import.output,
            import.files,
        );
        build.alias_armv7_to_armv6();
        let build_id = self
            .catalog
            .log_build(&build)
            .await
            .map_err(|err| err.to_string())?;
        build.logged(build_id);
        if build.status && !build.transfers_done() {
            let filename = build
                .next_file()
                .map(str::to_owned)
                .ok_or_else(|| "no transferable files".to_owned())?;
            self.expect_file(&build, &filename).await?;
            info!(task = TASK, filename, "send");
            self.states.insert(identity, build);
            Ok(ImportReply::Send { filename })
        } else {
            // Dead branch: the validation above rejects failed builds
            // and empty file sets, so an import always has transfers
            // outstanding. Kept for the day failed-build imports become
            // a way of recording skips.
            let _ = self.web.send(&IndexMsg::Both(build.package.clone())).await;
            Ok(ImportReply::Done {
                verb: "IMPORT".to_owned(),
            })
        }
    }

    async fn do_sent(&mut self, identity: Identity) -> Result<ImportReply, String> {
        let Some(build) = self.states.get(&identity) else {
            return Err("SENT with no import in progress".to_owned());
        };
        let package = build.package.clone();
        let Some(filename) = build.next_file().map(str::to_owned) else {
            return Err("SENT with no file outstanding".to_owned());
        };
        let verified = match self
            .fs
            .request(&FsRequest::Verify {
                slave_id: IMPORT_SLAVE_ID,
                package: package.clone(),
            })
            .await
        {
            Ok(FsReply::Done) => true,
            Ok(FsReply::Error(reason)) => {
                warn!(task = TASK, filename, reason, "import transfer failed verification");
                false
            }
            Ok(FsReply::Stats(_)) => false,
            Err(err) => return Err(err.to_string()),
        };
        if !verified {
            let build = self.states.get(&identity).cloned();
            if let Some(build) = build {
                self.expect_file(&build, &filename).await?;
            }
            info!(task = TASK, filename, "send (retry)");
            return Ok(ImportReply::Send { filename });
        }
        info!(task = TASK, filename, "verified import transfer");
        let _ = self.web.send(&IndexMsg::Both(package)).await;
        let build = self
            .states
            .get_mut(&identity)
            .ok_or_else(|| "import state vanished".to_owned())?;
        if let Some(file) = build.files.get_mut(&filename) {
            file.mark_transferred();
        }
        match build.next_file().map(str::to_owned) {
            Some(next) => {
                let build = build.clone();
                self.expect_file(&build, &next).await?;
                info!(task = TASK, filename = next, "send");
                Ok(ImportReply::Send { filename: next })
            }
            None => {
                self.states.remove(&identity);
                Ok(ImportReply::Done {
                    verb: "IMPORT".to_owned(),
                })
            }
        }
    }

    async fn do_add_pkg(
        &mut self,
        package: &str,
        skip: Option<String>,
    ) -> Result<ImportReply, String> {
        self.catalog
            .add_new_package(package)
            .await
            .map_err(|err| err.to_string())?;
        self.catalog
            .skip_package(package, skip.as_deref())
            .await
            .map_err(|err| err.to_string())?;
        if skip.is_some() {
            let _ = self
                .skip
                .send(&SkipMsg {
                    package: package.to_owned(),
                    version: None,
                })
                .await;
        }
        Ok(ImportReply::Done {
            verb: "ADDPKG".to_owned(),
        })
    }

    async fn do_add_ver(
        &mut self,
        package: &str,
        version: &str,
        skip: Option<String>,
        yanked: bool,
    ) -> Result<ImportReply, String> {
        self.catalog
            .add_new_package_version(package, version)
            .await
            .map_err(|err| err.to_string())?;
        self.catalog
            .skip_version(package, version, skip.as_deref())
            .await
            .map_err(|err| err.to_string())?;
        self.catalog
            .yank_version(package, version, yanked)
            .await
            .map_err(|err| err.to_string())?;
        if skip.is_some() || yanked {
            let _ = self
                .skip
                .send(&SkipMsg {
                    package: package.to_owned(),
                    version: Some(version.to_owned()),
                })
                .await;
        }
        Ok(ImportReply::Done {
            verb: "ADDVER".to_owned(),
        })
    }

    async fn do_remove_pkg(&mut self, package: &str, builds: bool) -> Result<ImportReply, String> {
        let files = self
            .catalog
            .package_files(package)
            .await
            .map_err(|err| err.to_string())?;
        for file in files {
            self.remove_artifact(package, &file.filename).await?;
        }
        self.catalog
            .remove_package(package, builds)
            .await
            .map_err(|err| err.to_string())?;
        let _ = self
            .skip
            .send(&SkipMsg {
                package: package.to_owned(),
                version: None,
            })
            .await;
        let _ = self.web.send(&IndexMsg::DeletePackage(package.to_owned())).await;
        Ok(ImportReply::Done {
            verb: "REMPKG".to_owned(),
        })
    }

    async fn do_remove_ver(
        &mut self,
        package: &str,
        version: &str,
        builds: bool,
    ) -> Result<ImportReply, String> {
        let files = self
            .catalog
            .version_files(package, version)
            .await
            .map_err(|err| err.to_string())?;
        for filename in files {
            self.remove_artifact(package, &filename).await?;
        }
        self.catalog
            .remove_version(package, version, builds)
            .await
            .map_err(|err| err.to_string())?;
        let _ = self
            .skip
            .send(&SkipMsg {
                package: package.to_owned(),
                version: Some(version.to_owned()),
            })
            .await;
        let _ = self
            .web
            .send(&IndexMsg::DeleteVersion(
                package.to_owned(),
                version.to_owned(),
            ))
            .await;
        Ok(ImportReply::Done {
            verb: "REMVER".to_owned(),
        })
    }

    async fn do_rebuild(&mut self, target: RebuildTarget) -> Result<ImportReply, String> {
        match target {
            RebuildTarget::Home => {
                let catalog_stats = self
                    .catalog
                    .statistics()
                    .await
                    .map_err(|err| err.to_string())?;
                let disk = sysinfo::statvfs(&self.output_path).unwrap_or_default();
                let stats = assemble_stats(catalog_stats, disk, Default::default());
                let _ = self.web.send(&IndexMsg::Home(stats)).await;
            }
            RebuildTarget::Search => {
                let _ = self.web.send(&IndexMsg::Search).await;
            }
            RebuildTarget::Project(package) => {
                self.require_package(&package).await?;
                let _ = self.web.send(&IndexMsg::Project(package)).await;
            }
            RebuildTarget::Both(Some(package)) => {
                self.require_package(&package).await?;
                let _ = self.web.send(&IndexMsg::Both(package)).await;
            }
            RebuildTarget::Both(None) => {
                let packages = self
                    .catalog
                    .all_packages()
                    .await
                    .map_err(|err| err.to_string())?;
                for package in packages {
                    let _ = self.web.send(&IndexMsg::Both(package)).await;
                }
            }
        }
        Ok(ImportReply::Done {
            verb: "REBUILD".to_owned(),
        })
    }

    async fn require_package(&self, package: &str) -> Result<(), String> {
        match self.catalog.package_exists(package).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!("unknown package {package:?}")),
            Err(err) => Err(err.to_string()),
        }
    }

    async fn expect_file(&mut self, build: &BuildRecord, filename: &str) -> Result<(), String> {
        let file = build
            .files
            .get(filename)
            .ok_or_else(|| format!("no artifact named {filename:?}"))?
            .clone();
        match self
            .fs
            .request(&FsRequest::Expect {
                slave_id: IMPORT_SLAVE_ID,
                file,
            })
            .await
        {
            Ok(FsReply::Done) => Ok(()),
            Ok(FsReply::Error(reason)) => Err(reason),
            Ok(FsReply::Stats(_)) => Err("unexpected STATS reply".to_owned()),
            Err(err) => Err(err.to_string()),
        }
    }

    async fn remove_artifact(&mut self, package: &str, filename: &str) -> Result<(), String> {
        match self
            .fs
            .request(&FsRequest::Remove {
                package: package.to_owned(),
                filename: filename.to_owned(),
            })
            .await
        {
            Ok(FsReply::Done) => Ok(()),
            Ok(FsReply::Error(reason)) => Err(reason),
            Ok(FsReply::Stats(_)) => Err("unexpected STATS reply".to_owned()),
            Err(err) => Err(err.to_string()),
        }
    }
}
