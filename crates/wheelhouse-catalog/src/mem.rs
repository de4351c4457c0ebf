//! The in-memory catalog.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use wheelhouse_types::BuildRecord;

use crate::{Catalog, CatalogError, CatalogStats, FileRow, Result};

#[derive(Debug, Clone)]
struct VersionRow {
    skip: Option<String>,
    yanked: bool,
}

#[derive(Debug, Clone)]
struct PackageRow {
    first_seen: DateTime<Utc>,
    /// Insertion index, preserved for root-index ordering.
    order: u64,
    skip: Option<String>,
    versions: BTreeMap<String, VersionRow>,
}

#[derive(Debug, Clone)]
struct StoredBuild {
    logged_at: DateTime<Utc>,
    record: BuildRecord,
}

#[derive(Debug, Default)]
struct Inner {
    serial: u64,
    packages: BTreeMap<String, PackageRow>,
    builds: Vec<StoredBuild>,
    next_package_order: u64,
    next_build_id: i64,
}

/// A complete catalog held in process memory. Everything is computed
/// from two tables: the package/version registry and the build log.
#[derive(Debug)]
pub struct MemCatalog {
    abis: BTreeSet<String>,
    inner: Mutex<Inner>,
}

impl MemCatalog {
    /// An empty catalog supporting the given build ABIs.
    pub fn with_abis(abis: impl IntoIterator<Item = String>) -> Self {
        Self {
            abis: abis.into_iter().collect(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    fn package(&self, package: &str) -> Result<&PackageRow> {
        self.packages
            .get(package)
            .ok_or_else(|| CatalogError::Logic(format!("unknown package {package:?}")))
    }

    fn package_mut(&mut self, package: &str) -> Result<&mut PackageRow> {
        self.packages
            .get_mut(package)
            .ok_or_else(|| CatalogError::Logic(format!("unknown package {package:?}")))
    }

    fn version_mut(&mut self, package: &str, version: &str) -> Result<&mut VersionRow> {
        let row = self.package_mut(package)?;
        row.versions
            .get_mut(version)
            .ok_or_else(|| CatalogError::Logic(format!("unknown version {package}-{version}")))
    }

    /// Artifact rows across all successful builds, deduplicated by
    /// filename (a rebuild re-registers the same artifact). Rows are
    /// recorded at log time; index rebuilds are only requested once the
    /// corresponding transfers have been verified.
    fn logged_files<'a>(
        &'a self,
        mut keep: impl FnMut(&'a StoredBuild) -> bool + 'a,
    ) -> BTreeMap<&'a str, &'a wheelhouse_types::ArtifactFile> {
        let mut rows = BTreeMap::new();
        for build in self.builds.iter().filter(|b| b.record.status) {
            if !keep(build) {
                continue;
            }
            for file in build.record.files.values() {
                rows.insert(file.filename.as_str(), file);
            }
        }
        rows
    }
}

#[async_trait]
impl Catalog for MemCatalog {
    async fn upstream_serial(&self) -> Result<u64> {
        Ok(self.lock().serial)
    }

    async fn set_upstream_serial(&self, serial: u64) -> Result<()> {
        self.lock().serial = serial;
        Ok(())
    }

    async fn add_new_package(&self, package: &str) -> Result<bool> {
        let mut inner = self.lock();
        if inner.packages.contains_key(package) {
            return Ok(false);
        }
        let order = inner.next_package_order;
        inner.next_package_order += 1;
        inner.packages.insert(
            package.to_owned(),
            PackageRow {
                first_seen: Utc::now(),
                order,
                skip: None,
                versions: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn add_new_package_version(&self, package: &str, version: &str) -> Result<bool> {
        let mut inner = self.lock();
        if !inner.packages.contains_key(package) {
            // Upstream file events can arrive before the package event
            // after a serial rewind; treat them as implicit creation.
            let order = inner.next_package_order;
            inner.next_package_order += 1;
            inner.packages.insert(
                package.to_owned(),
                PackageRow {
                    first_seen: Utc::now(),
                    order,
                    skip: None,
                    versions: BTreeMap::new(),
                },
            );
        }
        let row = inner.package_mut(package)?;
        if row.versions.contains_key(version) {
            return Ok(false);
        }
        row.versions.insert(
            version.to_owned(),
            VersionRow {
                skip: None,
                yanked: false,
            },
        );
        Ok(true)
    }

    async fn skip_package(&self, package: &str, reason: Option<&str>) -> Result<()> {
        self.lock().package_mut(package)?.skip = reason.map(str::to_owned);
        Ok(())
    }

    async fn skip_version(
        &self,
        package: &str,
        version: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        self.lock().version_mut(package, version)?.skip = reason.map(str::to_owned);
        Ok(())
    }

    async fn yank_version(&self, package: &str, version: &str, yanked: bool) -> Result<()> {
        self.lock().version_mut(package, version)?.yanked = yanked;
        Ok(())
    }

    async fn remove_package(&self, package: &str, cascade_builds: bool) -> Result<()> {
        let mut inner = self.lock();
        inner
            .packages
            .remove(package)
            .ok_or_else(|| CatalogError::Logic(format!("unknown package {package:?}")))?;
        if cascade_builds {
            inner.builds.retain(|b| b.record.package != package);
        }
        Ok(())
    }

    async fn remove_version(
        &self,
        package: &str,
        version: &str,
        cascade_builds: bool,
    ) -> Result<()> {
        let mut inner = self.lock();
        let row = inner.package_mut(package)?;
        row.versions
            .remove(version)
            .ok_or_else(|| CatalogError::Logic(format!("unknown version {package}-{version}")))?;
        if cascade_builds {
            inner
                .builds
                .retain(|b| !(b.record.package == package && b.record.version == version));
        }
        Ok(())
    }

    async fn package_exists(&self, package: &str) -> Result<bool> {
        Ok(self.lock().packages.contains_key(package))
    }

    async fn version_exists(&self, package: &str, version: &str) -> Result<bool> {
        Ok(self
            .lock()
            .packages
            .get(package)
            .is_some_and(|row| row.versions.contains_key(version)))
    }

    async fn build_abis(&self) -> Result<BTreeSet<String>> {
        Ok(self.abis.clone())
    }

    async fn build_queue(&self, abi: &str) -> Result<Vec<(String, String)>> {
        if !self.abis.contains(abi) {
            return Err(CatalogError::Logic(format!("unsupported ABI {abi:?}")));
        }
        let inner = self.lock();
        let built: BTreeSet<(&str, &str)> = inner
            .builds
            .iter()
            .filter(|b| b.record.status && b.record.abi_tag == abi)
            .map(|b| (b.record.package.as_str(), b.record.version.as_str()))
            .collect();
        let mut rows: Vec<(&String, &PackageRow)> = inner
            .packages
            .iter()
            .filter(|(_, row)| row.skip.is_none())
            .collect();
        rows.sort_by_key(|(_, row)| row.order);
        let mut queue = Vec::new();
        for (name, row) in rows {
            for (version, vrow) in &row.versions {
                if vrow.skip.is_some() || vrow.yanked {
                    continue;
                }
                if !built.contains(&(name.as_str(), version.as_str())) {
                    queue.push((name.clone(), version.clone()));
                }
            }
        }
        Ok(queue)
    }

    async fn log_build(&self, build: &BuildRecord) -> Result<i64> {
        let mut inner = self.lock();
        if !inner.packages.contains_key(&build.package) {
            return Err(CatalogError::Logic(format!(
                "unknown package {:?}",
                build.package
            )));
        }
        inner.next_build_id += 1;
        let id = inner.next_build_id;
        inner.builds.push(StoredBuild {
            logged_at: Utc::now(),
            record: build.clone(),
        });
        Ok(id)
    }

    async fn package_files(&self, package: &str) -> Result<Vec<FileRow>> {
        let inner = self.lock();
        inner.package(package)?;
        Ok(inner
            .logged_files(|b| b.record.package == package)
            .values()
            .map(|file| FileRow {
                filename: file.filename.clone(),
                filesize: file.filesize,
                filehash: file.filehash.clone(),
            })
            .collect())
    }

    async fn version_files(&self, package: &str, version: &str) -> Result<Vec<String>> {
        let inner = self.lock();
        inner.package(package)?;
        Ok(inner
            .logged_files(|b| b.record.package == package && b.record.version == version)
            .keys()
            .map(|name| (*name).to_owned())
            .collect())
    }

    async fn all_packages(&self) -> Result<Vec<String>> {
        let inner = self.lock();
        let mut rows: Vec<(&String, &PackageRow)> = inner.packages.iter().collect();
        rows.sort_by_key(|(_, row)| row.order);
        Ok(rows.into_iter().map(|(name, _)| name.clone()).collect())
    }

    async fn statistics(&self) -> Result<CatalogStats> {
        let inner = self.lock();
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let packages_built = inner
            .builds
            .iter()
            .filter(|b| b.record.status)
            .map(|b| b.record.package.as_str())
            .collect::<BTreeSet<_>>()
            .len() as u64;
        let builds_last_hour = inner
            .builds
            .iter()
            .filter(|b| b.logged_at > hour_ago)
            .count() as u64;
        let builds_time = inner
            .builds
            .iter()
            .map(|b| b.record.duration)
            .sum::<Duration>();
        let committed = inner.logged_files(|_| true);
        let builds_size = committed.values().map(|f| f.filesize).sum();
        let files_count = committed.len() as u64;
        let new_last_hour = inner
            .packages
            .values()
            .filter(|row| row.first_seen > hour_ago)
            .count() as u64;
        Ok(CatalogStats {
            packages_built,
            builds_last_hour,
            builds_time,
            builds_size,
            new_last_hour,
            files_count,
        })
    }
}
