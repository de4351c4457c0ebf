//! The catalog contract.
//!
//! The master never touches the relational catalog directly; it issues
//! the operations below and nothing else. [`CatalogClient`] wraps any
//! implementation with backoff retries for recoverable I/O errors.
//! [`MemCatalog`] is the bundled in-memory implementation behind the
//! `mem://` DSN, complete enough for tests, demos and single-process
//! deployments; a relational implementation lives outside this
//! repository and plugs in through the same trait.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wheelhouse_retry::ErrorClass;
use wheelhouse_types::BuildRecord;

mod client;
mod mem;

pub use client::CatalogClient;
pub use mem::MemCatalog;

/// Failures of catalog operations, split by what the caller should do
/// about them: retry, or surface the cause.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// The catalog could not be reached or the turn was cut short.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    /// The operation itself is invalid (unknown package, constraint
    /// violation). Retrying cannot help.
    #[error("{0}")]
    Logic(String),
}

impl CatalogError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CatalogError::Unavailable(_) => ErrorClass::Retryable,
            CatalogError::Logic(_) => ErrorClass::Permanent,
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// One committed artifact row, as the publisher reads it. Hashes come
/// from here, never from re-reading the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRow {
    pub filename: String,
    pub filesize: u64,
    pub filehash: String,
}

/// Aggregates the stats task folds into its periodic sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogStats {
    /// Packages with at least one successful build.
    pub packages_built: u64,
    /// Builds logged in the trailing hour.
    pub builds_last_hour: u64,
    /// Cumulative build duration.
    pub builds_time: Duration,
    /// Cumulative bytes of committed artifacts.
    pub builds_size: u64,
    /// Packages first seen in the trailing hour.
    pub new_last_hour: u64,
    /// Committed artifact count.
    pub files_count: u64,
}

/// The operations the master issues against the catalog.
///
/// Calls are short request/reply turns expected to complete in
/// milliseconds; handlers may await them directly.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// The persisted upstream change-stream cursor.
    async fn upstream_serial(&self) -> Result<u64>;
    async fn set_upstream_serial(&self, serial: u64) -> Result<()>;

    /// Register a package; returns false if it already existed.
    async fn add_new_package(&self, package: &str) -> Result<bool>;
    /// Register a version; returns false if it already existed.
    async fn add_new_package_version(&self, package: &str, version: &str) -> Result<bool>;

    /// Set or clear a package's skip reason.
    async fn skip_package(&self, package: &str, reason: Option<&str>) -> Result<()>;
    /// Set or clear a version's skip reason.
    async fn skip_version(&self, package: &str, version: &str, reason: Option<&str>)
    -> Result<()>;
    /// Mark or unmark a version as yanked upstream.
    async fn yank_version(&self, package: &str, version: &str, yanked: bool) -> Result<()>;

    /// Delete a package, optionally cascading to its build history.
    async fn remove_package(&self, package: &str, cascade_builds: bool) -> Result<()>;
    /// Delete a version, optionally cascading to its build history.
    async fn remove_version(
        &self,
        package: &str,
        version: &str,
        cascade_builds: bool,
    ) -> Result<()>;

    async fn package_exists(&self, package: &str) -> Result<bool>;
    async fn version_exists(&self, package: &str, version: &str) -> Result<bool>;

    /// The set of ABIs builds may target.
    async fn build_abis(&self) -> Result<BTreeSet<String>>;

    /// The pending (package, version) pairs for one ABI: versions that
    /// are not skipped, not yanked, and have no successful build for
    /// that ABI yet.
    async fn build_queue(&self, abi: &str) -> Result<Vec<(String, String)>>;

    /// Log a build attempt and return its catalog id.
    async fn log_build(&self, build: &BuildRecord) -> Result<i64>;

    /// Committed artifact rows for one package, in filename order.
    async fn package_files(&self, package: &str) -> Result<Vec<FileRow>>;
    /// Committed artifact filenames for one version.
    async fn version_files(&self, package: &str, version: &str) -> Result<Vec<String>>;

    /// Every known package, in first-seen order.
    async fn all_packages(&self) -> Result<Vec<String>>;

    async fn statistics(&self) -> Result<CatalogStats>;
}

/// Open a catalog from a DSN. The core only bundles the in-memory
/// implementation; relational DSNs belong to an external adapter.
pub fn connect(dsn: &str) -> Result<Arc<dyn Catalog>> {
    if let Some(spec) = dsn.strip_prefix("mem://") {
        let abis: BTreeSet<String> = if spec.is_empty() {
            BTreeSet::from(["cp34m".to_owned(), "cp35m".to_owned()])
        } else {
            spec.split(',')
                .filter(|abi| !abi.is_empty())
                .map(str::to_owned)
                .collect()
        };
        Ok(Arc::new(MemCatalog::with_abis(abis)))
    } else {
        Err(CatalogError::Logic(format!(
            "unsupported catalog DSN {dsn:?}: this build only bundles mem://, \
             external catalogs plug in through the Catalog trait"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_mem_uses_default_abis() {
        let catalog = connect("mem://").expect("connect");
        let abis = futures_block(catalog.build_abis()).expect("abis");
        assert_eq!(
            abis,
            BTreeSet::from(["cp34m".to_owned(), "cp35m".to_owned()])
        );
    }

    #[test]
    fn connect_mem_parses_abi_list() {
        let catalog = connect("mem://cp37m").expect("connect");
        let abis = futures_block(catalog.build_abis()).expect("abis");
        assert_eq!(abis, BTreeSet::from(["cp37m".to_owned()]));
    }

    #[test]
    fn connect_rejects_foreign_dsn() {
        assert!(connect("postgres:///wheels").is_err());
    }

    /// MemCatalog futures are ready immediately; poll them inline.
    fn futures_block<T>(fut: impl Future<Output = T>) -> T {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(fut)
    }
}
