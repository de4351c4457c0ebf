//! The retrying catalog client handed to every task.
//!
//! Recoverable I/O errors ([`CatalogError::Unavailable`]) are retried
//! under a bounded backoff; logic errors pass straight through to the
//! caller with their cause.

use std::collections::BTreeSet;
use std::sync::Arc;

use wheelhouse_retry::{BackoffConfig, retry};
use wheelhouse_types::BuildRecord;

use crate::{Catalog, CatalogError, CatalogStats, FileRow, Result};

#[derive(Clone)]
pub struct CatalogClient {
    catalog: Arc<dyn Catalog>,
    backoff: BackoffConfig,
}

impl CatalogClient {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            backoff: BackoffConfig::catalog(),
        }
    }

    pub fn with_backoff(catalog: Arc<dyn Catalog>, backoff: BackoffConfig) -> Self {
        Self { catalog, backoff }
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn Catalog>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry(&self.backoff, |_attempt| {
            let fut = op(Arc::clone(&self.catalog));
            async move {
                fut.await.map_err(|err| {
                    let class = err.class();
                    (err, class)
                })
            }
        })
        .await
    }

    pub async fn upstream_serial(&self) -> Result<u64> {
        self.run(|c| async move { c.upstream_serial().await }).await
    }

    pub async fn set_upstream_serial(&self, serial: u64) -> Result<()> {
        self.run(move |c| async move { c.set_upstream_serial(serial).await })
            .await
    }

    pub async fn add_new_package(&self, package: &str) -> Result<bool> {
        self.run(|c| async move { c.add_new_package(package).await })
            .await
    }

    pub async fn add_new_package_version(&self, package: &str, version: &str) -> Result<bool> {
        self.run(|c| async move { c.add_new_package_version(package, version).await })
            .await
    }

    pub async fn skip_package(&self, package: &str, reason: Option<&str>) -> Result<()> {
        self.run(|c| async move { c.skip_package(package, reason).await })
            .await
    }

    pub async fn skip_version(
        &self,
        package: &str,
        version: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        self.run(|c| async move { c.skip_version(package, version, reason).await })
            .await
    }

    pub async fn yank_version(&self, package: &str, version: &str, yanked: bool) -> Result<()> {
        self.run(move |c| async move { c.yank_version(package, version, yanked).await })
            .await
    }

    pub async fn remove_package(&self, package: &str, cascade_builds: bool) -> Result<()> {
        self.run(move |c| async move { c.remove_package(package, cascade_builds).await })
            .await
    }

    pub async fn remove_version(
        &self,
        package: &str,
        version: &str,
        cascade_builds: bool,
    ) -> Result<()> {
        self.run(move |c| async move { c.remove_version(package, version, cascade_builds).await })
            .await
    }

    pub async fn package_exists(&self, package: &str) -> Result<bool> {
        self.run(|c| async move { c.package_exists(package).await })
            .await
    }

    pub async fn version_exists(&self, package: &str, version: &str) -> Result<bool> {
        self.run(|c| async move { c.version_exists(package, version).await })
            .await
    }

    pub async fn build_abis(&self) -> Result<BTreeSet<String>> {
        self.run(|c| async move { c.build_abis().await }).await
    }

    pub async fn build_queue(&self, abi: &str) -> Result<Vec<(String, String)>> {
        self.run(|c| async move { c.build_queue(abi).await }).await
    }

    pub async fn log_build(&self, build: &BuildRecord) -> Result<i64> {
        self.run(|c| async move { c.log_build(build).await }).await
    }

    pub async fn package_files(&self, package: &str) -> Result<Vec<FileRow>> {
        self.run(|c| async move { c.package_files(package).await })
            .await
    }

    pub async fn version_files(&self, package: &str, version: &str) -> Result<Vec<String>> {
        self.run(|c| async move { c.version_files(package, version).await })
            .await
    }

    pub async fn all_packages(&self) -> Result<Vec<String>> {
        self.run(|c| async move { c.all_packages().await }).await
    }

    pub async fn statistics(&self) -> Result<CatalogStats> {
        self.run(|c| async move { c.statistics().await }).await
    }
}

impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A catalog that fails a fixed number of times before recovering.
    struct Flaky {
        failures: AtomicU32,
        inner: crate::MemCatalog,
    }

    #[async_trait]
    impl Catalog for Flaky {
        async fn upstream_serial(&self) -> Result<u64> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(CatalogError::Unavailable("connection reset".to_owned()));
            }
            self.inner.upstream_serial().await
        }

        async fn set_upstream_serial(&self, serial: u64) -> Result<()> {
            self.inner.set_upstream_serial(serial).await
        }
        async fn add_new_package(&self, package: &str) -> Result<bool> {
            self.inner.add_new_package(package).await
        }
        async fn add_new_package_version(&self, package: &str, version: &str) -> Result<bool> {
            self.inner.add_new_package_version(package, version).await
        }
        async fn skip_package(&self, package: &str, reason: Option<&str>) -> Result<()> {
            self.inner.skip_package(package, reason).await
        }
        async fn skip_version(
            &self,
            package: &str,
            version: &str,
            reason: Option<&str>,
        ) -> Result<()> {
            self.inner.skip_version(package, version, reason).await
        }
        async fn yank_version(&self, package: &str, version: &str, yanked: bool) -> Result<()> {
            self.inner.yank_version(package, version, yanked).await
        }
        async fn remove_package(&self, package: &str, cascade_builds: bool) -> Result<()> {
            self.inner.remove_package(package, cascade_builds).await
        }
        async fn remove_version(
            &self,
            package: &str,
            version: &str,
            cascade_builds: bool,
        ) -> Result<()> {
            self.inner
                .remove_version(package, version, cascade_builds)
                .await
        }
        async fn package_exists(&self, package: &str) -> Result<bool> {
            self.inner.package_exists(package).await
        }
        async fn version_exists(&self, package: &str, version: &str) -> Result<bool> {
            self.inner.version_exists(package, version).await
        }
        async fn build_abis(&self) -> Result<BTreeSet<String>> {
            self.inner.build_abis().await
        }
        async fn build_queue(&self, abi: &str) -> Result<Vec<(String, String)>> {
            self.inner.build_queue(abi).await
        }
        async fn log_build(&self, build: &BuildRecord) -> Result<i64> {
            self.inner.log_build(build).await
        }
        async fn package_files(&self, package: &str) -> Result<Vec<FileRow>> {
            self.inner.package_files(package).await
        }
        async fn version_files(&self, package: &str, version: &str) -> Result<Vec<String>> {
            self.inner.version_files(package, version).await
        }
        async fn all_packages(&self) -> Result<Vec<String>> {
            self.inner.all_packages().await
        }
        async fn statistics(&self) -> Result<CatalogStats> {
            self.inner.statistics().await
        }
    }

    fn immediate_backoff(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            strategy: wheelhouse_retry::BackoffStrategy::Immediate,
            max_attempts,
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::ZERO,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn client_retries_unavailable_errors() {
        let flaky = Flaky {
            failures: AtomicU32::new(2),
            inner: crate::MemCatalog::with_abis(["cp34m".to_owned()]),
        };
        let client = CatalogClient::with_backoff(Arc::new(flaky), immediate_backoff(5));
        assert_eq!(client.upstream_serial().await.expect("serial"), 0);
    }

    #[tokio::test]
    async fn client_gives_up_when_exhausted() {
        let flaky = Flaky {
            failures: AtomicU32::new(10),
            inner: crate::MemCatalog::with_abis(["cp34m".to_owned()]),
        };
        let client = CatalogClient::with_backoff(Arc::new(flaky), immediate_backoff(3));
        assert!(matches!(
            client.upstream_serial().await,
            Err(CatalogError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn logic_errors_pass_through_without_retry() {
        let catalog = crate::MemCatalog::with_abis(["cp34m".to_owned()]);
        let client = CatalogClient::with_backoff(Arc::new(catalog), immediate_backoff(5));
        assert!(matches!(
            client.build_queue("cp99m").await,
            Err(CatalogError::Logic(_))
        ));
    }
}
