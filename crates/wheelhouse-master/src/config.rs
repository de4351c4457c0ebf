//! Master configuration.
//!
//! Every key is optional with a sensible default; an unknown key is a
//! startup error rather than a silent typo.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Paths searched when no explicit configuration file is given.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "/etc/wheelhouse.toml",
    "/usr/local/etc/wheelhouse.toml",
];

/// Internal queue addresses that are not operator-configurable.
pub const INT_CONTROL_QUEUE: &str = "inproc://control";
pub const INT_STATUS_QUEUE: &str = "inproc://status";
pub const INT_QUIT_QUEUE: &str = "inproc://quit";
pub const INT_FS_QUEUE: &str = "inproc://fs";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MasterConfig {
    /// Catalog DSN. `mem://[abi,abi,...]` selects the bundled in-memory
    /// catalog; anything else requires an external catalog adapter.
    pub database: String,
    /// Upstream XML-RPC endpoint polled for changelog events.
    pub pypi_xmlrpc: String,
    /// Canonical upstream simple-index URL, handed to builders in ACK.
    pub pypi_simple: String,
    /// Repository root the indexes and wheels are published under.
    pub output_path: PathBuf,
    /// Builder protocol endpoint (ROUTER).
    pub slave_queue: String,
    /// File-transfer endpoint (ROUTER).
    pub file_queue: String,
    /// Admin ingress endpoint (ROUTER).
    pub import_queue: String,
    /// External status fan-out (PUB).
    pub status_queue: String,
    /// External control verbs (PULL).
    pub control_queue: String,
    /// Stats aggregator ingress (PULL).
    pub stats_queue: String,
    /// Publisher ingress (PULL).
    pub web_queue: String,
    /// Planner request/reply endpoint (REP).
    pub builds_queue: String,
    /// Planner prune notifications (PULL).
    pub skip_queue: String,
    /// Transfer credits granted per builder.
    pub pipeline_size: u64,
    /// Transfer chunk size in bytes.
    pub chunk_size: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            database: "mem://".to_owned(),
            pypi_xmlrpc: "https://pypi.org/pypi".to_owned(),
            pypi_simple: "https://pypi.org/simple".to_owned(),
            output_path: PathBuf::from("/var/www"),
            slave_queue: "tcp://0.0.0.0:5555".to_owned(),
            file_queue: "tcp://0.0.0.0:5556".to_owned(),
            import_queue: "tcp://127.0.0.1:5557".to_owned(),
            status_queue: "tcp://127.0.0.1:5558".to_owned(),
            control_queue: "tcp://127.0.0.1:5559".to_owned(),
            stats_queue: "inproc://stats".to_owned(),
            web_queue: "inproc://indexes".to_owned(),
            builds_queue: "inproc://builds".to_owned(),
            skip_queue: "inproc://skip".to_owned(),
            pipeline_size: 10,
            chunk_size: 65_536,
        }
    }
}

impl MasterConfig {
    /// Load configuration from `path`, or from the first default path
    /// that exists, or fall back to pure defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let found = DEFAULT_CONFIG_PATHS
                    .iter()
                    .map(Path::new)
                    .find(|candidate| candidate.exists());
                match found {
                    Some(candidate) => Self::from_file(candidate)?,
                    None => Self::default(),
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("invalid configuration {}", path.display()))
    }

    /// The transfer walk divides by `chunk_size` and grants at least
    /// one credit; zero for either would wedge every transfer.
    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be at least 1");
        }
        if self.pipeline_size == 0 {
            anyhow::bail!("pipeline_size must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_queue_layout() {
        let config = MasterConfig::default();
        assert_eq!(config.pipeline_size, 10);
        assert_eq!(config.chunk_size, 65_536);
        assert_eq!(config.builds_queue, "inproc://builds");
        assert!(config.slave_queue.starts_with("tcp://"));
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("wheelhouse.toml");
        fs::write(&path, "output_path = \"/srv/wheels\"\npipeline_size = 4\n").expect("write");
        let config = MasterConfig::load(Some(&path)).expect("load");
        assert_eq!(config.output_path, PathBuf::from("/srv/wheels"));
        assert_eq!(config.pipeline_size, 4);
        assert_eq!(config.chunk_size, 65_536);
    }

    #[test]
    fn unknown_keys_are_an_error() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("wheelhouse.toml");
        fs::write(&path, "chunck_size = 1024\n").expect("write");
        assert!(MasterConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(MasterConfig::load(Some(Path::new("/nonexistent/wheelhouse.toml"))).is_err());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("wheelhouse.toml");
        fs::write(&path, "chunk_size = 0\n").expect("write");
        assert!(MasterConfig::load(Some(&path)).is_err());
    }
}
