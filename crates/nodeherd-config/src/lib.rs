//! Configuration management for nodeherd
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the binary)
//! 2. Environment variables (NHERD_* prefix, `__` between section and key)
//! 3. nodeherd.local.toml (gitignored, local overrides)
//! 4. nodeherd.toml (git-tracked, project config)
//! 5. ~/.config/nodeherd/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub deploy: DeployConfig,
    pub cluster: ClusterConfig,
    pub timeouts: TimeoutConfig,
    pub admin: AdminConfig,
    /// Extra `key value` pairs written into every node's config file.
    pub overrides: BTreeMap<String, String>,
}

/// Where nodes are deployed and how the server binary is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub root: PathBuf,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub config_file: String,
    pub liveness: LivenessMode,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("sim"),
            executable: PathBuf::from("taosd"),
            args: vec!["-c".to_string(), "{cfg_dir}".to_string()],
            config_file: "taos.cfg".to_string(),
            liveness: LivenessMode::Tcp,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LivenessMode {
    Tcp,
    Process,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub dnodes: usize,
    pub mnodes: usize,
    /// Nodes registered as dnodes at startup; all when unset.
    pub create_dnodes: Option<usize>,
    pub host: String,
    pub base_port: u16,
    pub port_stride: u16,
    pub parallel_start: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            dnodes: 1,
            mnodes: 0,
            create_dnodes: None,
            host: "localhost".to_string(),
            base_port: 6030,
            port_stride: 100,
            parallel_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub start_secs: u64,
    pub stop_secs: u64,
    pub bootstrap_secs: u64,
    pub convergence_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            start_secs: 30,
            stop_secs: 10,
            bootstrap_secs: 30,
            convergence_secs: 60,
            poll_interval_ms: 1000,
        }
    }
}

impl TimeoutConfig {
    pub fn start(&self) -> Duration {
        Duration::from_secs(self.start_secs)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_secs(self.stop_secs)
    }

    pub fn bootstrap(&self) -> Duration {
        Duration::from_secs(self.bootstrap_secs)
    }

    pub fn convergence(&self) -> Duration {
        Duration::from_secs(self.convergence_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub backend: AdminBackend,
    pub rest_port: u16,
    pub user: String,
    pub password: String,
    pub log_sql: bool,
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            backend: AdminBackend::Rest,
            rest_port: 6041,
            user: "root".to_string(),
            password: "taosdata".to_string(),
            log_sql: false,
            request_timeout_secs: 10,
        }
    }
}

impl AdminConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Channel used for administrative commands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AdminBackend {
    /// The database's HTTP REST endpoint.
    Rest,
    /// In-memory cluster, for dry runs.
    Sim,
}

impl HarnessConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.deploy.root.is_relative() {
            self.deploy.root = base.join(&self.deploy.root);
        }
    }

    /// Rejects combinations no cluster can be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cluster = &self.cluster;
        if cluster.dnodes == 0 {
            return Err(ConfigError::ValidationError(
                "cluster.dnodes must be at least 1".to_string(),
            ));
        }
        if cluster.mnodes > cluster.dnodes {
            return Err(ConfigError::ValidationError(format!(
                "cluster.mnodes ({}) exceeds cluster.dnodes ({})",
                cluster.mnodes, cluster.dnodes
            )));
        }
        if cluster.create_dnodes.is_some_and(|n| n > cluster.dnodes) {
            return Err(ConfigError::ValidationError(
                "cluster.create_dnodes exceeds cluster.dnodes".to_string(),
            ));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts.poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
