//! Error types for cluster orchestration.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::admin::AdminError;
use crate::controller::StopReport;
use crate::snapshot::ClusterSnapshot;

/// Cluster orchestration errors.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested topology cannot be built.
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// Cluster manifest missing from the deploy root.
    #[error("Cluster not initialized at {0}")]
    NotInitialized(PathBuf),

    /// Node index is not part of the topology.
    #[error("Node {0} not found")]
    NodeNotFound(usize),

    /// Node already running.
    #[error("Node {0} is already running")]
    NodeAlreadyRunning(usize),

    /// Operation requires a running node.
    #[error("Node {0} is not running")]
    NodeNotRunning(usize),

    /// Start requested before the node's directories and config were written.
    #[error("Node {0} has not been deployed")]
    NotDeployed(usize),

    /// Process could not be launched.
    #[error("Node {node} failed to launch: {reason}")]
    LaunchFailure { node: usize, reason: String },

    /// Process launched but never became live.
    #[error("Node {node} did not become live within {timeout_ms}ms")]
    StartupTimeout { node: usize, timeout_ms: u64 },

    /// The first node never brought the metadata service up.
    #[error("Cluster bootstrap failed on node {node}: {reason}")]
    ClusterBootstrapFailure { node: usize, reason: String },

    /// Administrative command issued before bootstrap completed.
    #[error("Cluster has not been bootstrapped")]
    NotBootstrapped,

    /// The node already holds an mnode.
    #[error("Node {node} (dnode {dnode_id}) is already an mnode")]
    DuplicateMnode { node: usize, dnode_id: u32 },

    /// Administrative interface error, surfaced verbatim.
    #[error("Admin command failed: {0}")]
    Admin(#[from] AdminError),

    /// Polling did not observe the expected cluster shape in time.
    #[error("Timed out waiting for {what} (expected {expected})")]
    ConvergenceTimeout {
        what: String,
        expected: usize,
        last: Option<Box<ClusterSnapshot>>,
    },

    /// Every attempted stop needed a forced kill. Carries the full report so
    /// crashed nodes stay visible.
    #[error("Failed to stop nodes cleanly: forced {:?}, crashed {:?}", .0.forced, .0.crashed)]
    StopFailure(Box<StopReport>),

    /// One step of a node replacement failed; earlier steps stay applied.
    #[error("Replacing node {node} failed at {step} step: {source}")]
    ReplaceFailed {
        node: usize,
        step: ReplaceStep,
        #[source]
        source: Box<Error>,
    },

    /// Operation observed cancellation.
    #[error("Operation cancelled")]
    Cancelled,

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Ordered steps of [`crate::ClusterController::replace_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStep {
    Stop,
    Drop,
    Provision,
    Register,
}

impl fmt::Display for ReplaceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stop => "stop",
            Self::Drop => "drop",
            Self::Provision => "provision",
            Self::Register => "register",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Returns the last observed snapshot carried by a convergence timeout.
    pub fn last_snapshot(&self) -> Option<&ClusterSnapshot> {
        match self {
            Self::ConvergenceTimeout { last, .. } => last.as_deref(),
            Self::ReplaceFailed { source, .. } => source.last_snapshot(),
            _ => None,
        }
    }

    /// Per-node outcomes of a stop that escalated to forced kills.
    pub fn stop_report(&self) -> Option<&StopReport> {
        match self {
            Self::StopFailure(report) => Some(report),
            _ => None,
        }
    }

    /// Whether the failure ends the orchestration run.
    ///
    /// Administrative rejections and convergence timeouts are left to the
    /// calling scenario.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidTopology(_)
                | Self::LaunchFailure { .. }
                | Self::StartupTimeout { .. }
                | Self::ClusterBootstrapFailure { .. }
                | Self::NotDeployed(_)
                | Self::Io(_)
        )
    }
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;
