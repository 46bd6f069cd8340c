//! Multi-node cluster orchestration for database integration tests.
//!
//! Provides local cluster control for scripted test scenarios:
//! - Deterministic topology and per-node configuration files
//! - Process supervision for every database node
//! - Membership commands (dnodes, mnodes) through an admin interface
//! - Convergence polling with bounded deadlines

pub mod admin;
pub mod checker;
pub mod config;
pub mod controller;
pub mod error;
pub mod node;
pub mod probe;
pub mod rest;
pub mod sim;
pub mod snapshot;
pub mod sql;

pub use admin::{AdminClient, AdminError, AdminResult};
pub use checker::ClusterStateChecker;
pub use config::{ClusterTopology, NodeConfig, NodeRole, TopologySettings, parse_endpoint};
pub use controller::{ClusterController, ControllerSettings, StartMode, StopReport};
pub use error::{Error, ReplaceStep, Result};
pub use node::{LaunchSpec, NodeProcess, NodeStatus, StopOutcome};
pub use probe::Liveness;
pub use rest::RestExecutor;
pub use sim::SimulatedCluster;
pub use snapshot::{ClusterSnapshot, DnodeInfo, DnodeStatus, MnodeInfo, MnodeRole};
pub use sql::{QueryResult, SqlAdminClient, SqlExecutor};

/// Lays out a new cluster under `settings.deploy_root` and writes its manifest.
pub fn init_cluster(
    settings: TopologySettings,
    total_nodes: usize,
    mnode_target: usize,
) -> Result<ClusterTopology> {
    let topology = ClusterTopology::configure_with(settings, total_nodes, mnode_target)?;
    std::fs::create_dir_all(&topology.settings.deploy_root)?;
    topology.save()?;
    Ok(topology)
}

/// Pids recorded by nodes deployed under `deploy_root`.
///
/// Lets a separate process find nodes started by an earlier run.
pub fn recorded_pids(deploy_root: &std::path::Path) -> Result<Vec<(usize, u32)>> {
    let topology = ClusterTopology::load(deploy_root)?;
    let mut pids = Vec::new();
    for node in &topology.nodes {
        let path = node::pid_path(&node.cfg_dir);
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(pid) = raw.trim().parse::<u32>() {
            pids.push((node.index, pid));
        }
    }
    Ok(pids)
}
