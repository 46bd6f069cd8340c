//! Cluster controller: owns every node process of one topology and sequences
//! lifecycle and membership operations against the live cluster.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admin::{AdminClient, AdminError};
use crate::checker::{ClusterStateChecker, DEFAULT_POLL_INTERVAL};
use crate::config::{ClusterTopology, NodeRole};
use crate::error::ReplaceStep;
use crate::node::{LaunchSpec, NodeProcess, NodeStatus, StopOutcome};
use crate::snapshot::ClusterSnapshot;
use crate::{Error, Result};

/// How nodes after the first one are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    #[default]
    Sequential,
    Parallel,
}

/// Timeouts and policies of a controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// How long the first node may take to list itself as a dnode.
    pub bootstrap_timeout: Duration,

    /// Default deadline of the `wait_for_*` helpers.
    pub convergence_timeout: Duration,

    pub poll_interval: Duration,

    pub start_mode: StartMode,

    /// Number of topology nodes (first node included) registered as dnodes
    /// by [`ClusterController::start_sequential`]. `None` registers all.
    pub register_limit: Option<usize>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            bootstrap_timeout: Duration::from_secs(30),
            convergence_timeout: Duration::from_secs(60),
            poll_interval: DEFAULT_POLL_INTERVAL,
            start_mode: StartMode::Sequential,
            register_limit: None,
        }
    }
}

/// Per-node outcome of [`ClusterController::stop_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub graceful: Vec<usize>,
    pub forced: Vec<usize>,
    /// Nodes found dead before the stop, with their exit code.
    pub crashed: Vec<(usize, Option<i32>)>,
    pub already_stopped: Vec<usize>,
}

impl StopReport {
    fn record(&mut self, index: usize, outcome: StopOutcome) {
        match outcome {
            StopOutcome::Graceful => self.graceful.push(index),
            StopOutcome::Forced => self.forced.push(index),
            StopOutcome::Crashed(code) => self.crashed.push((index, code)),
            StopOutcome::AlreadyStopped => self.already_stopped.push(index),
        }
    }

    /// Nodes that were running when the stop was issued.
    pub fn attempted(&self) -> usize {
        self.graceful.len() + self.forced.len()
    }
}

/// Orchestrates the node processes of one [`ClusterTopology`].
///
/// Only the controller changes process state. Administrative commands go
/// through the shared [`AdminClient`] and are never retried here.
pub struct ClusterController {
    topology: ClusterTopology,
    launch: Arc<LaunchSpec>,
    settings: ControllerSettings,
    admin: Arc<dyn AdminClient>,
    nodes: BTreeMap<usize, NodeProcess>,
    cancel: CancellationToken,
    bootstrapped: bool,
}

impl ClusterController {
    /// Creates a controller; nothing is deployed or started yet.
    pub fn new(topology: ClusterTopology, launch: LaunchSpec, admin: Arc<dyn AdminClient>) -> Self {
        let launch = Arc::new(launch);
        let cancel = CancellationToken::new();
        let nodes = topology
            .nodes
            .iter()
            .map(|config| {
                let node = NodeProcess::new(config.clone(), launch.clone())
                    .with_cancellation(cancel.clone());
                (config.index, node)
            })
            .collect();

        Self {
            topology,
            launch,
            settings: ControllerSettings::default(),
            admin,
            nodes,
            cancel,
            bootstrapped: false,
        }
    }

    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Ties every blocking wait of this controller, node startup included,
    /// to `cancel`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        for node in self.nodes.values_mut() {
            node.set_cancellation(cancel.clone());
        }
        self.cancel = cancel;
        self
    }

    /// Deploys every node in index order, stopping at the first failure.
    pub fn deploy_all(&mut self) -> Result<()> {
        self.topology.save()?;
        for node in self.nodes.values_mut() {
            node.deploy()?;
        }
        info!(
            nodes = self.nodes.len(),
            root = %self.topology.settings.deploy_root.display(),
            "cluster deployed"
        );
        Ok(())
    }

    /// Boots the first node, waits for it to serve the metadata service, then
    /// starts and registers the remaining nodes.
    pub async fn start_sequential(&mut self) -> Result<()> {
        let first = self.topology.first_node().clone();

        self.bootstrap(first.index, &first.endpoint()).await?;

        let rest: Vec<usize> = self
            .nodes
            .keys()
            .copied()
            .filter(|&index| index != first.index)
            .collect();

        match self.settings.start_mode {
            StartMode::Sequential => {
                for index in rest {
                    self.check_cancelled()?;
                    self.node_mut(index)?.start().await?;
                }
            }
            StartMode::Parallel => {
                self.check_cancelled()?;
                let starts = self
                    .nodes
                    .values_mut()
                    .filter(|node| node.index() != first.index)
                    .map(NodeProcess::start);
                join_all(starts).await.into_iter().collect::<Result<Vec<()>>>()?;
            }
        }

        self.register_dnodes().await
    }

    async fn bootstrap(&mut self, index: usize, endpoint: &str) -> Result<()> {
        let bootstrap_failure = |e: Error| match e {
            Error::Cancelled => Error::Cancelled,
            other => Error::ClusterBootstrapFailure {
                node: index,
                reason: other.to_string(),
            },
        };

        self.node_mut(index)?
            .start()
            .await
            .map_err(bootstrap_failure)?;

        self.checker()
            .wait_for("bootstrap", 1, self.settings.bootstrap_timeout, |s| {
                s.dnodes.iter().any(|d| d.endpoint == endpoint && d.is_ready())
            })
            .await
            .map_err(bootstrap_failure)?;

        self.bootstrapped = true;
        info!(node = index, endpoint, "cluster bootstrapped");
        Ok(())
    }

    /// Registers non-first nodes that the cluster does not list yet.
    pub async fn register_dnodes(&mut self) -> Result<()> {
        self.ensure_bootstrapped()?;
        let snapshot = self.admin.snapshot().await?;
        let limit = self.settings.register_limit.unwrap_or(self.topology.total_nodes);

        for config in self.topology.nodes.iter().take(limit) {
            if config.is_first_node {
                continue;
            }
            let endpoint = config.endpoint();
            if snapshot.contains_endpoint(&endpoint) {
                continue;
            }
            self.check_cancelled()?;
            self.admin.create_dnode(&endpoint).await?;
            info!(node = config.index, endpoint, "dnode registered");
        }
        Ok(())
    }

    /// Promotes the dnode behind node `index` to an mnode.
    pub async fn create_mnode(&mut self, index: usize) -> Result<()> {
        self.ensure_bootstrapped()?;
        let node = self.node_mut(index)?;
        if node.refresh_status() != NodeStatus::Running {
            return Err(Error::NodeNotRunning(index));
        }
        let endpoint = node.endpoint();

        let snapshot = self.admin.snapshot().await?;
        let dnode_id = snapshot.dnode_id(&endpoint).ok_or_else(|| {
            Error::Admin(AdminError::rejected(
                format!("create mnode for node {index}"),
                format!("{endpoint} is not a registered dnode"),
            ))
        })?;
        if snapshot.is_mnode(dnode_id) {
            return Err(Error::DuplicateMnode {
                node: index,
                dnode_id,
            });
        }

        match self.admin.create_mnode(dnode_id).await {
            Ok(()) => {
                info!(node = index, dnode_id, "mnode created");
                Ok(())
            }
            Err(AdminError::DuplicateMnode(dnode_id)) => Err(Error::DuplicateMnode {
                node: index,
                dnode_id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates mnodes on every mnode candidate that does not hold one yet,
    /// waiting for the metadata group to settle after each.
    pub async fn promote_mnodes(&mut self) -> Result<ClusterSnapshot> {
        let candidates: Vec<usize> = self
            .topology
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::MnodeCandidate && !n.is_first_node)
            .map(|n| n.index)
            .collect();

        let mut snapshot = self.checker().snapshot().await?;
        for index in candidates {
            let endpoint = self.node(index)?.endpoint();
            let already = snapshot
                .dnode_id(&endpoint)
                .is_some_and(|id| snapshot.is_mnode(id));
            if already {
                continue;
            }
            self.create_mnode(index).await?;
            snapshot = self.wait_for_mnode_count(snapshot.mnodes.len() + 1).await?;
        }
        Ok(snapshot)
    }

    /// Recreates node `index` at `new_endpoint` under a new cluster identity.
    ///
    /// Steps run in order: stop the process, drop its dnode, provision a fresh
    /// node at the new endpoint, register it. A failing step is reported with
    /// [`Error::ReplaceFailed`]; earlier steps are not undone.
    pub async fn replace_node(&mut self, index: usize, new_endpoint: &str) -> Result<()> {
        self.ensure_bootstrapped()?;
        let old_endpoint = self.node(index)?.endpoint();

        let mut rebound = self.topology.clone();
        rebound.rebind(index, new_endpoint)?;

        let old_id = self.admin.snapshot().await?.dnode_id(&old_endpoint);
        let failed = |step: ReplaceStep| {
            move |e: Error| Error::ReplaceFailed {
                node: index,
                step,
                source: Box::new(e),
            }
        };

        self.check_cancelled().map_err(failed(ReplaceStep::Stop))?;
        let outcome = self.node_mut(index)?.stop().await;
        info!(node = index, ?outcome, "replace: stopped");

        match old_id {
            Some(id) => {
                self.admin
                    .drop_dnode(id)
                    .await
                    .map_err(|e| failed(ReplaceStep::Drop)(e.into()))?;
                info!(node = index, dnode_id = id, "replace: dropped");
            }
            None => warn!(node = index, old_endpoint, "replace: old endpoint was not a member"),
        }

        self.provision(index, rebound)
            .await
            .map_err(failed(ReplaceStep::Provision))?;
        info!(node = index, new_endpoint, "replace: provisioned");

        self.check_cancelled().map_err(failed(ReplaceStep::Register))?;
        self.admin
            .create_dnode(new_endpoint)
            .await
            .map_err(|e| failed(ReplaceStep::Register)(e.into()))?;
        info!(node = index, new_endpoint, "replace: registered");

        Ok(())
    }

    async fn provision(&mut self, index: usize, rebound: ClusterTopology) -> Result<()> {
        self.check_cancelled()?;
        let config = rebound
            .node(index)
            .cloned()
            .ok_or(Error::NodeNotFound(index))?;
        self.topology = rebound;
        self.topology.save()?;

        let node = self.node_mut(index)?;
        node.reconfigure(config)?;
        node.deploy_fresh()?;
        node.start().await
    }

    /// Stops every node. Crashed nodes are reported, not treated as failures.
    ///
    /// Fails only when every node that was running needed a forced kill.
    pub async fn stop_all(&mut self) -> Result<StopReport> {
        for node in self.nodes.values_mut() {
            node.refresh_status();
        }

        let stops = self.nodes.values_mut().map(|node| async move {
            let index = node.index();
            (index, node.stop().await)
        });

        let mut report = StopReport::default();
        for (index, outcome) in join_all(stops).await {
            report.record(index, outcome);
        }
        self.bootstrapped = false;

        for (index, code) in &report.crashed {
            warn!(node = index, ?code, "node had crashed before stop");
        }
        if report.attempted() > 0 && report.graceful.is_empty() {
            return Err(Error::StopFailure(Box::new(report)));
        }

        info!(
            graceful = report.graceful.len(),
            forced = report.forced.len(),
            crashed = report.crashed.len(),
            "cluster stopped"
        );
        Ok(report)
    }

    /// Starts a single node. Deploys it first if needed.
    pub async fn start_node(&mut self, index: usize) -> Result<()> {
        let node = self.node_mut(index)?;
        if !node.is_deployed() {
            node.deploy()?;
        }
        node.start().await
    }

    pub async fn stop_node(&mut self, index: usize) -> Result<StopOutcome> {
        Ok(self.node_mut(index)?.stop().await)
    }

    /// Kills a node without a termination signal, for crash injection.
    pub async fn kill_node(&mut self, index: usize) -> Result<()> {
        self.node_mut(index)?.force_kill().await
    }

    pub async fn restart_node(&mut self, index: usize) -> Result<()> {
        self.node_mut(index)?.restart().await
    }

    /// Changes a runtime setting on the connected node.
    pub async fn alter_runtime_setting(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_bootstrapped()?;
        Ok(self.admin.alter_runtime_setting(key, value).await?)
    }

    /// Cluster-assigned dnode id of node `index`, if it is a member.
    pub async fn dnode_id(&self, index: usize) -> Result<Option<u32>> {
        let endpoint = self.node(index)?.endpoint();
        Ok(self.admin.snapshot().await?.dnode_id(&endpoint))
    }

    pub async fn wait_for_dnode_count(&self, expected: usize) -> Result<ClusterSnapshot> {
        self.checker()
            .wait_for_dnode_count(expected, self.settings.convergence_timeout)
            .await
    }

    pub async fn wait_for_mnode_count(&self, expected: usize) -> Result<ClusterSnapshot> {
        self.checker()
            .wait_for_mnode_count(expected, self.settings.convergence_timeout)
            .await
    }

    /// Returns the status of all nodes, detecting crashes.
    pub fn status(&mut self) -> Vec<(usize, NodeStatus, u16)> {
        self.nodes
            .values_mut()
            .map(|node| (node.index(), node.refresh_status(), node.port()))
            .collect()
    }

    /// Returns the number of running nodes.
    pub fn running_count(&mut self) -> usize {
        self.status()
            .iter()
            .filter(|(_, status, _)| *status == NodeStatus::Running)
            .count()
    }

    /// Checker sharing this controller's admin client, poll interval and
    /// cancellation token.
    pub fn checker(&self) -> ClusterStateChecker {
        ClusterStateChecker::new(self.admin.clone())
            .with_poll_interval(self.settings.poll_interval)
            .with_cancellation(self.cancel.clone())
    }

    pub fn admin(&self) -> &Arc<dyn AdminClient> {
        &self.admin
    }

    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    pub fn launch(&self) -> &LaunchSpec {
        &self.launch
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn node(&self, index: usize) -> Result<&NodeProcess> {
        self.nodes.get(&index).ok_or(Error::NodeNotFound(index))
    }

    fn node_mut(&mut self, index: usize) -> Result<&mut NodeProcess> {
        self.nodes.get_mut(&index).ok_or(Error::NodeNotFound(index))
    }

    fn ensure_bootstrapped(&self) -> Result<()> {
        if self.bootstrapped {
            Ok(())
        } else {
            Err(Error::NotBootstrapped)
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Liveness;
    use crate::{SimulatedCluster, TopologySettings};
    use std::net::TcpListener;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Base port with `count` free ports spaced by `stride`.
    fn free_base_port(count: usize, stride: u16) -> u16 {
        'search: loop {
            let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
            let base = listener.local_addr().unwrap().port();
            drop(listener);
            if u32::from(base) + (count as u32) * u32::from(stride) > u32::from(u16::MAX) {
                continue;
            }
            for i in 0..count {
                if !crate::probe::port_is_free(base + i as u16 * stride) {
                    continue 'search;
                }
            }
            return base;
        }
    }

    fn sleeper() -> LaunchSpec {
        LaunchSpec {
            executable: PathBuf::from("sleep"),
            args: vec!["3600".to_string()],
            liveness: Liveness::Process,
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            ..LaunchSpec::default()
        }
    }

    fn fast_settings() -> ControllerSettings {
        ControllerSettings {
            bootstrap_timeout: Duration::from_millis(500),
            convergence_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            ..ControllerSettings::default()
        }
    }

    fn topology(temp: &TempDir, total: usize, mnodes: usize) -> ClusterTopology {
        let settings = TopologySettings {
            host: "127.0.0.1".to_string(),
            base_port: free_base_port(total, 10),
            port_stride: 10,
            deploy_root: temp.path().to_path_buf(),
            ..TopologySettings::default()
        };
        ClusterTopology::configure_with(settings, total, mnodes).unwrap()
    }

    fn controller(temp: &TempDir, total: usize) -> (ClusterController, SimulatedCluster) {
        let topology = topology(temp, total, 1);
        let sim = SimulatedCluster::bootstrapped(topology.first_node().endpoint());
        let controller = ClusterController::new(topology, sleeper(), Arc::new(sim.clone()))
            .with_settings(fast_settings());
        (controller, sim)
    }

    async fn running_cluster(temp: &TempDir, total: usize) -> (ClusterController, SimulatedCluster) {
        let (mut controller, sim) = controller(temp, total);
        controller.deploy_all().unwrap();
        controller.start_sequential().await.unwrap();
        (controller, sim)
    }

    #[tokio::test]
    async fn test_controller_creation() {
        let temp = TempDir::new().unwrap();
        let (mut controller, _) = controller(&temp, 3);

        let status = controller.status();
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|(_, s, _)| *s == NodeStatus::Stopped));
        assert!(!controller.is_bootstrapped());
    }

    #[tokio::test]
    async fn test_five_node_cluster_converges() {
        let temp = TempDir::new().unwrap();
        let (mut controller, _sim) = running_cluster(&temp, 5).await;

        assert_eq!(controller.running_count(), 5);
        controller.wait_for_dnode_count(5).await.unwrap();
        controller.wait_for_mnode_count(1).await.unwrap();
        assert!(temp.path().join("cluster.toml").exists());

        controller.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_parallel_start_mode() {
        let temp = TempDir::new().unwrap();
        let (controller, _sim) = controller(&temp, 4);
        let mut controller = controller.with_settings(ControllerSettings {
            start_mode: StartMode::Parallel,
            ..fast_settings()
        });

        controller.deploy_all().unwrap();
        controller.start_sequential().await.unwrap();
        assert_eq!(controller.running_count(), 4);
        controller.wait_for_dnode_count(4).await.unwrap();

        controller.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_register_limit() {
        let temp = TempDir::new().unwrap();
        let (controller, _sim) = controller(&temp, 4);
        let mut controller = controller.with_settings(ControllerSettings {
            register_limit: Some(2),
            ..fast_settings()
        });

        controller.deploy_all().unwrap();
        controller.start_sequential().await.unwrap();
        controller.wait_for_dnode_count(2).await.unwrap();

        controller.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_failure_starts_nothing_else() {
        let temp = TempDir::new().unwrap();
        let (mut controller, sim) = controller(&temp, 3);
        sim.set_available(false);

        controller.deploy_all().unwrap();
        let err = controller.start_sequential().await.unwrap_err();

        assert!(matches!(err, Error::ClusterBootstrapFailure { node: 1, .. }));
        assert!(err.is_fatal());
        assert_eq!(controller.running_count(), 1);
        assert!(sim.journal().is_empty());

        controller.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_admin_commands_require_bootstrap() {
        let temp = TempDir::new().unwrap();
        let (mut controller, sim) = controller(&temp, 3);

        assert!(matches!(
            controller.create_mnode(2).await,
            Err(Error::NotBootstrapped)
        ));
        assert!(matches!(
            controller.replace_node(2, "127.0.0.1:1").await,
            Err(Error::NotBootstrapped)
        ));
        assert!(sim.journal().is_empty());
    }

    #[tokio::test]
    async fn test_create_mnode_twice() {
        let temp = TempDir::new().unwrap();
        let (mut controller, sim) = running_cluster(&temp, 5).await;

        controller.create_mnode(2).await.unwrap();
        controller.wait_for_mnode_count(2).await.unwrap();

        let err = controller.create_mnode(2).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateMnode { node: 2, dnode_id: 2 }));
        assert!(!err.is_fatal());
        controller.wait_for_mnode_count(2).await.unwrap();

        let creates = sim
            .journal()
            .iter()
            .filter(|c| c.starts_with("create mnode"))
            .count();
        assert_eq!(creates, 1);

        controller.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_mnode_on_stopped_node() {
        let temp = TempDir::new().unwrap();
        let (mut controller, _sim) = running_cluster(&temp, 3).await;

        controller.stop_node(3).await.unwrap();
        assert!(matches!(
            controller.create_mnode(3).await,
            Err(Error::NodeNotRunning(3))
        ));

        controller.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_promote_mnodes() {
        let temp = TempDir::new().unwrap();
        let topology = topology(&temp, 5, 3);
        let sim = SimulatedCluster::bootstrapped(topology.first_node().endpoint());
        let mut controller = ClusterController::new(topology, sleeper(), Arc::new(sim.clone()))
            .with_settings(fast_settings());

        controller.deploy_all().unwrap();
        controller.start_sequential().await.unwrap();
        let snapshot = controller.promote_mnodes().await.unwrap();

        assert!(snapshot.has_mnode_count(3));
        // Second pass finds nothing to do.
        controller.promote_mnodes().await.unwrap();
        assert_eq!(
            sim.journal().iter().filter(|c| c.starts_with("create mnode")).count(),
            2
        );

        controller.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_node_restores_count() {
        let temp = TempDir::new().unwrap();
        let (mut controller, sim) = running_cluster(&temp, 5).await;
        let old_endpoint = controller.node(2).unwrap().endpoint();
        let new_endpoint = format!("127.0.0.1:{}", free_base_port(1, 1));

        controller.replace_node(2, &new_endpoint).await.unwrap();

        let snapshot = controller.wait_for_dnode_count(5).await.unwrap();
        assert!(!snapshot.contains_endpoint(&old_endpoint));
        assert!(snapshot.contains_endpoint(&new_endpoint));
        assert_eq!(controller.dnode_id(2).await.unwrap(), Some(6));
        assert_eq!(controller.node(2).unwrap().status, NodeStatus::Running);
        assert_eq!(controller.topology().node(2).unwrap().endpoint(), new_endpoint);

        let journal = sim.journal();
        let drop_at = journal.iter().position(|c| c == "drop dnode 2").unwrap();
        let add_at = journal
            .iter()
            .position(|c| c == &format!("create dnode \"{new_endpoint}\""))
            .unwrap();
        assert!(drop_at < add_at);

        controller.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_reports_failed_step() {
        let temp = TempDir::new().unwrap();
        let (mut controller, sim) = running_cluster(&temp, 3).await;
        let new_endpoint = format!("127.0.0.1:{}", free_base_port(1, 1));

        sim.reject_next("dnode is busy");
        let err = controller.replace_node(2, &new_endpoint).await.unwrap_err();

        assert!(matches!(
            err,
            Error::ReplaceFailed {
                node: 2,
                step: ReplaceStep::Drop,
                ..
            }
        ));
        // The stop step is not rolled back.
        assert_eq!(controller.node(2).unwrap().status, NodeStatus::Stopped);

        controller.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_rejects_colliding_endpoint() {
        let temp = TempDir::new().unwrap();
        let (mut controller, sim) = running_cluster(&temp, 3).await;
        let taken = controller.node(3).unwrap().endpoint();
        let journal_before = sim.journal().len();

        let err = controller.replace_node(2, &taken).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTopology(_)));
        assert_eq!(controller.node(2).unwrap().status, NodeStatus::Running);
        assert_eq!(sim.journal().len(), journal_before);

        controller.stop_all().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_all_reports_crashed_node() {
        let temp = TempDir::new().unwrap();
        let (mut controller, _sim) = running_cluster(&temp, 3).await;

        let pid = controller.node(3).unwrap().pid().unwrap();
        std::process::Command::new("kill")
            .args(["-KILL", &pid.to_string()])
            .status()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let report = controller.stop_all().await.unwrap();
        assert_eq!(report.graceful, vec![1, 2]);
        assert_eq!(report.crashed.len(), 1);
        assert_eq!(report.crashed[0].0, 3);
        assert_eq!(controller.running_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_forced_stop_keeps_crashed_nodes_in_report() {
        let temp = TempDir::new().unwrap();
        let topology = topology(&temp, 2, 1);
        let sim = SimulatedCluster::bootstrapped(topology.first_node().endpoint());
        let launch = LaunchSpec {
            executable: PathBuf::from("sh"),
            args: vec![
                "-c".into(),
                "trap '' TERM; while :; do sleep 0.1; done".into(),
            ],
            stop_timeout: Duration::from_millis(300),
            ..sleeper()
        };
        let mut controller = ClusterController::new(topology, launch, Arc::new(sim))
            .with_settings(fast_settings());
        controller.deploy_all().unwrap();
        controller.start_sequential().await.unwrap();

        let pid = controller.node(2).unwrap().pid().unwrap();
        std::process::Command::new("kill")
            .args(["-KILL", &pid.to_string()])
            .status()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = controller.stop_all().await.unwrap_err();
        let report = err.stop_report().unwrap();
        assert_eq!(report.forced, vec![1]);
        assert_eq!(report.crashed.len(), 1);
        assert_eq!(report.crashed[0].0, 2);
        assert!(err.to_string().contains("crashed"));
        assert_eq!(controller.running_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_all_on_stopped_cluster() {
        let temp = TempDir::new().unwrap();
        let (mut controller, _) = controller(&temp, 2);

        let report = controller.stop_all().await.unwrap();
        assert_eq!(report.already_stopped, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_redeploy_reproduces_endpoints() {
        let temp = TempDir::new().unwrap();
        let (mut controller, _sim) = running_cluster(&temp, 3).await;
        let before = controller.topology().endpoints();
        let rendered = std::fs::read_to_string(controller.node(2).unwrap().config_path()).unwrap();

        controller.stop_all().await.unwrap();
        controller.deploy_all().unwrap();

        assert_eq!(controller.topology().endpoints(), before);
        let again = std::fs::read_to_string(controller.node(2).unwrap().config_path()).unwrap();
        assert_eq!(rendered, again);
        assert_eq!(ClusterTopology::load(temp.path()).unwrap().endpoints(), before);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_bootstrap_start() {
        let temp = TempDir::new().unwrap();
        let topology = topology(&temp, 2, 1);
        let sim = SimulatedCluster::bootstrapped(topology.first_node().endpoint());
        let launch = LaunchSpec {
            liveness: Liveness::Tcp,
            start_timeout: Duration::from_secs(30),
            ..sleeper()
        };
        let token = CancellationToken::new();
        let mut controller = ClusterController::new(topology, launch, Arc::new(sim.clone()))
            .with_settings(fast_settings())
            .with_cancellation(token.clone());
        controller.deploy_all().unwrap();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        assert!(matches!(
            controller.start_sequential().await,
            Err(Error::Cancelled)
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!controller.is_bootstrapped());
        assert_eq!(controller.node(2).unwrap().status, NodeStatus::Stopped);

        controller.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_controller_stops_waiting() {
        let temp = TempDir::new().unwrap();
        let (controller, _sim) = controller(&temp, 2);
        let token = CancellationToken::new();
        let mut controller = controller.with_cancellation(token.clone());
        controller.deploy_all().unwrap();
        controller.start_sequential().await.unwrap();

        token.cancel();
        assert!(matches!(
            controller.wait_for_dnode_count(9).await,
            Err(Error::Cancelled)
        ));
        controller.stop_all().await.unwrap();
    }
}
