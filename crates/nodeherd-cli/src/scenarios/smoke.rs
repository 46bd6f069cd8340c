use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use nodeherd_cluster::NodeStatus;
use tracing::info;

use super::{Scenario, ScenarioContext};

/// Checks that every registered dnode is ready and the metadata group has a
/// single leader.
pub struct Smoke;

#[async_trait]
impl Scenario for Smoke {
    fn name(&self) -> &'static str {
        "smoke"
    }

    fn description(&self) -> &'static str {
        "registered dnodes are ready and the mnode group has one leader"
    }

    async fn run(&self, cx: &mut ScenarioContext<'_>) -> Result<()> {
        let expected = cx.registered_dnodes();
        let snapshot = cx
            .cluster
            .wait_for_dnode_count(expected)
            .await
            .context("dnodes did not become ready")?;

        for config in cx.cluster.topology().nodes.iter().take(expected) {
            ensure!(
                snapshot.contains_endpoint(&config.endpoint()),
                "node {} ({}) is missing from the dnode list",
                config.index,
                config.endpoint()
            );
        }

        let mnodes = snapshot.mnodes.len().max(1);
        let snapshot = cx
            .cluster
            .wait_for_mnode_count(mnodes)
            .await
            .context("mnode group did not settle")?;

        info!(dnodes = snapshot.dnodes.len(), mnodes = snapshot.mnodes.len(), "smoke check passed");
        Ok(())
    }
}

/// Runs after the cluster was stopped and only the first node restarted.
pub struct SmokeAfterRestart;

#[async_trait]
impl Scenario for SmokeAfterRestart {
    fn name(&self) -> &'static str {
        "smoke-restart"
    }

    fn description(&self) -> &'static str {
        "first node serves membership queries again after a restart"
    }

    async fn run(&self, cx: &mut ScenarioContext<'_>) -> Result<()> {
        let first = cx.cluster.topology().first_node().clone();
        let status = cx.cluster.node(first.index)?.status;
        ensure!(
            status == NodeStatus::Running,
            "first node is {status:?} after restart"
        );

        let endpoint = first.endpoint();
        let within = cx.cluster.settings().convergence_timeout;
        let snapshot = cx
            .cluster
            .checker()
            .wait_for("first dnode after restart", 1, within, |s| {
                s.dnodes
                    .iter()
                    .any(|d| d.endpoint == endpoint && d.is_ready())
            })
            .await?;

        ensure!(
            snapshot.leader_count() == 1,
            "expected one mnode leader after restart, found {}",
            snapshot.leader_count()
        );
        info!(endpoint, "first node answered after restart");
        Ok(())
    }
}
