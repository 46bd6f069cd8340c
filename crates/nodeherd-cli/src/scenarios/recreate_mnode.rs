//! Five dnodes, three mnodes: recreate a dnode that holds an mnode and make
//! sure the metadata group is rebuilt on its replacement.

use anyhow::{Context, Result, bail, ensure};
use async_trait::async_trait;
use nodeherd_cluster::Error as ClusterError;
use tracing::info;

use super::{Requirements, Scenario, ScenarioContext};

const USER: &str = "user1";
const PASSWORD: &str = "123";

pub struct RecreateMnode;

#[async_trait]
impl Scenario for RecreateMnode {
    fn name(&self) -> &'static str {
        "recreate-mnode"
    }

    fn description(&self) -> &'static str {
        "promote mnodes on dnodes 2 and 3, recreate dnode 2, restore three mnodes"
    }

    fn requirements(&self) -> Requirements {
        Requirements { min_dnodes: 5 }
    }

    async fn run(&self, cx: &mut ScenarioContext<'_>) -> Result<()> {
        let dnodes = cx.cluster.topology().total_nodes;

        info!("checking initial membership");
        let snapshot = cx.cluster.wait_for_dnode_count(dnodes).await?;
        let mut by_id = snapshot.dnodes.clone();
        by_id.sort_by_key(|d| d.id);
        for (position, index) in [(0, 1), (4, 5)] {
            let expected = cx.cluster.node(index)?.endpoint();
            ensure!(
                by_id.get(position).map(|d| d.endpoint.as_str()) == Some(expected.as_str()),
                "dnode row {position} should be {expected}"
            );
        }
        cx.cluster.wait_for_mnode_count(1).await?;

        info!("adding mnodes on nodes 2 and 3");
        for (index, count) in [(2, 2), (3, 3)] {
            cx.checkpoint()?;
            cx.cluster
                .create_mnode(index)
                .await
                .with_context(|| format!("create mnode on node {index}"))?;
            cx.cluster.wait_for_mnode_count(count).await?;
        }

        match cx.cluster.create_mnode(2).await {
            Err(ClusterError::DuplicateMnode { .. }) => {}
            Err(e) => return Err(e).context("second create mnode on node 2"),
            Ok(()) => bail!("creating a second mnode on node 2 was accepted"),
        }
        cx.cluster.wait_for_dnode_count(dnodes).await?;

        info!("recreating node 2");
        cx.checkpoint()?;
        let endpoint = cx.cluster.node(2)?.endpoint();
        cx.cluster.replace_node(2, &endpoint).await?;
        cx.cluster.wait_for_dnode_count(dnodes).await?;

        cx.cluster
            .create_mnode(2)
            .await
            .context("create mnode on recreated node 2")?;

        let first_id = cx
            .cluster
            .dnode_id(1)
            .await?
            .context("first node is not a member")?;
        if cx.cluster.admin().drop_dnode(first_id).await.is_ok() {
            bail!("dropping the leader's dnode {first_id} was accepted");
        }

        cx.cluster.wait_for_mnode_count(3).await?;

        cx.cluster.admin().create_user(USER, PASSWORD).await?;
        let users = cx.cluster.admin().list_users().await?;
        ensure!(
            users.iter().any(|u| u == USER),
            "user {USER} missing from {users:?}"
        );

        info!("mnode group rebuilt on recreated node");
        Ok(())
    }
}
