//! Status command - probes every node of a deployed cluster.

use anyhow::{Context, Result};
use comfy_table::Cell;
use nodeherd_cluster::{ClusterTopology, node, probe, recorded_pids};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::style::{self, StatusCell, colors::SemanticStyle};

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

pub async fn run(deploy_root: &Path) -> Result<()> {
    let topology = ClusterTopology::load(deploy_root).with_context(|| {
        format!(
            "No cluster deployed at {}. Run: {}",
            deploy_root.display(),
            "nodeherd run -p <path>".code()
        )
    })?;
    let pids: BTreeMap<usize, u32> = recorded_pids(deploy_root)?.into_iter().collect();

    let mut table = style::styled_table(&["Node", "Endpoint", "Role", "Pid", "Port", "Process"]);
    let mut reachable = 0;

    for config in &topology.nodes {
        let open = probe::port_accepts(&config.host, config.port, PROBE_TIMEOUT).await;
        if open {
            reachable += 1;
        }

        let (pid_text, alive) = match pids.get(&config.index) {
            Some(&pid) => (pid.to_string(), node::pid_alive(pid).await),
            None => ("-".to_string(), false),
        };

        table.add_row(vec![
            Cell::new(format!("dnode{}", config.index)),
            Cell::new(config.endpoint()),
            Cell::new(format!("{:?}", config.role)),
            Cell::new(pid_text),
            style::status_cell(&StatusCell {
                text: if open { "open" } else { "closed" },
                healthy: open,
            }),
            style::status_cell(&StatusCell {
                text: if alive { "alive" } else { "gone" },
                healthy: alive,
            }),
        ]);
    }

    println!("{table}");
    println!(
        "Nodes: {reachable}/{} accepting connections",
        topology.total_nodes
    );
    Ok(())
}
