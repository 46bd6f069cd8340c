//! Stop command - terminates nodes left behind by an earlier run.
//!
//! Works from the manifest and pid files only, so it needs no running
//! harness. A recorded pid is only signalled while it still runs the node
//! executable.

use anyhow::{Context, Result};
use nodeherd_cluster::{ClusterTopology, node, recorded_pids};
use std::path::Path;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::style;

const POLL: Duration = Duration::from_millis(100);

pub async fn run(deploy_root: &Path, grace: Duration, executable: &Path) -> Result<()> {
    let topology = ClusterTopology::load(deploy_root)
        .with_context(|| format!("No cluster deployed at {}", deploy_root.display()))?;
    let pids = recorded_pids(deploy_root)?;

    if pids.is_empty() {
        style::print_success("no running nodes recorded");
        return Ok(());
    }

    for (index, pid) in pids {
        match stop_pid(pid, grace, executable).await {
            Outcome::Gone => style::print_success(&format!("dnode{index} (pid {pid}) was not running")),
            Outcome::Foreign => {
                warn!(node = index, pid, executable = %executable.display(), "pid reused, not signalled");
                style::print_warn(&format!(
                    "dnode{index}: pid {pid} is not a node process ({}), left alone",
                    executable.display()
                ));
            }
            Outcome::Terminated => style::print_success(&format!("dnode{index} (pid {pid}) stopped")),
            Outcome::Killed => style::print_warn(&format!("dnode{index} (pid {pid}) killed after {grace:?}")),
        }

        if let Some(config) = topology.node(index) {
            let path = node::pid_path(&config.cfg_dir);
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(node = index, "could not remove {}: {e}", path.display());
            }
        }
    }
    Ok(())
}

enum Outcome {
    Gone,
    Foreign,
    Terminated,
    Killed,
}

async fn stop_pid(pid: u32, grace: Duration, executable: &Path) -> Outcome {
    if !node::pid_alive(pid).await {
        return Outcome::Gone;
    }
    if !node::pid_runs(pid, executable).await {
        return Outcome::Foreign;
    }
    node::signal_term(pid).await;

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !node::pid_alive(pid).await {
            return Outcome::Terminated;
        }
        sleep(POLL).await;
    }

    node::signal_pid(pid, "KILL").await;
    Outcome::Killed
}
