//! Run command - deploys a cluster, runs scenarios against it, tears it down.

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use nodeherd_cluster::{
    AdminClient, ClusterController, ClusterTopology, ControllerSettings, LaunchSpec, Liveness,
    RestExecutor, SimulatedCluster, SqlAdminClient, StartMode, StopReport, TopologySettings,
};
use nodeherd_config::{AdminBackend, ConfigLoader, HarnessConfig, LivenessMode};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::scenarios::{self, Scenario, ScenarioContext, ScenarioRegistry};
use crate::style::{self, colors::SemanticStyle};

/// Runtime setting changed by `-Q`.
const QUERY_POLICY: &str = "queryPolicy";

/// Flags of the `run` subcommand. Unset flags fall back to the loaded
/// configuration.
#[derive(Debug, Default)]
pub struct RunOptions {
    pub file: String,
    pub path: Option<PathBuf>,
    pub master: Option<String>,
    pub dnodes: Option<usize>,
    pub mnodes: Option<usize>,
    pub create_dnodes: Option<usize>,
    pub query_policy: Option<u8>,
    pub update_cfg_dict: Option<String>,
    pub log_sql: bool,
    pub restart: bool,
    pub executable: Option<PathBuf>,
    pub backend: Option<AdminBackend>,
    pub timeout: Option<u64>,
    pub base_port: Option<u16>,
    pub liveness: Option<LivenessMode>,
    pub parallel: bool,
    pub promote: bool,
}

pub async fn run(project: &Path, options: RunOptions) -> Result<()> {
    let mut config = ConfigLoader::new()
        .with_project_dir(project)
        .load()
        .context("Failed to load configuration")?;
    apply_options(&mut config, &options, project)?;
    config.validate()?;

    let registry = ScenarioRegistry::builtin();
    let selected = runnable(&registry, &options.file, config.cluster.dnodes)?;

    let topology = topology(&config)?;
    let admin = admin_client(&config, &topology)?;
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let mut cluster = ClusterController::new(topology, launch_spec(&config), admin)
        .with_settings(controller_settings(&config))
        .with_cancellation(cancel.clone());

    style::print_phase("deploy");
    print_topology(cluster.topology());

    let outcome = drive(&mut cluster, &registry, &selected, &options, cancel).await;

    style::print_phase("teardown");
    match cluster.stop_all().await {
        Ok(report) => {
            style::print_success(&format!(
                "{} graceful, {} forced, {} crashed, {} already stopped",
                report.graceful.len(),
                report.forced.len(),
                report.crashed.len(),
                report.already_stopped.len()
            ));
            print_crashed(&report);
        }
        Err(e) => {
            style::print_error(&format!("teardown: {e}"));
            if let Some(report) = e.stop_report() {
                print_crashed(report);
            }
            if outcome.is_ok() {
                return Err(e).context("phase teardown");
            }
        }
    }

    outcome
}

fn print_crashed(report: &StopReport) {
    for (index, code) in &report.crashed {
        style::print_warn(&format!("node {index} had crashed (exit code {code:?})"));
    }
}

async fn drive(
    cluster: &mut ClusterController,
    registry: &ScenarioRegistry,
    selected: &[Box<dyn Scenario>],
    options: &RunOptions,
    cancel: CancellationToken,
) -> Result<()> {
    cluster.deploy_all().context("phase deploy")?;

    style::print_phase("start");
    cluster.start_sequential().await.context("phase start")?;
    let expected = cluster
        .settings()
        .register_limit
        .unwrap_or(cluster.topology().total_nodes);
    cluster
        .wait_for_dnode_count(expected)
        .await
        .context("phase start: dnodes not ready")?;
    style::print_success(&format!("{expected} dnodes ready"));

    if options.promote {
        let snapshot = cluster.promote_mnodes().await.context("phase promote")?;
        style::print_success(&format!("{} mnodes ready", snapshot.mnodes.len()));
    }

    if let Some(policy) = options.query_policy.filter(|&p| p != 1) {
        apply_query_policy(cluster, policy)
            .await
            .context("phase query policy")?;
    }

    for scenario in selected {
        run_scenario(cluster, scenario.as_ref(), &cancel).await?;
    }

    if options.restart {
        restart_and_verify(cluster, registry, &options.file, &cancel).await?;
    }
    Ok(())
}

async fn run_scenario(
    cluster: &mut ClusterController,
    scenario: &dyn Scenario,
    cancel: &CancellationToken,
) -> Result<()> {
    style::print_phase(&format!("scenario {}", scenario.name()));
    let mut cx = ScenarioContext {
        cluster,
        cancel: cancel.clone(),
    };
    scenario
        .run(&mut cx)
        .await
        .with_context(|| format!("phase scenario {}", scenario.name()))?;
    style::print_success(&format!("{} passed", scenario.name()));
    Ok(())
}

/// Stops the cluster, restarts only the first node and runs the selected
/// scenario's restart variant.
async fn restart_and_verify(
    cluster: &mut ClusterController,
    registry: &ScenarioRegistry,
    selector: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    if selector == scenarios::ALL {
        info!("restart check skipped when running all scenarios");
        return Ok(());
    }
    let Some(variant) = registry.restart_variant(selector) else {
        info!(scenario = selector, "no restart variant registered");
        return Ok(());
    };

    style::print_phase("restart");
    cluster.stop_all().await.context("phase restart")?;
    let first = cluster.topology().first_node().index;
    cluster.start_node(first).await.context("phase restart")?;

    run_scenario(cluster, variant.as_ref(), cancel).await
}

/// Policies other than 1 route queries to a query node, so one is created on
/// the first node before the policy changes.
async fn apply_query_policy(cluster: &ClusterController, policy: u8) -> Result<()> {
    let first = cluster.topology().first_node().index;
    let dnode_id = cluster
        .dnode_id(first)
        .await?
        .context("first node is not a registered dnode")?;
    if cluster.admin().list_qnodes().await?.contains(&dnode_id) {
        info!(dnode_id, "qnode already present");
    } else {
        cluster.admin().create_qnode(dnode_id).await?;
        style::print_success(&format!("qnode created on dnode {dnode_id}"));
    }

    let value = policy.to_string();
    cluster.alter_runtime_setting(QUERY_POLICY, &value).await?;

    let current = cluster.admin().runtime_setting(QUERY_POLICY).await?;
    if current.as_deref() != Some(value.as_str()) {
        bail!("{QUERY_POLICY} is {current:?} after setting it to {value}");
    }
    style::print_success(&format!("{QUERY_POLICY} set to {value}"));
    Ok(())
}

/// Scenarios selected by `-f` that the requested cluster can run.
///
/// An explicitly named scenario that needs more dnodes is an error; with
/// `all` such scenarios are skipped.
fn runnable(
    registry: &ScenarioRegistry,
    selector: &str,
    dnodes: usize,
) -> Result<Vec<Box<dyn Scenario>>> {
    let mut selected = registry.select(selector)?;
    if selector != scenarios::ALL {
        if let Some(scenario) = selected.first() {
            let needed = scenario.requirements().min_dnodes;
            if needed > dnodes {
                bail!(
                    "scenario {} needs at least {needed} dnodes, got {dnodes} (use -N)",
                    scenario.name()
                );
            }
        }
        return Ok(selected);
    }

    selected.retain(|scenario| {
        let needed = scenario.requirements().min_dnodes;
        if needed > dnodes {
            warn!(scenario = scenario.name(), needed, dnodes, "skipping scenario");
            style::print_warn(&format!(
                "skipping {} (needs {needed} dnodes)",
                scenario.name().code()
            ));
            false
        } else {
            true
        }
    });
    Ok(selected)
}

fn apply_options(config: &mut HarnessConfig, options: &RunOptions, project: &Path) -> Result<()> {
    if let Some(path) = &options.path {
        config.deploy.root.clone_from(path);
        config.resolve_paths(project);
    }
    if let Some(master) = &options.master {
        config.cluster.host = parse_master(master)?;
    }
    if let Some(n) = options.dnodes {
        config.cluster.dnodes = n;
    }
    if let Some(n) = options.mnodes {
        config.cluster.mnodes = n;
    }
    if let Some(n) = options.create_dnodes {
        config.cluster.create_dnodes = Some(n);
    }
    if let Some(raw) = &options.update_cfg_dict {
        config.overrides.extend(decode_cfg_dict(raw)?);
    }
    if let Some(executable) = &options.executable {
        config.deploy.executable.clone_from(executable);
    }
    if let Some(backend) = options.backend {
        config.admin.backend = backend;
    }
    if let Some(secs) = options.timeout {
        config.timeouts.convergence_secs = secs;
    }
    if let Some(port) = options.base_port {
        config.cluster.base_port = port;
    }
    if let Some(liveness) = options.liveness {
        config.deploy.liveness = liveness;
    }
    config.admin.log_sql |= options.log_sql;
    config.cluster.parallel_start |= options.parallel;
    Ok(())
}

/// Accepts a bare host or a JSON object with a `host` key.
pub fn parse_master(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') {
        return Ok(trimmed.to_string());
    }
    let value: serde_json::Value =
        serde_json::from_str(trimmed).context("Invalid master description")?;
    value
        .get("host")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .context("master description has no \"host\" string")
}

/// Decodes `-d`: base64 of a JSON object whose entries become config file
/// lines. Non-string values are written in their JSON form.
pub fn decode_cfg_dict(raw: &str) -> Result<BTreeMap<String, String>> {
    let bytes = STANDARD
        .decode(raw.trim())
        .context("config overrides are not valid base64")?;
    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&bytes).context("config overrides are not a JSON object")?;

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

fn topology(config: &HarnessConfig) -> Result<ClusterTopology> {
    let settings = TopologySettings {
        host: config.cluster.host.clone(),
        base_port: config.cluster.base_port,
        port_stride: config.cluster.port_stride,
        deploy_root: config.deploy.root.clone(),
        overrides: config.overrides.clone(),
    };
    Ok(ClusterTopology::configure_with(
        settings,
        config.cluster.dnodes,
        config.cluster.mnodes,
    )?)
}

fn launch_spec(config: &HarnessConfig) -> LaunchSpec {
    LaunchSpec {
        executable: config.deploy.executable.clone(),
        args: config.deploy.args.clone(),
        config_file: config.deploy.config_file.clone(),
        liveness: match config.deploy.liveness {
            LivenessMode::Tcp => Liveness::Tcp,
            LivenessMode::Process => Liveness::Process,
        },
        start_timeout: config.timeouts.start(),
        stop_timeout: config.timeouts.stop(),
        check_port: true,
    }
}

fn controller_settings(config: &HarnessConfig) -> ControllerSettings {
    ControllerSettings {
        bootstrap_timeout: config.timeouts.bootstrap(),
        convergence_timeout: config.timeouts.convergence(),
        poll_interval: config.timeouts.poll_interval(),
        start_mode: if config.cluster.parallel_start {
            StartMode::Parallel
        } else {
            StartMode::Sequential
        },
        // `-C 1` registers every node, as 0 and unset do.
        register_limit: config.cluster.create_dnodes.filter(|&n| n > 1),
    }
}

fn admin_client(config: &HarnessConfig, topology: &ClusterTopology) -> Result<Arc<dyn AdminClient>> {
    let first = topology.first_node();
    match config.admin.backend {
        AdminBackend::Sim => {
            info!("using simulated admin interface");
            Ok(Arc::new(SimulatedCluster::bootstrapped(first.endpoint())))
        }
        AdminBackend::Rest => {
            let executor = RestExecutor::new(
                &first.host,
                config.admin.rest_port,
                config.admin.request_timeout(),
            )?
            .with_credentials(&config.admin.user, &config.admin.password);
            Ok(Arc::new(
                SqlAdminClient::new(executor).with_sql_logging(config.admin.log_sql),
            ))
        }
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            cancel.cancel();
        }
    });
}

fn print_topology(topology: &ClusterTopology) {
    style::print_labeled("Deploy root", &topology.settings.deploy_root.display().to_string());
    style::print_labeled("Nodes", &topology.total_nodes.to_string());
    style::print_labeled("Mnode target", &topology.mnode_target.to_string());
    for node in &topology.nodes {
        println!(
            "  dnode{} → {} {}",
            node.index,
            node.endpoint(),
            format!("{:?}", node.role).muted()
        );
    }
}
