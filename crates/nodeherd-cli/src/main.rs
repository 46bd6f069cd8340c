//! nodeherd test runner.
//!
//! Deploys a local multi-node database cluster, runs scenarios against it and
//! tears it down again.
//!
//! # Quick Start
//!
//! ```bash
//! # Five dnodes, recreate-mnode scenario
//! nodeherd run -N 5 -M 3 -f recreate-mnode
//!
//! # Dry run against the in-memory cluster
//! nodeherd run --backend sim --executable sleep -f smoke
//!
//! # Clean up nodes left behind by an aborted run
//! nodeherd stop -p ./sim
//! ```

mod commands;
mod scenarios;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use nodeherd_config::{AdminBackend, HarnessConfig, LivenessMode};
use std::path::PathBuf;
use std::time::Duration;

use commands::run::RunOptions;

/// nodeherd - local database clusters for integration tests.
#[derive(Parser)]
#[command(name = "nodeherd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding nodeherd.toml (defaults to the current directory).
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Deploy a cluster and run scenarios against it.
    Run(RunArgs),

    /// Stop nodes recorded under a deploy root.
    Stop {
        /// Deploy root of the cluster.
        #[arg(short, long, default_value = "sim")]
        path: PathBuf,

        /// Seconds to wait after SIGTERM before killing.
        #[arg(long, default_value = "10")]
        grace: u64,

        /// Server executable recorded pids must still run (defaults to the
        /// configured one).
        #[arg(long)]
        executable: Option<PathBuf>,
    },

    /// Show the nodes of a deployed cluster.
    Status {
        /// Deploy root of the cluster.
        #[arg(short, long, default_value = "sim")]
        path: PathBuf,
    },

    /// List registered scenarios.
    Scenarios,

    /// Show the merged configuration.
    Config {
        /// Output format (text, json, toml).
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Scenario to run, or "all".
    #[arg(short, long, default_value = "all")]
    file: String,

    /// Deploy root.
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Host nodes bind to: a name, or a JSON object with a "host" key.
    #[arg(short, long)]
    master: Option<String>,

    /// Number of dnodes.
    #[arg(short = 'N', long)]
    dnode_nums: Option<usize>,

    /// Number of mnode candidates.
    #[arg(short = 'M', long)]
    mnode_nums: Option<usize>,

    /// Number of nodes registered as dnodes at startup.
    #[arg(short = 'C', long)]
    create_dnode_nums: Option<usize>,

    /// Query policy set on the connected node.
    #[arg(short = 'Q', long, value_parser = clap::value_parser!(u8).range(1..=4))]
    query_policy: Option<u8>,

    /// Base64 of a JSON object with extra node config entries.
    #[arg(short = 'd', long)]
    update_cfg_dict: Option<String>,

    /// Log every administrative SQL statement.
    #[arg(short, long)]
    log_sql: bool,

    /// Restart the first node and run the scenario's restart variant.
    #[arg(short, long)]
    restart: bool,

    /// Server executable.
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Administrative interface.
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Convergence timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Port of the first node.
    #[arg(long)]
    base_port: Option<u16>,

    /// How nodes prove they are up.
    #[arg(long, value_enum)]
    liveness: Option<Probe>,

    /// Start non-first nodes concurrently.
    #[arg(long)]
    parallel: bool,

    /// Create mnodes on every mnode candidate before running scenarios.
    #[arg(long)]
    promote: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Rest,
    Sim,
}

#[derive(Clone, Copy, ValueEnum)]
enum Probe {
    Tcp,
    Process,
}

impl From<RunArgs> for RunOptions {
    fn from(args: RunArgs) -> Self {
        Self {
            file: args.file,
            path: args.path,
            master: args.master,
            dnodes: args.dnode_nums,
            mnodes: args.mnode_nums,
            create_dnodes: args.create_dnode_nums,
            query_policy: args.query_policy,
            update_cfg_dict: args.update_cfg_dict,
            log_sql: args.log_sql,
            restart: args.restart,
            executable: args.executable,
            backend: args.backend.map(|b| match b {
                Backend::Rest => AdminBackend::Rest,
                Backend::Sim => AdminBackend::Sim,
            }),
            timeout: args.timeout,
            base_port: args.base_port,
            liveness: args.liveness.map(|p| match p {
                Probe::Tcp => LivenessMode::Tcp,
                Probe::Process => LivenessMode::Process,
            }),
            parallel: args.parallel,
            promote: args.promote,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    style::set_no_color(cli.no_color || std::env::var_os("NO_COLOR").is_some());

    if let Err(e) = dispatch(cli).await {
        report(&e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let project = match cli.project {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Run(args) => commands::run::run(&project, args.into()).await,
        Commands::Stop {
            path,
            grace,
            executable,
        } => {
            let executable = match executable {
                Some(executable) => executable,
                None => HarnessConfig::load_from_dir(&project)?.deploy.executable,
            };
            commands::stop::run(&project.join(path), Duration::from_secs(grace), &executable).await
        }
        Commands::Status { path } => commands::status::run(&project.join(path)).await,
        Commands::Scenarios => {
            commands::scenarios::run();
            Ok(())
        }
        Commands::Config { format } => commands::config::show(&project, &format),
    }
}

/// Prints the failure chain and, for convergence failures, the last cluster
/// state that was observed.
fn report(error: &anyhow::Error) {
    style::print_error(&format!("{error:#}"));

    let Some(cause) = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<nodeherd_cluster::Error>())
    else {
        return;
    };
    if let Some(snapshot) = cause.last_snapshot() {
        eprintln!("last observed cluster state:");
        eprintln!("{snapshot}");
    }
    if cause.is_fatal() {
        style::print_hint("node logs are under <deploy root>/dnode<N>/log");
    }
}
