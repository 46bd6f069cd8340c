//! Shows the merged harness configuration.

use anyhow::{Context, Result, bail};
use nodeherd_config::{HarnessConfig, Paths};
use std::path::Path;

use crate::style::{self, colors::SemanticStyle};

pub fn show(project: &Path, format: &str) -> Result<()> {
    let config = HarnessConfig::load_from_dir(project).context("Failed to load configuration")?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        "toml" => println!("{}", toml::to_string_pretty(&config)?),
        "text" => print_text(project, &config),
        other => bail!("unknown format '{other}' (expected text, json or toml)"),
    }
    Ok(())
}

fn print_text(project: &Path, config: &HarnessConfig) {
    println!("{}", "nodeherd configuration".header());
    if !Paths::is_initialized(project) {
        style::print_hint("no nodeherd.toml in this directory, showing defaults");
    }
    println!();

    println!("Deploy:");
    style::print_labeled("Root", &config.deploy.root.display().to_string());
    style::print_labeled("Executable", &config.deploy.executable.display().to_string());
    style::print_labeled("Arguments", &config.deploy.args.join(" "));
    style::print_labeled("Config file", &config.deploy.config_file);
    style::print_labeled("Liveness", &format!("{:?}", config.deploy.liveness));
    println!();

    println!("Cluster:");
    style::print_labeled("Dnodes", &config.cluster.dnodes.to_string());
    style::print_labeled("Mnodes", &config.cluster.mnodes.to_string());
    style::print_labeled(
        "Endpoints",
        &format!(
            "{}:{} (+{} per node)",
            config.cluster.host, config.cluster.base_port, config.cluster.port_stride
        ),
    );
    println!();

    println!("Timeouts:");
    style::print_labeled("Start", &format!("{}s", config.timeouts.start_secs));
    style::print_labeled("Stop", &format!("{}s", config.timeouts.stop_secs));
    style::print_labeled("Bootstrap", &format!("{}s", config.timeouts.bootstrap_secs));
    style::print_labeled("Convergence", &format!("{}s", config.timeouts.convergence_secs));
    style::print_labeled("Poll interval", &format!("{}ms", config.timeouts.poll_interval_ms));
    println!();

    println!("Admin:");
    style::print_labeled("Backend", &format!("{:?}", config.admin.backend));
    style::print_labeled("REST port", &config.admin.rest_port.to_string());
    style::print_labeled("User", &config.admin.user);

    if !config.overrides.is_empty() {
        println!();
        println!("Overrides:");
        for (key, value) in &config.overrides {
            style::print_labeled(key, value);
        }
    }
}
