//! Node process management.

use crate::probe::{self, Liveness};
use crate::{Error, NodeConfig, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name of the pid file written into a node's `cfg/` directory.
pub const PID_FILE: &str = "node.pid";

const PROBE_INTERVAL: Duration = Duration::from_millis(100);
const PROCESS_GRACE: Duration = Duration::from_millis(200);

/// Status of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Node is stopped.
    Stopped,

    /// Process spawned, liveness not yet observed.
    Starting,

    /// Node is running normally.
    Running,

    /// Termination in progress.
    Stopping,

    /// Process exited without being asked to.
    Crashed,
}

/// How [`NodeProcess::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    AlreadyStopped,

    /// Exited after the termination signal.
    Graceful,

    /// Had to be killed after the stop timeout.
    Forced,

    /// Had already exited on its own.
    Crashed(Option<i32>),
}

impl StopOutcome {
    /// Whether the stop completed without a forced kill.
    pub fn is_clean(self) -> bool {
        matches!(self, Self::AlreadyStopped | Self::Graceful)
    }
}

/// How to launch the managed server binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Server executable.
    pub executable: PathBuf,

    /// Arguments; `{cfg_dir}`, `{index}` and `{port}` are substituted.
    pub args: Vec<String>,

    /// File name of the config file written into `cfg/`.
    pub config_file: String,

    pub liveness: Liveness,

    pub start_timeout: Duration,

    pub stop_timeout: Duration,

    /// Refuse to launch when the node's port is already bound.
    pub check_port: bool,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("taosd"),
            args: vec!["-c".to_string(), "{cfg_dir}".to_string()],
            config_file: "taos.cfg".to_string(),
            liveness: Liveness::Tcp,
            start_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
            check_port: true,
        }
    }
}

impl LaunchSpec {
    fn render_args(&self, config: &NodeConfig) -> Vec<String> {
        let cfg_dir = config.cfg_dir.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{cfg_dir}", &cfg_dir)
                    .replace("{index}", &config.index.to_string())
                    .replace("{port}", &config.port.to_string())
            })
            .collect()
    }
}

/// A managed server process.
pub struct NodeProcess {
    /// Node configuration.
    pub config: NodeConfig,

    launch: Arc<LaunchSpec>,

    /// Child process handle.
    process: Option<Child>,

    /// Current status.
    pub status: NodeStatus,

    deployed: bool,

    /// Number of restarts issued through [`NodeProcess::restart`].
    pub restart_count: usize,

    /// Aborts the liveness wait of [`NodeProcess::start`].
    cancel: CancellationToken,
}

impl NodeProcess {
    /// Creates a new node process (not deployed, not started).
    pub fn new(config: NodeConfig, launch: Arc<LaunchSpec>) -> Self {
        Self {
            config,
            launch,
            process: None,
            status: NodeStatus::Stopped,
            deployed: false,
            restart_count: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Ties the startup wait to `cancel`. A cancelled start returns
    /// [`Error::Cancelled`] and leaves the process `Starting` for a later stop.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn set_cancellation(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    /// Writes the node's directories and configuration file.
    ///
    /// Idempotent: existing data is kept and the config file is overwritten.
    pub fn deploy(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(Error::NodeAlreadyRunning(self.config.index));
        }

        fs::create_dir_all(&self.config.cfg_dir)?;
        fs::create_dir_all(&self.config.data_dir)?;
        fs::create_dir_all(&self.config.log_dir)?;
        fs::write(self.config_path(), self.config.render())?;

        self.deployed = true;
        debug!(node = self.config.index, dir = %self.config.node_dir().display(), "deployed");
        Ok(())
    }

    /// Deploys after wiping data and log directories.
    pub fn deploy_fresh(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(Error::NodeAlreadyRunning(self.config.index));
        }

        for dir in [&self.config.data_dir, &self.config.log_dir] {
            match fs::remove_dir_all(dir) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        self.deploy()
    }

    /// Replaces the node configuration. The node must be stopped and is
    /// considered undeployed afterwards.
    pub fn reconfigure(&mut self, config: NodeConfig) -> Result<()> {
        if self.is_active() {
            return Err(Error::NodeAlreadyRunning(self.config.index));
        }
        self.config = config;
        self.deployed = false;
        Ok(())
    }

    /// Starts the node process and waits until it is live.
    pub async fn start(&mut self) -> Result<()> {
        self.refresh_status();
        if self.is_active() {
            return Err(Error::NodeAlreadyRunning(self.config.index));
        }
        if !self.deployed {
            return Err(Error::NotDeployed(self.config.index));
        }

        let index = self.config.index;
        if self.launch.check_port && !probe::port_is_free(self.config.port) {
            return Err(Error::LaunchFailure {
                node: index,
                reason: format!("port {} is already bound", self.config.port),
            });
        }

        let stdout = File::create(self.config.log_dir.join("stdout.log"))?;
        let stderr = File::create(self.config.log_dir.join("stderr.log"))?;

        let child = Command::new(&self.launch.executable)
            .args(self.launch.render_args(&self.config))
            .current_dir(self.config.node_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::LaunchFailure {
                node: index,
                reason: if e.kind() == ErrorKind::NotFound {
                    format!("executable {} not found", self.launch.executable.display())
                } else {
                    e.to_string()
                },
            })?;

        self.process = Some(child);
        self.status = NodeStatus::Starting;

        self.await_liveness().await?;

        self.status = NodeStatus::Running;
        if let Some(pid) = self.pid() {
            fs::write(self.pid_path(), pid.to_string())?;
        }
        info!(node = index, port = self.config.port, pid = ?self.pid(), "node started");
        Ok(())
    }

    async fn await_liveness(&mut self) -> Result<()> {
        let index = self.config.index;
        let start_timeout = self.launch.start_timeout;
        let deadline = Instant::now() + start_timeout;

        if self.launch.liveness == Liveness::Process {
            self.pause(PROCESS_GRACE.min(start_timeout)).await?;
        }

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(code) = self.exit_code() {
                self.status = NodeStatus::Crashed;
                return Err(Error::LaunchFailure {
                    node: index,
                    reason: format!("process exited during startup with code {code:?}"),
                });
            }

            let live = match self.launch.liveness {
                Liveness::Process => true,
                Liveness::Tcp => tokio::select! {
                    () = self.cancel.cancelled() => return Err(Error::Cancelled),
                    open = probe::port_accepts(&self.config.host, self.config.port, PROBE_INTERVAL) => open,
                },
            };
            if live {
                return Ok(());
            }

            if Instant::now() >= deadline {
                // The process keeps running; the caller decides whether to stop it.
                return Err(Error::StartupTimeout {
                    node: index,
                    timeout_ms: start_timeout.as_millis() as u64,
                });
            }
            self.pause(PROBE_INTERVAL).await?;
        }
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            () = sleep(duration) => Ok(()),
        }
    }

    /// Stops the node: termination signal, then a forced kill after the stop
    /// timeout. Always leaves the node `Stopped`.
    pub async fn stop(&mut self) -> StopOutcome {
        let index = self.config.index;
        let outcome = match self.process.take() {
            None => StopOutcome::AlreadyStopped,
            Some(mut child) => {
                if let Ok(Some(status)) = child.try_wait() {
                    warn!(node = index, code = ?status.code(), "node had already exited");
                    StopOutcome::Crashed(status.code())
                } else {
                    self.status = NodeStatus::Stopping;
                    Self::terminate(index, &mut child, self.launch.stop_timeout).await
                }
            }
        };

        self.status = NodeStatus::Stopped;
        self.remove_pid_file();
        debug!(node = index, ?outcome, "node stopped");
        outcome
    }

    async fn terminate(index: usize, child: &mut Child, within: Duration) -> StopOutcome {
        if send_term(child).await {
            if let Ok(Ok(_)) = timeout(within, child.wait()).await {
                return StopOutcome::Graceful;
            }
            warn!(node = index, "node ignored termination signal, killing");
        }

        if let Err(e) = child.kill().await {
            warn!(node = index, "kill failed: {e}");
        }
        StopOutcome::Forced
    }

    /// Kills the process immediately.
    pub async fn force_kill(&mut self) -> Result<()> {
        if let Some(mut child) = self.process.take() {
            let result = child.kill().await;
            self.status = NodeStatus::Stopped;
            self.remove_pid_file();
            match result {
                // Already reaped
                Err(e) if e.kind() == ErrorKind::InvalidInput => {}
                other => other?,
            }
            info!(node = self.config.index, "node killed");
        } else {
            self.status = NodeStatus::Stopped;
        }
        Ok(())
    }

    /// Stops and starts the node again.
    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await;
        self.restart_count += 1;
        self.start().await
    }

    /// Marks a running node whose process has exited as `Crashed`. The exited
    /// child is kept so a later [`NodeProcess::stop`] reports its exit code.
    pub fn refresh_status(&mut self) -> NodeStatus {
        if matches!(self.status, NodeStatus::Running | NodeStatus::Starting) {
            if let Some(code) = self.exit_code() {
                warn!(node = self.config.index, ?code, "node crashed");
                self.status = NodeStatus::Crashed;
            }
        }
        self.status
    }

    /// Exit code of a process that has exited, `None` while alive.
    fn exit_code(&mut self) -> Option<Option<i32>> {
        let child = self.process.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            Err(_) => Some(None),
        }
    }

    /// Checks if the node process is alive.
    pub fn is_alive(&mut self) -> bool {
        self.process.is_some() && self.exit_code().is_none()
    }

    fn is_active(&self) -> bool {
        matches!(
            self.status,
            NodeStatus::Starting | NodeStatus::Running | NodeStatus::Stopping
        )
    }

    pub fn is_deployed(&self) -> bool {
        self.deployed
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }

    /// Returns the node index.
    pub fn index(&self) -> usize {
        self.config.index
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    pub fn config_path(&self) -> PathBuf {
        self.config.cfg_dir.join(&self.launch.config_file)
    }

    pub fn pid_path(&self) -> PathBuf {
        pid_path(&self.config.cfg_dir)
    }

    fn remove_pid_file(&self) {
        if let Err(e) = fs::remove_file(self.pid_path()) {
            if e.kind() != ErrorKind::NotFound {
                debug!(node = self.config.index, "could not remove pid file: {e}");
            }
        }
    }
}

/// Location of the pid file under a node's config directory.
pub fn pid_path(cfg_dir: &Path) -> PathBuf {
    cfg_dir.join(PID_FILE)
}

/// Sends a signal (`TERM`, `KILL`, `0`) to a pid with the `kill` utility.
/// Returns whether the signal was delivered.
#[cfg(unix)]
pub async fn signal_pid(pid: u32, signal: &str) -> bool {
    Command::new("kill")
        .arg(format!("-{signal}"))
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok_and(|s| s.success())
}

#[cfg(not(unix))]
pub async fn signal_pid(_pid: u32, _signal: &str) -> bool {
    false
}

/// Sends SIGTERM to a pid.
pub async fn signal_term(pid: u32) -> bool {
    signal_pid(pid, "TERM").await
}

/// Whether a process with this pid exists.
pub async fn pid_alive(pid: u32) -> bool {
    signal_pid(pid, "0").await
}

/// Command line of a live process, as reported by `ps`.
#[cfg(unix)]
pub async fn pid_command(pid: u32) -> Option<String> {
    let output = Command::new("ps")
        .args(["-o", "args=", "-p", &pid.to_string()])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!line.is_empty()).then_some(line)
}

#[cfg(not(unix))]
pub async fn pid_command(_pid: u32) -> Option<String> {
    None
}

/// Whether `pid` is running `executable`, compared by file name. Guards
/// against signalling a process that reused a recorded pid.
pub async fn pid_runs(pid: u32, executable: &Path) -> bool {
    let Some(name) = executable.file_name() else {
        return false;
    };
    let Some(command) = pid_command(pid).await else {
        return false;
    };
    command
        .split_whitespace()
        .next()
        .and_then(|program| Path::new(program).file_name())
        .is_some_and(|program| program == name)
}

async fn send_term(child: &Child) -> bool {
    match child.id() {
        Some(pid) => signal_term(pid).await,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClusterTopology, TopologySettings};
    use std::net::TcpListener;
    use tempfile::TempDir;

    fn free_port() -> u16 {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    fn test_node_config(root: &Path, port: u16) -> NodeConfig {
        let settings = TopologySettings {
            host: "127.0.0.1".to_string(),
            base_port: port,
            deploy_root: root.to_path_buf(),
            ..TopologySettings::default()
        };
        ClusterTopology::configure_with(settings, 1, 1)
            .unwrap()
            .nodes
            .remove(0)
    }

    fn sleeper() -> Arc<LaunchSpec> {
        Arc::new(LaunchSpec {
            executable: PathBuf::from("sleep"),
            args: vec!["3600".to_string()],
            liveness: Liveness::Process,
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            ..LaunchSpec::default()
        })
    }

    fn deployed_node(temp: &TempDir, launch: Arc<LaunchSpec>) -> NodeProcess {
        let mut node = NodeProcess::new(test_node_config(temp.path(), free_port()), launch);
        node.deploy().unwrap();
        node
    }

    #[test]
    fn test_node_process_creation() {
        let temp = TempDir::new().unwrap();
        let node = NodeProcess::new(test_node_config(temp.path(), 6030), sleeper());

        assert_eq!(node.status, NodeStatus::Stopped);
        assert_eq!(node.index(), 1);
        assert_eq!(node.port(), 6030);
        assert!(!node.is_deployed());
    }

    #[test]
    fn test_deploy_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut node = deployed_node(&temp, sleeper());
        let marker = node.config.data_dir.join("vnode.bin");
        fs::write(&marker, b"data").unwrap();

        node.deploy().unwrap();
        assert!(marker.exists());
        assert!(node.config_path().exists());

        node.deploy_fresh().unwrap();
        assert!(!marker.exists());
        assert!(node.config.data_dir.exists());
    }

    #[test]
    fn test_render_args_substitutes_placeholders() {
        let temp = TempDir::new().unwrap();
        let launch = LaunchSpec {
            args: vec!["-c".into(), "{cfg_dir}".into(), "--port={port}".into(), "n{index}".into()],
            ..LaunchSpec::default()
        };
        let config = test_node_config(temp.path(), 7000);

        let args = launch.render_args(&config);
        assert_eq!(args[1], config.cfg_dir.display().to_string());
        assert_eq!(args[2], "--port=7000");
        assert_eq!(args[3], "n1");
    }

    #[tokio::test]
    async fn test_start_requires_deploy() {
        let temp = TempDir::new().unwrap();
        let mut node = NodeProcess::new(test_node_config(temp.path(), free_port()), sleeper());

        assert!(matches!(node.start().await, Err(Error::NotDeployed(1))));
    }

    #[tokio::test]
    async fn test_node_start_stop() {
        let temp = TempDir::new().unwrap();
        let mut node = deployed_node(&temp, sleeper());

        node.start().await.unwrap();
        assert_eq!(node.status, NodeStatus::Running);
        assert!(node.is_alive());
        assert!(node.pid_path().exists());

        assert_eq!(node.stop().await, StopOutcome::Graceful);
        assert_eq!(node.status, NodeStatus::Stopped);
        assert!(!node.is_alive());
        assert!(!node.pid_path().exists());

        assert_eq!(node.stop().await, StopOutcome::AlreadyStopped);
    }

    #[tokio::test]
    async fn test_node_double_start_error() {
        let temp = TempDir::new().unwrap();
        let mut node = deployed_node(&temp, sleeper());

        node.start().await.unwrap();
        let result = node.start().await;
        assert!(matches!(result, Err(Error::NodeAlreadyRunning(1))));

        node.stop().await;
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_failure() {
        let temp = TempDir::new().unwrap();
        let launch = Arc::new(LaunchSpec {
            executable: PathBuf::from("/nonexistent/nodeherd-server"),
            ..(*sleeper()).clone()
        });
        let mut node = deployed_node(&temp, launch);

        let err = node.start().await.unwrap_err();
        assert!(matches!(err, Error::LaunchFailure { node: 1, .. }));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_bound_port_is_launch_failure() {
        let temp = TempDir::new().unwrap();
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut node = NodeProcess::new(test_node_config(temp.path(), port), sleeper());
        node.deploy().unwrap();

        let err = node.start().await.unwrap_err();
        assert!(matches!(err, Error::LaunchFailure { .. }));
        assert_eq!(node.status, NodeStatus::Stopped);
    }

    #[tokio::test]
    async fn test_process_exiting_during_startup() {
        let temp = TempDir::new().unwrap();
        let launch = Arc::new(LaunchSpec {
            executable: PathBuf::from("false"),
            args: vec![],
            ..(*sleeper()).clone()
        });
        let mut node = deployed_node(&temp, launch);

        assert!(matches!(
            node.start().await,
            Err(Error::LaunchFailure { .. })
        ));
        assert_eq!(node.status, NodeStatus::Crashed);
    }

    #[tokio::test]
    async fn test_startup_timeout_when_port_never_opens() {
        let temp = TempDir::new().unwrap();
        let launch = Arc::new(LaunchSpec {
            liveness: Liveness::Tcp,
            start_timeout: Duration::from_millis(300),
            ..(*sleeper()).clone()
        });
        let mut node = deployed_node(&temp, launch);

        let err = node.start().await.unwrap_err();
        assert!(matches!(err, Error::StartupTimeout { node: 1, .. }));
        assert_eq!(node.status, NodeStatus::Starting);

        assert_eq!(node.stop().await, StopOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_startup_wait() {
        let temp = TempDir::new().unwrap();
        let launch = Arc::new(LaunchSpec {
            liveness: Liveness::Tcp,
            start_timeout: Duration::from_secs(30),
            ..(*sleeper()).clone()
        });
        let cancel = CancellationToken::new();
        let mut node = deployed_node(&temp, launch).with_cancellation(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = node.start().await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(node.status, NodeStatus::Starting);

        assert_eq!(node.stop().await, StopOutcome::Graceful);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_forces_process_ignoring_term() {
        let temp = TempDir::new().unwrap();
        let launch = Arc::new(LaunchSpec {
            executable: PathBuf::from("sh"),
            args: vec![
                "-c".into(),
                "trap '' TERM; while :; do sleep 0.1; done".into(),
            ],
            stop_timeout: Duration::from_millis(300),
            ..(*sleeper()).clone()
        });
        let mut node = deployed_node(&temp, launch);

        node.start().await.unwrap();
        assert_eq!(node.stop().await, StopOutcome::Forced);
        assert_eq!(node.status, NodeStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crash_is_detected() {
        let temp = TempDir::new().unwrap();
        let mut node = deployed_node(&temp, sleeper());
        node.start().await.unwrap();

        let pid = node.pid().unwrap();
        std::process::Command::new("kill")
            .args(["-KILL", &pid.to_string()])
            .status()
            .unwrap();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(node.refresh_status(), NodeStatus::Crashed);
        assert_eq!(node.stop().await, StopOutcome::Crashed(None));
        assert_eq!(node.status, NodeStatus::Stopped);
    }

    #[tokio::test]
    async fn test_force_kill_and_restart() {
        let temp = TempDir::new().unwrap();
        let mut node = deployed_node(&temp, sleeper());
        node.start().await.unwrap();

        node.force_kill().await.unwrap();
        assert_eq!(node.status, NodeStatus::Stopped);
        assert!(!node.is_alive());

        node.restart().await.unwrap();
        assert_eq!(node.status, NodeStatus::Running);
        assert_eq!(node.restart_count, 1);
        node.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pid_signals() {
        let temp = TempDir::new().unwrap();
        let mut node = deployed_node(&temp, sleeper());
        node.start().await.unwrap();
        let pid = node.pid().unwrap();

        assert!(pid_alive(pid).await);
        assert!(signal_term(pid).await);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(node.refresh_status(), NodeStatus::Crashed);
        node.stop().await;
        assert!(!pid_alive(pid).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pid_runs_matches_executable_name() {
        let temp = TempDir::new().unwrap();
        let mut node = deployed_node(&temp, sleeper());
        node.start().await.unwrap();
        let pid = node.pid().unwrap();

        assert!(pid_command(pid).await.unwrap().contains("3600"));
        assert!(pid_runs(pid, Path::new("sleep")).await);
        assert!(pid_runs(pid, Path::new("/bin/sleep")).await);
        assert!(!pid_runs(pid, Path::new("taosd")).await);

        node.stop().await;
        assert!(!pid_runs(pid, Path::new("sleep")).await);
    }
}
