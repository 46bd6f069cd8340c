//! Scenario registry and built-in scenarios.
//!
//! Scenarios are registered explicitly by name. A scenario named
//! `<name>-restart` is the follow-up run after the cluster has been stopped
//! and its first node restarted (`run -r`).

mod recreate_mnode;
mod smoke;

use anyhow::{Result, bail};
use async_trait::async_trait;
use nodeherd_cluster::ClusterController;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

pub use recreate_mnode::RecreateMnode;
pub use smoke::{Smoke, SmokeAfterRestart};

/// Selector that runs every non-restart scenario.
pub const ALL: &str = "all";

const RESTART_SUFFIX: &str = "-restart";

/// Cluster shape a scenario needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    pub min_dnodes: usize,
}

/// What a scenario gets to work with.
pub struct ScenarioContext<'a> {
    pub cluster: &'a mut ClusterController,
    pub cancel: CancellationToken,
}

impl ScenarioContext<'_> {
    /// Fails once the run has been interrupted.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("scenario interrupted");
        }
        Ok(())
    }

    /// Number of nodes registered as dnodes when the cluster started.
    pub fn registered_dnodes(&self) -> usize {
        let total = self.cluster.topology().total_nodes;
        self.cluster
            .settings()
            .register_limit
            .map_or(total, |limit| limit.min(total))
    }
}

#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn requirements(&self) -> Requirements {
        Requirements::default()
    }

    async fn run(&self, cx: &mut ScenarioContext<'_>) -> Result<()>;
}

type Factory = fn() -> Box<dyn Scenario>;

/// Name → factory map, filled once at startup.
#[derive(Default)]
pub struct ScenarioRegistry {
    entries: BTreeMap<&'static str, Factory>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every scenario shipped in this binary.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(|| Box::new(RecreateMnode));
        registry.register(|| Box::new(Smoke));
        registry.register(|| Box::new(SmokeAfterRestart));
        registry
    }

    pub fn register(&mut self, factory: Factory) {
        let name = factory().name();
        self.entries.insert(name, factory);
    }

    pub fn get(&self, name: &str) -> Option<Box<dyn Scenario>> {
        self.entries.get(name).map(|factory| factory())
    }

    /// Every registered scenario, restart variants included, by name.
    pub fn all(&self) -> impl Iterator<Item = Box<dyn Scenario>> + '_ {
        self.entries.values().map(|factory| factory())
    }

    /// Resolves a `-f` selector: a scenario name or [`ALL`].
    pub fn select(&self, selector: &str) -> Result<Vec<Box<dyn Scenario>>> {
        if selector == ALL {
            return Ok(self
                .all()
                .filter(|s| !s.name().ends_with(RESTART_SUFFIX))
                .collect());
        }
        match self.get(selector) {
            Some(scenario) => Ok(vec![scenario]),
            None => bail!(
                "unknown scenario '{selector}' (known: {})",
                self.entries.keys().copied().collect::<Vec<_>>().join(", ")
            ),
        }
    }

    /// The `<name>-restart` follow-up of a scenario, if registered.
    pub fn restart_variant(&self, name: &str) -> Option<Box<dyn Scenario>> {
        self.get(&format!("{name}{RESTART_SUFFIX}"))
    }
}
