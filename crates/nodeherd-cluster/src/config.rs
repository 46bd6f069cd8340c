//! Cluster topology configuration.
//!
//! A topology is computed once from `(total_nodes, mnode_target)` and the
//! allocation settings. Ports depend only on the node index, so two runs with
//! the same inputs produce identical endpoints.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the manifest written to the deploy root.
pub const MANIFEST_FILE: &str = "cluster.toml";

/// Role hint assigned when the topology is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    Dnode,
    MnodeCandidate,
}

/// Inputs to port and directory allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySettings {
    /// Host every node binds to and advertises.
    pub host: String,

    /// Port of node 1.
    pub base_port: u16,

    /// Distance between consecutive nodes' ports.
    pub port_stride: u16,

    /// Root under which each node gets `dnode<index>/`.
    pub deploy_root: PathBuf,

    /// Extra `key value` pairs written to every node's config file.
    pub overrides: BTreeMap<String, String>,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            base_port: 6030,
            port_stride: 100,
            deploy_root: PathBuf::from("sim"),
            overrides: BTreeMap::new(),
        }
    }
}

/// Configuration for a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node index (1-based).
    pub index: usize,

    pub host: String,

    pub port: u16,

    /// The node that bootstraps the metadata service.
    pub is_first_node: bool,

    pub role: NodeRole,

    /// Endpoint every node contacts to join the cluster.
    pub first_ep: String,

    pub cfg_dir: PathBuf,

    pub data_dir: PathBuf,

    pub log_dir: PathBuf,

    pub config_overrides: BTreeMap<String, String>,
}

impl NodeConfig {
    /// `host:port` as the cluster lists it.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Directory holding `cfg/`, `data/` and `log/`.
    pub fn node_dir(&self) -> PathBuf {
        self.cfg_dir
            .parent()
            .map_or_else(|| self.cfg_dir.clone(), Path::to_path_buf)
    }

    /// Renders the `key value` configuration file.
    pub fn render(&self) -> String {
        let mut entries: BTreeMap<&str, String> = BTreeMap::new();
        entries.insert("firstEp", self.first_ep.clone());
        entries.insert("fqdn", self.host.clone());
        entries.insert("serverPort", self.port.to_string());
        entries.insert("dataDir", self.data_dir.display().to_string());
        entries.insert("logDir", self.log_dir.display().to_string());
        for (key, value) in &self.config_overrides {
            entries.insert(key.as_str(), value.clone());
        }

        let mut content = String::new();
        for (key, value) in entries {
            content.push_str(&format!("{key:<20} {value}\n"));
        }
        content
    }
}

/// Splits `host:port`.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidTopology(format!("endpoint `{endpoint}` has no port")))?;
    if host.is_empty() {
        return Err(Error::InvalidTopology(format!(
            "endpoint `{endpoint}` has no host"
        )));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::InvalidTopology(format!("endpoint `{endpoint}` has a bad port")))?;
    Ok((host.to_string(), port))
}

/// Target shape of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub total_nodes: usize,

    pub mnode_target: usize,

    pub settings: TopologySettings,

    /// Node configurations ordered by index.
    pub nodes: Vec<NodeConfig>,
}

impl ClusterTopology {
    /// Computes a topology with default allocation settings.
    pub fn configure(total_nodes: usize, mnode_target: usize) -> Result<Self> {
        Self::configure_with(TopologySettings::default(), total_nodes, mnode_target)
    }

    /// Computes a topology. Pure: no files are touched.
    pub fn configure_with(
        settings: TopologySettings,
        total_nodes: usize,
        mnode_target: usize,
    ) -> Result<Self> {
        if total_nodes < 1 {
            return Err(Error::InvalidTopology(format!(
                "node count must be >= 1, got {total_nodes}"
            )));
        }
        if mnode_target > total_nodes {
            return Err(Error::InvalidTopology(format!(
                "mnode target {mnode_target} exceeds node count {total_nodes}"
            )));
        }
        if settings.port_stride == 0 && total_nodes > 1 {
            return Err(Error::InvalidTopology("port stride must be > 0".into()));
        }
        let last_port =
            u64::from(settings.base_port) + (total_nodes as u64 - 1) * u64::from(settings.port_stride);
        if last_port > u64::from(u16::MAX) {
            return Err(Error::InvalidTopology(format!(
                "base port {} with stride {} overflows at {total_nodes} nodes",
                settings.base_port, settings.port_stride
            )));
        }

        let first_ep = format!("{}:{}", settings.host, settings.base_port);
        let candidates = mnode_target.max(1);

        let nodes = (1..=total_nodes)
            .map(|index| {
                let port = settings.base_port + (index as u16 - 1) * settings.port_stride;
                let node_dir = settings.deploy_root.join(format!("dnode{index}"));

                NodeConfig {
                    index,
                    host: settings.host.clone(),
                    port,
                    is_first_node: index == 1,
                    role: if index <= candidates {
                        NodeRole::MnodeCandidate
                    } else {
                        NodeRole::Dnode
                    },
                    first_ep: first_ep.clone(),
                    cfg_dir: node_dir.join("cfg"),
                    data_dir: node_dir.join("data"),
                    log_dir: node_dir.join("log"),
                    config_overrides: settings.overrides.clone(),
                }
            })
            .collect();

        Ok(Self {
            total_nodes,
            mnode_target,
            settings,
            nodes,
        })
    }

    /// Loads the manifest from `deploy_root`.
    pub fn load(deploy_root: &Path) -> Result<Self> {
        let manifest = deploy_root.join(MANIFEST_FILE);

        if !manifest.exists() {
            return Err(Error::NotInitialized(deploy_root.to_path_buf()));
        }

        let content = fs::read_to_string(&manifest)?;
        Ok(toml::from_str(&content)?)
    }

    /// Writes the manifest into the deploy root.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.settings.deploy_root)?;

        let content = toml::to_string_pretty(self)?;
        fs::write(self.manifest_path(), content)?;

        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.settings.deploy_root.join(MANIFEST_FILE)
    }

    /// Returns the configuration for a specific node.
    pub fn node(&self, index: usize) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.index == index)
    }

    pub fn first_node(&self) -> &NodeConfig {
        // configure_with always creates node 1 as the first node
        &self.nodes[0]
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.nodes.iter().map(NodeConfig::endpoint).collect()
    }

    /// Moves node `index` to `endpoint`, keeping every other node untouched.
    ///
    /// The new endpoint may equal the node's current one but must not belong
    /// to another node.
    pub fn rebind(&mut self, index: usize, endpoint: &str) -> Result<&NodeConfig> {
        let (host, port) = parse_endpoint(endpoint)?;

        if self
            .nodes
            .iter()
            .any(|n| n.index != index && n.host == host && n.port == port)
        {
            return Err(Error::InvalidTopology(format!(
                "endpoint {endpoint} already belongs to another node"
            )));
        }

        let position = self
            .nodes
            .iter()
            .position(|n| n.index == index)
            .ok_or(Error::NodeNotFound(index))?;

        let node = &mut self.nodes[position];
        node.host = host;
        node.port = port;

        if node.is_first_node {
            let first_ep = node.endpoint();
            for node in &mut self.nodes {
                node.first_ep.clone_from(&first_ep);
            }
        }

        Ok(&self.nodes[position])
    }
}
