//! Point-in-time read model of cluster membership.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Health of a dnode as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnodeStatus {
    Ready,
    Offline,
    Other(String),
}

impl DnodeStatus {
    /// Parses the status column of a dnode listing.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ready" => Self::Ready,
            "offline" => Self::Offline,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DnodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Offline => f.write_str("offline"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Role of an mnode within the metadata group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MnodeRole {
    Leader,
    Follower,
    Candidate,
    Offline,
}

impl MnodeRole {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "leader" => Self::Leader,
            "follower" => Self::Follower,
            "candidate" => Self::Candidate,
            _ => Self::Offline,
        }
    }
}

impl fmt::Display for MnodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Leader => "leader",
            Self::Follower => "follower",
            Self::Candidate => "candidate",
            Self::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// One row of the dnode listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnodeInfo {
    pub id: u32,
    pub endpoint: String,
    pub status: DnodeStatus,
}

impl DnodeInfo {
    pub fn is_ready(&self) -> bool {
        self.status == DnodeStatus::Ready
    }
}

/// One row of the mnode listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MnodeInfo {
    /// Id of the dnode hosting this mnode.
    pub id: u32,
    pub endpoint: String,
    pub role: MnodeRole,
    /// `ready` once the mnode has joined the metadata group.
    pub status: String,
}

impl MnodeInfo {
    pub fn is_ready(&self) -> bool {
        self.status.eq_ignore_ascii_case("ready")
            && matches!(self.role, MnodeRole::Leader | MnodeRole::Follower)
    }
}

/// Cluster membership as observed by one poll. Never mutated after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub dnodes: Vec<DnodeInfo>,
    pub mnodes: Vec<MnodeInfo>,
}

impl ClusterSnapshot {
    pub fn new(dnodes: Vec<DnodeInfo>, mnodes: Vec<MnodeInfo>) -> Self {
        Self { dnodes, mnodes }
    }

    pub fn ready_dnodes(&self) -> usize {
        self.dnodes.iter().filter(|d| d.is_ready()).count()
    }

    pub fn ready_mnodes(&self) -> usize {
        self.mnodes.iter().filter(|m| m.is_ready()).count()
    }

    pub fn leader_count(&self) -> usize {
        self.mnodes
            .iter()
            .filter(|m| m.role == MnodeRole::Leader)
            .count()
    }

    /// All `expected` dnodes listed and ready.
    pub fn has_dnode_count(&self, expected: usize) -> bool {
        self.dnodes.len() == expected && self.ready_dnodes() == expected
    }

    /// All `expected` mnodes ready with exactly one leader.
    pub fn has_mnode_count(&self, expected: usize) -> bool {
        self.mnodes.len() == expected
            && self.ready_mnodes() == expected
            && (expected == 0 || self.leader_count() == 1)
    }

    pub fn contains_endpoint(&self, endpoint: &str) -> bool {
        self.dnodes.iter().any(|d| d.endpoint == endpoint)
    }

    pub fn dnode_id(&self, endpoint: &str) -> Option<u32> {
        self.dnodes
            .iter()
            .find(|d| d.endpoint == endpoint)
            .map(|d| d.id)
    }

    pub fn is_mnode(&self, dnode_id: u32) -> bool {
        self.mnodes.iter().any(|m| m.id == dnode_id)
    }
}

impl fmt::Display for ClusterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dnodes ({}):", self.dnodes.len())?;
        for d in &self.dnodes {
            writeln!(f, "  {:>3} {} [{}]", d.id, d.endpoint, d.status)?;
        }
        writeln!(f, "mnodes ({}):", self.mnodes.len())?;
        for m in &self.mnodes {
            writeln!(f, "  {:>3} {} {} [{}]", m.id, m.endpoint, m.role, m.status)?;
        }
        Ok(())
    }
}
