//! Administrative interface to a running cluster.
//!
//! The controller and the state checker only talk to the cluster through
//! [`AdminClient`]. Implementations decide how the request reaches a node:
//! [`crate::SqlAdminClient`] renders SQL statements, [`crate::SimulatedCluster`]
//! answers from memory.

use async_trait::async_trait;
use thiserror::Error;

use crate::snapshot::{ClusterSnapshot, DnodeInfo, MnodeInfo};

/// Failures of a single administrative call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The cluster refused the command.
    #[error("`{command}` rejected: {message}")]
    Rejected { command: String, message: String },

    /// The dnode already hosts an mnode.
    #[error("dnode {0} already hosts an mnode")]
    DuplicateMnode(u32),

    /// Response could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl AdminError {
    pub fn rejected(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Read failures that a poll loop may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type AdminResult<T> = std::result::Result<T, AdminError>;

/// Request/response channel to a live node.
///
/// Mutating calls are issued at most once per caller request; nothing in this
/// crate retries them.
#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn list_dnodes(&self) -> AdminResult<Vec<DnodeInfo>>;

    async fn list_mnodes(&self) -> AdminResult<Vec<MnodeInfo>>;

    async fn list_users(&self) -> AdminResult<Vec<String>>;

    async fn create_mnode(&self, dnode_id: u32) -> AdminResult<()>;

    async fn drop_dnode(&self, dnode_id: u32) -> AdminResult<()>;

    async fn create_dnode(&self, endpoint: &str) -> AdminResult<()>;

    async fn create_user(&self, name: &str, password: &str) -> AdminResult<()>;

    /// Dnode ids hosting a query node.
    async fn list_qnodes(&self) -> AdminResult<Vec<u32>>;

    async fn create_qnode(&self, dnode_id: u32) -> AdminResult<()>;

    /// Changes a runtime setting on the node the client is connected to.
    async fn alter_runtime_setting(&self, key: &str, value: &str) -> AdminResult<()>;

    async fn runtime_setting(&self, key: &str) -> AdminResult<Option<String>>;

    /// Fetches dnodes and mnodes into one snapshot.
    async fn snapshot(&self) -> AdminResult<ClusterSnapshot> {
        let dnodes = self.list_dnodes().await?;
        let mnodes = self.list_mnodes().await?;
        Ok(ClusterSnapshot::new(dnodes, mnodes))
    }
}
