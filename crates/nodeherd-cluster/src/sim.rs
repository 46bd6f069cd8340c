//! In-memory cluster answering the admin interface.
//!
//! Follows the membership rules of the real metadata service closely enough
//! to drive the controller without a database binary: the first endpoint
//! bootstraps as dnode 1 holding the mnode leader, dnode ids only grow,
//! an mnode can be created once per dnode, and the leader's dnode cannot be
//! dropped.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::admin::{AdminClient, AdminError, AdminResult};
use crate::snapshot::{ClusterSnapshot, DnodeInfo, DnodeStatus, MnodeInfo, MnodeRole};

#[derive(Debug)]
struct SimState {
    available: bool,
    next_id: u32,
    dnodes: Vec<DnodeInfo>,
    mnodes: Vec<MnodeInfo>,
    users: Vec<String>,
    qnodes: Vec<u32>,
    settings: BTreeMap<String, String>,
    journal: Vec<String>,
    reject_next: Option<String>,
}

/// Shared handle to a simulated cluster. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct SimulatedCluster {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCluster {
    /// Cluster whose first node at `first_endpoint` has already bootstrapped.
    pub fn bootstrapped(first_endpoint: impl Into<String>) -> Self {
        let endpoint = first_endpoint.into();
        let state = SimState {
            available: true,
            next_id: 2,
            dnodes: vec![DnodeInfo {
                id: 1,
                endpoint: endpoint.clone(),
                status: DnodeStatus::Ready,
            }],
            mnodes: vec![MnodeInfo {
                id: 1,
                endpoint,
                role: MnodeRole::Leader,
                status: "ready".to_string(),
            }],
            users: vec!["root".to_string()],
            qnodes: Vec::new(),
            settings: BTreeMap::new(),
            journal: Vec::new(),
            reject_next: None,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the state from the others.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// While unavailable every call fails with a transport error.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Makes the next mutating command fail with `message`.
    pub fn reject_next(&self, message: impl Into<String>) {
        self.lock().reject_next = Some(message.into());
    }

    pub fn set_dnode_status(&self, dnode_id: u32, status: DnodeStatus) {
        let mut state = self.lock();
        if let Some(dnode) = state.dnodes.iter_mut().find(|d| d.id == dnode_id) {
            dnode.status = status;
        }
    }

    /// Mutating commands in the order they were accepted or refused.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn current(&self) -> ClusterSnapshot {
        let state = self.lock();
        ClusterSnapshot::new(state.dnodes.clone(), state.mnodes.clone())
    }

    fn mutate<T>(
        &self,
        command: String,
        apply: impl FnOnce(&mut SimState) -> AdminResult<T>,
    ) -> AdminResult<T> {
        let mut state = self.lock();
        if !state.available {
            return Err(AdminError::Transport("connection refused".into()));
        }
        state.journal.push(command.clone());
        if let Some(message) = state.reject_next.take() {
            return Err(AdminError::rejected(command, message));
        }
        apply(&mut state)
    }

    fn read<T>(&self, view: impl FnOnce(&SimState) -> T) -> AdminResult<T> {
        let state = self.lock();
        if !state.available {
            return Err(AdminError::Transport("connection refused".into()));
        }
        Ok(view(&state))
    }
}

#[async_trait]
impl AdminClient for SimulatedCluster {
    async fn list_dnodes(&self) -> AdminResult<Vec<DnodeInfo>> {
        self.read(|s| s.dnodes.clone())
    }

    async fn list_mnodes(&self) -> AdminResult<Vec<MnodeInfo>> {
        self.read(|s| s.mnodes.clone())
    }

    async fn list_users(&self) -> AdminResult<Vec<String>> {
        self.read(|s| s.users.clone())
    }

    async fn create_mnode(&self, dnode_id: u32) -> AdminResult<()> {
        let command = format!("create mnode on dnode {dnode_id}");
        self.mutate(command.clone(), |s| {
            let endpoint = s
                .dnodes
                .iter()
                .find(|d| d.id == dnode_id)
                .map(|d| d.endpoint.clone())
                .ok_or_else(|| AdminError::rejected(&command, "Dnode does not exist"))?;
            if s.mnodes.iter().any(|m| m.id == dnode_id) {
                return Err(AdminError::DuplicateMnode(dnode_id));
            }
            s.mnodes.push(MnodeInfo {
                id: dnode_id,
                endpoint,
                role: MnodeRole::Follower,
                status: "ready".to_string(),
            });
            Ok(())
        })
    }

    async fn drop_dnode(&self, dnode_id: u32) -> AdminResult<()> {
        let command = format!("drop dnode {dnode_id}");
        self.mutate(command.clone(), |s| {
            if !s.dnodes.iter().any(|d| d.id == dnode_id) {
                return Err(AdminError::rejected(&command, "Dnode does not exist"));
            }
            if s
                .mnodes
                .iter()
                .any(|m| m.id == dnode_id && m.role == MnodeRole::Leader)
            {
                return Err(AdminError::rejected(
                    &command,
                    "Cannot drop dnode hosting the mnode leader",
                ));
            }
            s.dnodes.retain(|d| d.id != dnode_id);
            s.mnodes.retain(|m| m.id != dnode_id);
            s.qnodes.retain(|&q| q != dnode_id);
            Ok(())
        })
    }

    async fn create_dnode(&self, endpoint: &str) -> AdminResult<()> {
        let command = format!("create dnode \"{endpoint}\"");
        self.mutate(command.clone(), |s| {
            if s.dnodes.iter().any(|d| d.endpoint == endpoint) {
                return Err(AdminError::rejected(&command, "Dnode already exists"));
            }
            let id = s.next_id;
            s.next_id += 1;
            s.dnodes.push(DnodeInfo {
                id,
                endpoint: endpoint.to_string(),
                status: DnodeStatus::Ready,
            });
            Ok(())
        })
    }

    async fn create_user(&self, name: &str, _password: &str) -> AdminResult<()> {
        let command = format!("create user {name}");
        self.mutate(command.clone(), |s| {
            if s.users.iter().any(|u| u == name) {
                return Err(AdminError::rejected(&command, "User already exists"));
            }
            s.users.push(name.to_string());
            Ok(())
        })
    }

    async fn list_qnodes(&self) -> AdminResult<Vec<u32>> {
        self.read(|s| s.qnodes.clone())
    }

    async fn create_qnode(&self, dnode_id: u32) -> AdminResult<()> {
        let command = format!("create qnode on dnode {dnode_id}");
        self.mutate(command.clone(), |s| {
            if !s.dnodes.iter().any(|d| d.id == dnode_id) {
                return Err(AdminError::rejected(&command, "Dnode does not exist"));
            }
            if s.qnodes.contains(&dnode_id) {
                return Err(AdminError::rejected(&command, "Qnode already exists"));
            }
            s.qnodes.push(dnode_id);
            Ok(())
        })
    }

    async fn alter_runtime_setting(&self, key: &str, value: &str) -> AdminResult<()> {
        self.mutate(format!("alter local \"{key}\" \"{value}\""), |s| {
            s.settings.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn runtime_setting(&self, key: &str) -> AdminResult<Option<String>> {
        self.read(|s| s.settings.get(key).cloned())
    }
}
