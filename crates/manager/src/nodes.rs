use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use reef_core::ids::{JobId, NodeId};
use reef_core::types::NodeInfo;
use reef_core::Error;
use reef_scheduler::NodeSnapshot;

use crate::session::NodeLink;

/// A connected worker node. `worker_state` maps each worker index to the job
/// it currently runs; `None` means the slot is free.
pub struct Node {
    pub id: NodeId,
    pub info: NodeInfo,
    pub last_ping: DateTime<Utc>,
    pub link: Arc<dyn NodeLink>,
    pub worker_state: Vec<Option<JobId>>,
}

/// Read-only view of a node for the API and the UI push bus.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub id: NodeId,
    pub info: NodeInfo,
    pub last_ping: DateTime<Utc>,
    pub worker_state: Vec<Option<JobId>>,
}

/// All connected nodes. Per-entry locks keep traffic for one node from
/// blocking the others; the outer lock only guards the map itself.
#[derive(Default)]
pub struct NodeRegistry {
    inner: RwLock<HashMap<NodeId, Arc<RwLock<Node>>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node after a successful handshake. A second node hashing to
    /// the same id is a protocol violation (duplicate or misbehaving node).
    pub async fn connect(&self, info: NodeInfo, link: Arc<dyn NodeLink>) -> Result<NodeId, Error> {
        let id = NodeId::derive(&info.endpoint_ip, &info.name);

        let mut map = self.inner.write().await;
        if map.contains_key(&id) {
            return Err(Error::Protocol(format!("node `{id}` is already connected")));
        }

        let node = Node {
            id,
            last_ping: Utc::now(),
            worker_state: vec![None; info.num_workers as usize],
            link,
            info,
        };

        info!(
            node = %id,
            ip = %node.info.endpoint_ip,
            name = %node.info.name,
            workers = node.info.num_workers,
            "handshake success: node connected"
        );

        map.insert(id, Arc::new(RwLock::new(node)));
        Ok(id)
    }

    /// Take a node out of the registry. Idempotent; the caller parks the
    /// returned node's jobs.
    pub async fn remove(&self, id: NodeId) -> Option<Arc<RwLock<Node>>> {
        let removed = self.inner.write().await.remove(&id);
        if removed.is_some() {
            debug!(node = %id, "node removed from registry");
        }
        removed
    }

    pub async fn get(&self, id: NodeId) -> Option<Arc<RwLock<Node>>> {
        self.inner.read().await.get(&id).cloned()
    }

    pub async fn register_ping(&self, id: NodeId) -> bool {
        let Some(node) = self.get(id).await else {
            return false;
        };
        node.write().await.last_ping = Utc::now();
        true
    }

    /// Snapshot every node for the API / UI.
    pub async fn list(&self) -> Vec<NodeView> {
        let map = self.inner.read().await;
        let mut views = Vec::with_capacity(map.len());
        for node in map.values() {
            let node = node.read().await;
            views.push(NodeView {
                id: node.id,
                info: node.info.clone(),
                last_ping: node.last_ping,
                worker_state: node.worker_state.clone(),
            });
        }
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Snapshot worker tables for the dispatcher election.
    pub async fn snapshots(&self) -> Vec<NodeSnapshot> {
        let map = self.inner.read().await;
        let mut snapshots = Vec::with_capacity(map.len());
        for node in map.values() {
            let node = node.read().await;
            snapshots.push(NodeSnapshot {
                id: node.id,
                name: node.info.name.clone(),
                worker_state: node.worker_state.clone(),
            });
        }
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl Node {
    /// Bind a job to a worker slot. The slot must exist and be free.
    pub fn claim_slot(&mut self, worker_index: u16, job_id: JobId) -> Result<(), Error> {
        let slot = self
            .worker_state
            .get_mut(worker_index as usize)
            .ok_or_else(|| {
                Error::Invariant(format!("worker index {worker_index} out of range"))
            })?;
        if slot.is_some() {
            return Err(Error::Invariant(format!(
                "worker {worker_index} is already busy"
            )));
        }
        *slot = Some(job_id);
        Ok(())
    }

    /// Free a worker slot, returning the job that occupied it.
    pub fn release_slot(&mut self, worker_index: u16) -> Option<JobId> {
        self.worker_state
            .get_mut(worker_index as usize)
            .and_then(|slot| slot.take())
    }

    /// The job bound to a worker slot, if any. `Err` when the index is out
    /// of range for this node.
    pub fn job_at(&self, worker_index: u16) -> Result<Option<JobId>, Error> {
        if worker_index >= self.info.num_workers {
            return Err(Error::Protocol(format!(
                "worker index {worker_index} is illegal, node has {} workers",
                self.info.num_workers
            )));
        }
        Ok(self.worker_state.get(worker_index as usize).cloned().flatten())
    }
}
