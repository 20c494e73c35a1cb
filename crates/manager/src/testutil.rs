use std::sync::Arc;

use actix_ws::CloseReason;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use reef_core::config::ManagerConfig;
use reef_core::ids::NodeId;
use reef_core::store::Store;
use reef_core::types::{JobRow, NodeInfo};
use reef_core::Error;
use reef_protocol::message::MessageToNode;
use reef_scheduler::Elector;

use crate::artifacts::ArtifactCache;
use crate::compiler::CompilerClient;
use crate::datasets::DatasetStore;
use crate::jobs::JobRegistry;
use crate::manager::Manager;
use crate::nodes::NodeRegistry;
use crate::session::NodeLink;
use crate::ui::{Topic, UiBus};

/// Node link that records outbound messages instead of hitting a socket.
pub(crate) struct RecordingLink {
    sent: Mutex<Vec<MessageToNode>>,
    fail: bool,
}

impl RecordingLink {
    pub(crate) fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A link whose writes always fail, as if the connection had died.
    pub(crate) fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn sent(&self) -> Vec<MessageToNode> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NodeLink for RecordingLink {
    async fn send(&self, msg: &MessageToNode) -> Result<(), Error> {
        if self.fail {
            return Err(Error::System("connection closed".to_string()));
        }
        self.sent.lock().push(msg.clone());
        Ok(())
    }

    async fn pong(&self, _payload: &[u8]) -> Result<(), Error> {
        if self.fail {
            return Err(Error::System("connection closed".to_string()));
        }
        Ok(())
    }

    async fn close(&self, _reason: Option<CloseReason>) {}
}

/// Keeps temp dirs and the UI bus alive for a test's duration.
pub(crate) struct TestHarness {
    _artifact_dir: tempfile::TempDir,
    _dataset_dir: tempfile::TempDir,
    _templates_dir: tempfile::TempDir,
    _bus: UiBus,
    _refresh_rx: mpsc::Receiver<Topic>,
}

/// A manager with an in-memory store, temp filesystem stores, no connected
/// compiler and a zero-second runtime cap.
pub(crate) async fn test_manager() -> (Arc<Manager>, TestHarness) {
    let artifact_dir = tempfile::tempdir().unwrap();
    let dataset_dir = tempfile::tempdir().unwrap();
    let templates_dir = tempfile::tempdir().unwrap();

    let store = Arc::new(Store::open_in_memory().unwrap());
    let artifacts = ArtifactCache::new(artifact_dir.path()).unwrap();
    let datasets = DatasetStore::new(dataset_dir.path(), store.clone()).unwrap();
    let empty_dataset_id = datasets.bootstrap_empty().unwrap();

    let (bus, ui, refresh_rx) = UiBus::new();

    let config = ManagerConfig {
        dataset_path: dataset_dir.path().to_path_buf(),
        artifact_path: artifact_dir.path().to_path_buf(),
        templates_path: templates_dir.path().to_path_buf(),
        port: 0,
        admin_token: "test-admin-token".to_string(),
        session_secret: "test-secret".to_string(),
        max_job_runtime_secs: 0,
        node_blacklist: Vec::new(),
        compiler_host: "127.0.0.1".to_string(),
        compiler_port: 1,
        db_path: "unused".into(),
    };

    let manager = Manager {
        compiler: CompilerClient::new(
            config.compiler_host.clone(),
            config.compiler_port,
            artifacts.clone(),
        ),
        elector: Elector::new(config.node_blacklist.clone()),
        config,
        store,
        artifacts,
        datasets,
        jobs: JobRegistry::new(),
        nodes: NodeRegistry::new(),
        ui,
        templates: Vec::new(),
        empty_dataset_id,
    };

    (
        Arc::new(manager),
        TestHarness {
            _artifact_dir: artifact_dir,
            _dataset_dir: dataset_dir,
            _templates_dir: templates_dir,
            _bus: bus,
            _refresh_rx: refresh_rx,
        },
    )
}

pub(crate) fn test_row(id: &str) -> JobRow {
    JobRow {
        id: id.to_string(),
        name: format!("job {id}"),
        submitted: Utc::now(),
        wasm_hash: hex::encode([0x11u8; 32]),
        dataset_id: hex::encode([0x22u8; 32]),
        owner: "owner-1".to_string(),
    }
}

pub(crate) async fn connect_node(
    manager: &Manager,
    name: &str,
    num_workers: u16,
    link: Arc<dyn NodeLink>,
) -> NodeId {
    manager
        .nodes
        .connect(
            NodeInfo {
                endpoint_ip: "10.0.0.1".to_string(),
                name: name.to_string(),
                num_workers,
            },
            link,
        )
        .await
        .unwrap()
}
