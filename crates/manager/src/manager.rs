use std::sync::Arc;

use actix_ws::CloseReason;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use reef_core::config::ManagerConfig;
use reef_core::ids::{DatasetId, NodeId};
use reef_core::store::Store;
use reef_core::Error;
use reef_scheduler::Elector;

use crate::artifacts::ArtifactCache;
use crate::compiler::CompilerClient;
use crate::datasets::DatasetStore;
use crate::jobs::{Job, JobRegistry};
use crate::nodes::NodeRegistry;
use crate::templates::{load_templates, Template};
use crate::ui::{Topic, TopicKind, UiHandle};

/// Root of the manager: every component is owned here and injected where
/// needed; there are no process-wide singletons.
pub struct Manager {
    pub config: ManagerConfig,
    pub store: Arc<Store>,
    pub artifacts: ArtifactCache,
    pub datasets: DatasetStore,
    pub compiler: CompilerClient,
    pub jobs: JobRegistry,
    pub nodes: NodeRegistry,
    pub elector: Elector,
    pub ui: UiHandle,
    pub templates: Vec<Template>,
    pub empty_dataset_id: DatasetId,
}

impl Manager {
    /// Wire up all components and run the startup sequence: empty dataset,
    /// job recovery, templates, compiler smoke test.
    pub async fn bootstrap(config: ManagerConfig, ui: UiHandle) -> Result<Self, Error> {
        let store = Arc::new(Store::open(&config.db_path)?);
        let artifacts = ArtifactCache::new(&config.artifact_path)?;
        let datasets = DatasetStore::new(&config.dataset_path, store.clone())?;
        let compiler = CompilerClient::new(
            config.compiler_host.clone(),
            config.compiler_port,
            artifacts.clone(),
        );
        let elector = Elector::new(config.node_blacklist.clone());

        let empty_dataset_id = datasets.bootstrap_empty()?;

        let jobs = JobRegistry::new();
        let restored = restore_jobs(&store, &jobs).await?;
        if restored > 0 {
            info!(count = restored, "restored unfinished jobs as queued");
        }

        let templates = load_templates(&config.templates_path, &datasets)?;

        compiler.smoke_test().await?;

        Ok(Self {
            config,
            store,
            artifacts,
            datasets,
            compiler,
            jobs,
            nodes: NodeRegistry::new(),
            elector,
            ui,
            templates,
            empty_dataset_id,
        })
    }

    /// Remove a node and park everything it was running. Idempotent; returns
    /// false when the node was already gone.
    pub async fn drop_node(&self, node_id: NodeId, reason: Option<CloseReason>) -> bool {
        let Some(node) = self.nodes.remove(node_id).await else {
            return false;
        };

        let (link, orphans) = {
            let node = node.read().await;
            let orphans: Vec<_> = node.worker_state.iter().flatten().cloned().collect();
            (node.link.clone(), orphans)
        };

        link.close(reason).await;

        for job_id in orphans {
            info!(job = %job_id, node = %node_id, "job lost its node");
            if let Err(e) = self.park_job(&job_id).await {
                error!(job = %job_id, "could not park job: {e}");
            }
        }

        info!(node = %node_id, "node dropped");
        self.notify_nodes().await;
        self.notify_all_jobs().await;
        true
    }

    pub async fn register_ping(&self, node_id: NodeId) {
        if !self.nodes.register_ping(node_id).await {
            error!(node = %node_id, "ping for a node that does not exist");
        }
    }

    // --- UI notifications ---

    pub async fn notify_all_jobs(&self) {
        match self.list_api_jobs().await {
            Ok(jobs) => match serde_json::to_value(&jobs) {
                Ok(data) => self.ui.publish(Topic::all_jobs(), data),
                Err(e) => error!("could not encode job list for the UI: {e}"),
            },
            Err(e) => error!("could not collect job list for the UI: {e}"),
        }
    }

    pub async fn notify_nodes(&self) {
        let nodes = self.nodes.list().await;
        match serde_json::to_value(&nodes) {
            Ok(data) => self.ui.publish(Topic::nodes(), data),
            Err(e) => error!("could not encode node list for the UI: {e}"),
        }
    }

    /// Push the current state of one job, plus the job list it is part of.
    pub async fn notify_single_job(&self, job_id: &str) {
        match self.get_api_job(job_id, true).await {
            Ok(Some(job)) => match serde_json::to_value(&job) {
                Ok(data) => self.ui.publish(Topic::single_job(&job.id), data),
                Err(e) => error!(job = %job_id, "could not encode job for the UI: {e}"),
            },
            Ok(None) => warn!(job = %job_id, "cannot notify UI about an unknown job"),
            Err(e) => error!(job = %job_id, "could not load job for the UI: {e}"),
        }

        self.notify_all_jobs().await;
    }

    /// Serve refresh requests from the UI bus: regenerate the payload for a
    /// topic whose cache went stale and feed it back into the fan-out path.
    pub async fn run_refresh_worker(self: Arc<Self>, mut refresh_rx: mpsc::Receiver<Topic>) {
        while let Some(topic) = refresh_rx.recv().await {
            match topic.kind {
                TopicKind::AllJobs => self.notify_all_jobs().await,
                TopicKind::Nodes => self.notify_nodes().await,
                TopicKind::SingleJob => {
                    if let Some(job_id) = &topic.additional {
                        self.notify_single_job(job_id).await;
                    }
                }
            }
        }
    }
}

/// Load every job without a result and queue it from scratch: no node is
/// running anything yet, so in-flight state cannot be trusted.
async fn restore_jobs(store: &Store, jobs: &JobRegistry) -> Result<usize, Error> {
    let rows = store.jobs_without_result()?;
    let count = rows.len();
    for row in rows {
        jobs.insert(Job::new_queued(row)).await;
    }
    Ok(count)
}
