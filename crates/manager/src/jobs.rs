use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use reef_core::ids::{self, DatasetId, JobId, NodeId, WasmHash};
use reef_core::types::{ContentType, JobRow, JobStatus, Language, LogKind, LogRow, ResultRow};
use reef_core::Error;
use reef_protocol::message::MessageToNode;

use crate::compiler::CompileOutcome;
use crate::manager::Manager;

/// Result content written when a job is aborted before a node produced one.
pub const JOB_ABORT_MESSAGE: &str = "Job was aborted.";

/// In-memory state of a non-terminal job. The durable row is persisted at
/// submission; everything else lives here until the job finishes.
pub struct Job {
    pub row: JobRow,
    pub status: JobStatus,
    pub progress: f32,
    pub logs: Vec<LogRow>,
    pub interpreter_state: Vec<u8>,
    pub worker_node: Option<NodeId>,
    pub runtime_secs: u64,
    pub last_runtime_increment: DateTime<Utc>,
    pub is_being_aborted: bool,
}

impl Job {
    pub fn new_queued(row: JobRow) -> Self {
        Self {
            row,
            status: JobStatus::Queued,
            progress: 0.0,
            logs: Vec::new(),
            interpreter_state: Vec::new(),
            worker_node: None,
            runtime_secs: 0,
            last_runtime_increment: Utc::now(),
            is_being_aborted: false,
        }
    }

    pub fn push_system_log(&mut self, content: impl Into<String>) {
        self.logs.push(LogRow {
            kind: LogKind::System,
            created: Utc::now(),
            content: content.into(),
            job_id: self.row.id.clone(),
        });
    }
}

/// Registry of all non-terminal jobs, keyed by id. A job is present here iff
/// its status is not `done`.
#[derive(Default)]
pub struct JobRegistry {
    inner: RwLock<HashMap<JobId, Arc<RwLock<Job>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) -> Arc<RwLock<Job>> {
        let id = job.row.id.clone();
        let entry = Arc::new(RwLock::new(job));
        self.inner.write().await.insert(id, entry.clone());
        entry
    }

    pub async fn get(&self, id: &str) -> Option<Arc<RwLock<Job>>> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<RwLock<Job>>> {
        self.inner.write().await.remove(id)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// The queued job with the earliest submission time, if any.
    pub async fn earliest_queued(&self) -> Option<(JobId, Arc<RwLock<Job>>)> {
        let map = self.inner.read().await;

        let mut earliest: Option<(JobId, Arc<RwLock<Job>>, DateTime<Utc>)> = None;
        for (id, entry) in map.iter() {
            let job = entry.read().await;
            if job.status != JobStatus::Queued {
                continue;
            }
            let submitted = job.row.submitted;
            drop(job);

            let replace = match &earliest {
                Some((_, _, best)) => submitted < *best,
                None => true,
            };
            if replace {
                earliest = Some((id.clone(), entry.clone(), submitted));
            }
        }

        earliest.map(|(id, entry, _)| (id, entry))
    }

    /// Snapshot of every entry; used by the housekeeper.
    pub async fn entries(&self) -> Vec<(JobId, Arc<RwLock<Job>>)> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }
}

/// A job submission from the API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    pub name: String,
    /// Attaching a dataset is optional; absent means the empty dataset.
    pub dataset_id: Option<DatasetId>,
    pub source_code: String,
    pub language: Language,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Submitted(JobId),
    /// The compiler rejected the program; the text goes back verbatim.
    CompileError(String),
}

/// Job as served to the API and the UI: the durable row flattened together
/// with live registry state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiJob {
    pub id: JobId,
    pub name: String,
    pub submitted: DateTime<Utc>,
    #[serde(rename = "wasmId")]
    pub wasm_hash: WasmHash,
    pub dataset_id: DatasetId,
    pub owner: String,
    pub status: JobStatus,
    pub progress: f32,
    pub logs: Vec<LogRow>,
    pub result: Option<ResultRow>,
}

impl Manager {
    /// Submit a new job: validate, compile (cache-aware), persist and queue.
    pub async fn submit_job(
        &self,
        submission: JobSubmission,
        owner: &str,
    ) -> Result<SubmitOutcome, Error> {
        let dataset_id = match &submission.dataset_id {
            Some(id) => {
                if !self.datasets.exists(id)? {
                    return Err(Error::BadRequest(format!("dataset `{id}` not found")));
                }
                id.clone()
            }
            None => self.empty_dataset_id.clone(),
        };

        let now = Utc::now();
        let job_id = ids::job_id(
            now,
            submission.language,
            &submission.source_code,
            &submission.name,
            &dataset_id,
            owner,
        );

        // Idempotent resubmit: the work already finished.
        if self.store.get_result(&job_id)?.is_some() {
            debug!(job = %job_id, "resubmission of a finished job, short-circuiting");
            return Ok(SubmitOutcome::Submitted(job_id));
        }

        let artifact = match self
            .compiler
            .compile(submission.language, &submission.source_code)
            .await?
        {
            CompileOutcome::Artifact { hash, .. } => hash,
            CompileOutcome::CompilerError(text) => {
                return Ok(SubmitOutcome::CompileError(text));
            }
        };

        let row = JobRow {
            id: job_id.clone(),
            name: submission.name,
            submitted: now,
            wasm_hash: artifact,
            dataset_id,
            owner: owner.to_string(),
        };
        self.store.add_job(&row)?;
        self.jobs.insert(Job::new_queued(row)).await;

        info!(job = %job_id, "job submitted");
        self.notify_all_jobs().await;

        Ok(SubmitOutcome::Submitted(job_id))
    }

    /// Abort a non-terminal job. Queued jobs finish immediately with an
    /// abort result; starting/running jobs are asked to stop via their node,
    /// which answers with a final failure result.
    pub async fn abort_job(&self, job_id: &str) -> Result<bool, Error> {
        let Some(job) = self.jobs.get(job_id).await else {
            return Ok(false);
        };

        let (status, worker_node) = {
            let job = job.read().await;
            (job.status, job.worker_node)
        };

        match status {
            JobStatus::Queued => {
                self.finish_aborted_job(job_id).await?;
                self.notify_all_jobs().await;
                Ok(true)
            }
            JobStatus::Starting | JobStatus::Running => {
                let Some(node_id) = worker_node else {
                    error!(
                        job = %job_id,
                        "possible state corruption: non-queued job has no worker node"
                    );
                    return Ok(false);
                };

                let Some(node) = self.nodes.get(node_id).await else {
                    return Err(Error::Invariant(format!(
                        "job `{job_id}` claims to run on node `{node_id}`, which does not exist"
                    )));
                };

                job.write()
                    .await
                    .push_system_log("Abort requested, asking the node to stop the job.");

                let link = node.read().await.link.clone();
                if let Err(e) = link
                    .send(&MessageToNode::AbortJob {
                        job_id: job_id.to_string(),
                    })
                    .await
                {
                    // The connection died under the abort. Drop the node,
                    // which parks this job, then finish it as queued.
                    warn!(node = %node_id, "abort write failed, dropping node: {e}");
                    if !self.drop_node(node_id, None).await {
                        return Err(Error::System(format!(
                            "node `{node_id}` dropped its connection and could not be removed"
                        )));
                    }
                    self.finish_aborted_job(job_id).await?;
                }

                self.notify_single_job(job_id).await;
                Ok(true)
            }
            JobStatus::Done => Err(Error::Invariant(format!(
                "job `{job_id}` is done but still in the registry"
            ))),
        }
    }

    /// Terminal path for a job that never reached a node (or was parked back
    /// off one): persist the abort result, keep the logs.
    async fn finish_aborted_job(&self, job_id: &str) -> Result<(), Error> {
        let Some(job) = self.jobs.remove(job_id).await else {
            return Ok(());
        };

        let mut job = job.write().await;
        job.push_system_log(JOB_ABORT_MESSAGE);
        self.store.add_logs(&job.logs)?;

        self.store.save_result(&ResultRow {
            job_id: job_id.to_string(),
            success: false,
            content: JOB_ABORT_MESSAGE.as_bytes().to_vec(),
            content_type: ContentType::PlainString,
            created: Utc::now(),
        })?;

        job.status = JobStatus::Done;
        info!(job = %job_id, "job aborted");
        Ok(())
    }

    /// Put a job whose node disappeared back into the queue. Progress,
    /// interpreter state, runtime and logs survive so the next dispatch
    /// resumes where the node left off.
    pub async fn park_job(&self, job_id: &str) -> Result<(), Error> {
        let Some(job) = self.jobs.get(job_id).await else {
            return Err(Error::NotFound(format!("cannot park job `{job_id}`")));
        };

        let mut job = job.write().await;
        if job.status == JobStatus::Queued {
            return Ok(());
        }

        job.status = JobStatus::Queued;
        job.worker_node = None;
        job.last_runtime_increment = Utc::now();

        info!(job = %job_id, progress = job.progress, "job parked back into the queue");
        Ok(())
    }

    // --- API reads ---

    pub async fn list_api_jobs(&self) -> Result<Vec<ApiJob>, Error> {
        let rows = self.store.list_jobs()?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(self.enrich_job(row.job, row.result, false).await?);
        }
        Ok(jobs)
    }

    pub async fn get_api_job(&self, id: &str, with_logs: bool) -> Result<Option<ApiJob>, Error> {
        let Some(row) = self.store.get_job(id)? else {
            return Ok(None);
        };
        Ok(Some(self.enrich_job(row.job, row.result, with_logs).await?))
    }

    /// Overlay live registry state onto a durable row. Finished jobs fall
    /// back to the persisted logs.
    async fn enrich_job(
        &self,
        row: JobRow,
        result: Option<ResultRow>,
        with_logs: bool,
    ) -> Result<ApiJob, Error> {
        let (status, progress, live_logs) = match self.jobs.get(&row.id).await {
            Some(job) => {
                let job = job.read().await;
                let logs = with_logs.then(|| job.logs.clone());
                (job.status, job.progress, logs)
            }
            None => (JobStatus::Done, 1.0, None),
        };

        let logs = match live_logs {
            Some(logs) => logs,
            None if with_logs => self.store.last_logs(LOGS_PER_JOB, &row.id)?,
            None => Vec::new(),
        };

        Ok(ApiJob {
            id: row.id,
            name: row.name,
            submitted: row.submitted,
            wasm_hash: row.wasm_hash,
            dataset_id: row.dataset_id,
            owner: row.owner,
            status,
            progress,
            logs,
            result,
        })
    }
}

/// How many persisted log lines a single-job read returns.
const LOGS_PER_JOB: u32 = 100;
