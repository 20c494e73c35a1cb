use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use reef_core::ids::JobId;
use reef_core::types::{ContentType, JobStatus, ResultRow};
use reef_core::Error;
use reef_protocol::message::{JobStart, MessageToNode};

use crate::jobs::Job;
use crate::manager::Manager;

impl Manager {
    /// Start queued jobs, earliest submission first, until the queue is
    /// empty or no node has a free slot. Errors are store/system faults and
    /// bubble up to the housekeeper.
    pub async fn start_queued_jobs(&self) -> Result<(), Error> {
        loop {
            let Some((job_id, job)) = self.jobs.earliest_queued().await else {
                debug!("job queue is empty");
                return Ok(());
            };

            debug!(job = %job_id, "attempting to start job");
            if !self.start_on_free_node(&job_id, job).await? {
                debug!(job = %job_id, "no free worker fits, leaving queued");
                return Ok(());
            }
        }
    }

    /// Try to place one queued job. Returns false when no slot fits; the job
    /// then stays queued. A job whose artifact has vanished from the cache
    /// is finished with a failure result instead of being retried.
    async fn start_on_free_node(
        &self,
        job_id: &JobId,
        job: Arc<RwLock<Job>>,
    ) -> Result<bool, Error> {
        let wasm_hash = job.read().await.row.wasm_hash.clone();

        let Some(wasm) = self.artifacts.read(&wasm_hash)? else {
            let message = format!(
                "Failed to start job `{job_id}`: compiled artifact `{wasm_hash}` is missing or empty."
            );
            warn!(job = %job_id, "{message}");
            self.fail_job_before_start(job_id, &message).await?;
            return Ok(true);
        };

        let Some(election) = self.elector.elect(&self.nodes.snapshots().await) else {
            return Ok(false);
        };
        let Some(node) = self.nodes.get(election.node_id).await else {
            // The winner disconnected between snapshot and lookup.
            return Ok(false);
        };

        let start = {
            let job = job.read().await;
            MessageToNode::StartJob(JobStart {
                worker_index: election.worker_index as u32,
                job_id: job_id.clone(),
                program_bytecode: wasm,
                dataset_id: job.row.dataset_id.clone(),
                progress: job.progress,
                interpreter_state: job.interpreter_state.clone(),
            })
        };

        let link = node.read().await.link.clone();
        if let Err(e) = link.send(&start).await {
            warn!(
                job = %job_id,
                node = %election.node_id,
                "start-job write failed, dropping node: {e}"
            );
            self.drop_node(election.node_id, None).await;
            return Ok(false);
        }

        // Bind slot and job together; node lock before job lock.
        {
            let mut node = node.write().await;
            node.claim_slot(election.worker_index, job_id.clone())?;

            let mut job = job.write().await;
            job.status = JobStatus::Starting;
            job.worker_node = Some(election.node_id);
            job.last_runtime_increment = Utc::now();
        }

        info!(
            job = %job_id,
            node = %election.node_id,
            worker = election.worker_index,
            "job starting"
        );

        self.notify_single_job(job_id).await;
        self.notify_nodes().await;
        Ok(true)
    }

    /// Terminal failure for a job that cannot be dispatched: persist a
    /// system log and a failure result carrying the same text. No retry.
    async fn fail_job_before_start(&self, job_id: &str, message: &str) -> Result<(), Error> {
        let Some(job) = self.jobs.remove(job_id).await else {
            return Ok(());
        };

        let mut job = job.write().await;
        job.push_system_log(message);
        self.store.add_logs(&job.logs)?;

        self.store.save_result(&ResultRow {
            job_id: job_id.to_string(),
            success: false,
            content: message.as_bytes().to_vec(),
            content_type: ContentType::PlainString,
            created: Utc::now(),
        })?;

        job.status = JobStatus::Done;
        drop(job);

        self.notify_single_job(job_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{connect_node, test_manager, test_row, RecordingLink};

    async fn queue_job_with_artifact(manager: &Manager, id: &str) {
        let row = test_row(id);
        manager.artifacts.write(&row.wasm_hash, &[0x00, 0x61]).unwrap();
        manager.store.add_job(&row).unwrap();
        manager.jobs.insert(Job::new_queued(row)).await;
    }

    #[tokio::test]
    async fn dispatches_to_the_free_worker() {
        let (manager, _dirs) = test_manager().await;
        let link = Arc::new(RecordingLink::new());
        let node_id = connect_node(&manager, "alpha", 1, link.clone()).await;

        queue_job_with_artifact(&manager, "job-1").await;
        manager.start_queued_jobs().await.unwrap();

        // The node received a start-job for worker 0 with fresh state.
        let sent = link.sent();
        let start = sent
            .iter()
            .find_map(|msg| match msg {
                MessageToNode::StartJob(start) => Some(start.clone()),
                _ => None,
            })
            .expect("node must receive a start-job");
        assert_eq!(start.worker_index, 0);
        assert_eq!(start.job_id, "job-1");
        assert_eq!(start.progress, 0.0);
        assert_eq!(start.program_bytecode, vec![0x00, 0x61]);

        // Slot claimed, job starting.
        let node = manager.nodes.get(node_id).await.unwrap();
        assert_eq!(node.read().await.worker_state[0], Some("job-1".to_string()));

        let job = manager.jobs.get("job-1").await.unwrap();
        let job = job.read().await;
        assert_eq!(job.status, JobStatus::Starting);
        assert_eq!(job.worker_node, Some(node_id));
    }

    #[tokio::test]
    async fn resumed_jobs_carry_their_saved_state() {
        let (manager, _dirs) = test_manager().await;
        let link = Arc::new(RecordingLink::new());
        connect_node(&manager, "alpha", 1, link.clone()).await;

        let row = test_row("job-1");
        manager.artifacts.write(&row.wasm_hash, &[0x00]).unwrap();
        manager.store.add_job(&row).unwrap();
        let mut job = Job::new_queued(row);
        job.progress = 0.5;
        job.interpreter_state = vec![0x01];
        manager.jobs.insert(job).await;

        manager.start_queued_jobs().await.unwrap();

        let sent = link.sent();
        let MessageToNode::StartJob(start) = &sent[0] else {
            panic!("expected start-job");
        };
        assert_eq!(start.progress, 0.5);
        assert_eq!(start.interpreter_state, vec![0x01]);
    }

    #[tokio::test]
    async fn job_stays_queued_without_a_free_slot() {
        let (manager, _dirs) = test_manager().await;

        queue_job_with_artifact(&manager, "job-1").await;
        manager.start_queued_jobs().await.unwrap();

        let job = manager.jobs.get("job-1").await.unwrap();
        assert_eq!(job.read().await.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn queue_drains_in_submission_order_until_slots_run_out() {
        let (manager, _dirs) = test_manager().await;
        let link = Arc::new(RecordingLink::new());
        connect_node(&manager, "alpha", 2, link.clone()).await;

        for (id, age_secs) in [("job-c", 10), ("job-a", 30), ("job-b", 20)] {
            let mut row = test_row(id);
            row.submitted = Utc::now() - chrono::Duration::seconds(age_secs);
            manager.artifacts.write(&row.wasm_hash, &[0x00]).unwrap();
            manager.store.add_job(&row).unwrap();
            manager.jobs.insert(Job::new_queued(row)).await;
        }

        manager.start_queued_jobs().await.unwrap();

        let started: Vec<String> = link
            .sent()
            .iter()
            .filter_map(|msg| match msg {
                MessageToNode::StartJob(start) => Some(start.job_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["job-a".to_string(), "job-b".to_string()]);

        let job = manager.jobs.get("job-c").await.unwrap();
        assert_eq!(job.read().await.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn missing_artifact_finishes_the_job_with_a_failure() {
        let (manager, _dirs) = test_manager().await;
        let link = Arc::new(RecordingLink::new());
        connect_node(&manager, "alpha", 1, link.clone()).await;

        // Job queued, but nothing in the artifact cache.
        let row = test_row("job-1");
        manager.store.add_job(&row).unwrap();
        manager.jobs.insert(Job::new_queued(row)).await;

        manager.start_queued_jobs().await.unwrap();

        assert!(!manager.jobs.contains("job-1").await);
        let result = manager.store.get_result("job-1").unwrap().unwrap();
        assert!(!result.success);
        assert_eq!(result.content_type, ContentType::PlainString);

        let logs = manager.store.last_logs(10, "job-1").unwrap();
        assert_eq!(logs.len(), 1);

        // The node never saw a start-job.
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn start_write_failure_drops_the_node() {
        let (manager, _dirs) = test_manager().await;
        let node_id = connect_node(&manager, "alpha", 1, Arc::new(RecordingLink::failing())).await;

        queue_job_with_artifact(&manager, "job-1").await;
        manager.start_queued_jobs().await.unwrap();

        assert!(manager.nodes.get(node_id).await.is_none());
        let job = manager.jobs.get("job-1").await.unwrap();
        let job = job.read().await;
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.worker_node.is_none());
    }
}
