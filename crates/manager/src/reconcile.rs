use chrono::Utc;
use tracing::{debug, info, warn};

use reef_core::ids::NodeId;
use reef_core::types::{ContentType, JobStatus, LogKind, LogRow, ResultRow};
use reef_core::Error;
use reef_protocol::message::{JobResult, StateSync};

use crate::manager::Manager;

impl Manager {
    /// Apply a state sync from a node: append logs, update progress and the
    /// interpreter snapshot, promote `starting` to `running` on first sight.
    ///
    /// A sync addressing an idle worker is dropped silently: it raced the
    /// job's own result. A sync for an unknown node or an out-of-range
    /// worker is a protocol violation and kills the session.
    pub async fn state_sync(&self, node_id: NodeId, sync: StateSync) -> Result<(), Error> {
        let Some(node) = self.nodes.get(node_id).await else {
            return Err(Error::Protocol(format!(
                "state sync from unknown node `{node_id}`"
            )));
        };

        let job_id = {
            let node = node.read().await;
            match node.job_at(sync.worker_index)? {
                Some(job_id) => job_id,
                None => {
                    debug!(
                        node = %node_id,
                        worker = sync.worker_index,
                        "state sync for an idle worker, ignoring"
                    );
                    return Ok(());
                }
            }
        };

        // Validate every log kind before anything becomes visible.
        let now = Utc::now();
        let mut log_rows = Vec::with_capacity(sync.logs.len());
        for record in sync.logs {
            let kind = LogKind::try_from(record.log_kind)
                .map_err(|k| Error::Protocol(format!("invalid log kind `{k}`")))?;
            log_rows.push(LogRow {
                kind,
                created: now,
                content: record.content,
                job_id: job_id.clone(),
            });
        }

        let Some(job) = self.jobs.get(&job_id).await else {
            debug!(job = %job_id, "state sync for a job no longer in the registry");
            return Ok(());
        };

        {
            let mut job = job.write().await;
            job.logs.extend(log_rows);
            // Progress never goes backwards while the job is alive.
            job.progress = job.progress.max(sync.progress);
            job.interpreter_state = sync.interpreter_state;

            if job.status == JobStatus::Starting {
                job.status = JobStatus::Running;
                debug!(job = %job_id, "job is now running");
            }
        }

        debug!(
            job = %job_id,
            worker = sync.worker_index,
            progress = sync.progress,
            "state sync applied"
        );

        self.notify_single_job(&job_id).await;
        Ok(())
    }

    /// Apply the terminal result for a job: persist it (once), flush the
    /// accumulated logs, free the worker slot and retire the job.
    pub async fn apply_result(&self, node_id: NodeId, result: JobResult) -> Result<(), Error> {
        let Some(node) = self.nodes.get(node_id).await else {
            return Err(Error::Protocol(format!(
                "result from unknown node `{node_id}`"
            )));
        };

        let job_id = {
            let node = node.read().await;
            node.job_at(result.worker_index)?.ok_or_else(|| {
                Error::Protocol(format!(
                    "result for idle worker {} on node `{node_id}`",
                    result.worker_index
                ))
            })?
        };

        let content_type = ContentType::try_from(result.content_type)
            .map_err(|t| Error::Protocol(format!("invalid result content type `{t}`")))?;

        if self.store.get_result(&job_id)?.is_some() {
            return Err(Error::Protocol(format!(
                "result for job `{job_id}` already exists"
            )));
        }

        let mut contents = result.contents;
        if content_type == ContentType::Int64 && contents.len() < 8 {
            warn!(
                job = %job_id,
                len = contents.len(),
                "int64 result shorter than 8 bytes, zero-padding"
            );
            contents.resize(8, 0);
        }

        self.store.save_result(&ResultRow {
            job_id: job_id.clone(),
            success: result.success,
            content: contents,
            content_type,
            created: Utc::now(),
        })?;

        node.write().await.release_slot(result.worker_index);

        let Some(job) = self.jobs.remove(&job_id).await else {
            return Err(Error::Invariant(format!(
                "job `{job_id}` sat in a worker slot but not in the registry"
            )));
        };

        {
            let mut job = job.write().await;
            self.store.add_logs(&job.logs)?;
            // For anyone still holding the entry.
            job.status = JobStatus::Done;
            job.progress = 1.0;
        }

        info!(
            job = %job_id,
            success = result.success,
            "job finished"
        );

        self.notify_single_job(&job_id).await;
        self.notify_nodes().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Job;
    use crate::testutil::{connect_node, test_manager, test_row, RecordingLink};
    use reef_protocol::message::LogRecord;
    use std::sync::Arc;

    async fn running_job(manager: &Manager, id: &str, node_name: &str) -> NodeId {
        let link = Arc::new(RecordingLink::new());
        let node_id = connect_node(manager, node_name, 2, link).await;

        let row = test_row(id);
        manager.store.add_job(&row).unwrap();
        let mut job = Job::new_queued(row);
        job.status = JobStatus::Starting;
        job.worker_node = Some(node_id);
        manager.jobs.insert(job).await;

        let node = manager.nodes.get(node_id).await.unwrap();
        node.write().await.claim_slot(0, id.to_string()).unwrap();
        node_id
    }

    fn sync(worker_index: u16, progress: f32, logs: Vec<LogRecord>) -> StateSync {
        StateSync {
            worker_index,
            progress,
            interpreter_state: vec![0x01],
            logs,
        }
    }

    #[tokio::test]
    async fn first_sync_promotes_starting_to_running() {
        let (manager, _dirs) = test_manager().await;
        let node_id = running_job(&manager, "job-1", "alpha").await;

        manager
            .state_sync(
                node_id,
                sync(
                    0,
                    0.5,
                    vec![LogRecord {
                        log_kind: 0,
                        content: "half".to_string(),
                    }],
                ),
            )
            .await
            .unwrap();

        let job = manager.jobs.get("job-1").await.unwrap();
        let job = job.read().await;
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 0.5);
        assert_eq!(job.interpreter_state, vec![0x01]);
        assert_eq!(job.logs.len(), 1);
        assert_eq!(job.logs[0].content, "half");
        assert_eq!(job.logs[0].kind, LogKind::Program);
    }

    #[tokio::test]
    async fn progress_never_regresses() {
        let (manager, _dirs) = test_manager().await;
        let node_id = running_job(&manager, "job-1", "alpha").await;

        manager.state_sync(node_id, sync(0, 0.6, vec![])).await.unwrap();
        manager.state_sync(node_id, sync(0, 0.4, vec![])).await.unwrap();

        let job = manager.jobs.get("job-1").await.unwrap();
        assert_eq!(job.read().await.progress, 0.6);
    }

    #[tokio::test]
    async fn sync_validation() {
        let (manager, _dirs) = test_manager().await;
        let node_id = running_job(&manager, "job-1", "alpha").await;

        // Unknown node is fatal.
        let ghost = NodeId::derive("10.9.9.9", "ghost");
        let err = manager.state_sync(ghost, sync(0, 0.1, vec![])).await.unwrap_err();
        assert!(err.is_session_fatal());

        // Worker index out of range is fatal.
        let err = manager.state_sync(node_id, sync(9, 0.1, vec![])).await.unwrap_err();
        assert!(err.is_session_fatal());

        // Idle worker raced a result: silently ignored.
        manager.state_sync(node_id, sync(1, 0.1, vec![])).await.unwrap();

        // Unknown log kind is fatal.
        let err = manager
            .state_sync(
                node_id,
                sync(
                    0,
                    0.1,
                    vec![LogRecord {
                        log_kind: 99,
                        content: "?".to_string(),
                    }],
                ),
            )
            .await
            .unwrap_err();
        assert!(err.is_session_fatal());
    }

    #[tokio::test]
    async fn result_retires_the_job() {
        let (manager, _dirs) = test_manager().await;
        let node_id = running_job(&manager, "job-1", "alpha").await;

        manager
            .state_sync(
                node_id,
                sync(
                    0,
                    0.5,
                    vec![LogRecord {
                        log_kind: 0,
                        content: "half".to_string(),
                    }],
                ),
            )
            .await
            .unwrap();

        manager
            .apply_result(
                node_id,
                JobResult {
                    worker_index: 0,
                    success: true,
                    content_type: ContentType::Int64.as_u16(),
                    contents: vec![0x2a, 0, 0, 0, 0, 0, 0, 0],
                },
            )
            .await
            .unwrap();

        // Result persisted, logs flushed, job gone, slot free.
        let result = manager.store.get_result("job-1").unwrap().unwrap();
        assert!(result.success);
        assert_eq!(result.content[0], 0x2a);

        let logs = manager.store.last_logs(10, "job-1").unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].content, "half");

        assert!(!manager.jobs.contains("job-1").await);
        let node = manager.nodes.get(node_id).await.unwrap();
        assert_eq!(node.read().await.worker_state[0], None);

        // A sync that raced the result is dropped without error.
        manager.state_sync(node_id, sync(0, 0.9, vec![])).await.unwrap();
    }

    #[tokio::test]
    async fn short_int64_results_are_zero_padded() {
        let (manager, _dirs) = test_manager().await;
        let node_id = running_job(&manager, "job-1", "alpha").await;

        manager
            .apply_result(
                node_id,
                JobResult {
                    worker_index: 0,
                    success: true,
                    content_type: ContentType::Int64.as_u16(),
                    contents: vec![0x2a],
                },
            )
            .await
            .unwrap();

        let result = manager.store.get_result("job-1").unwrap().unwrap();
        assert_eq!(result.content, vec![0x2a, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn duplicate_and_misaddressed_results_are_fatal() {
        let (manager, _dirs) = test_manager().await;
        let node_id = running_job(&manager, "job-1", "alpha").await;

        let ok = JobResult {
            worker_index: 0,
            success: false,
            content_type: ContentType::PlainString.as_u16(),
            contents: b"boom".to_vec(),
        };

        // Result for an idle slot is rejected.
        let idle = JobResult {
            worker_index: 1,
            ..ok.clone()
        };
        let err = manager.apply_result(node_id, idle).await.unwrap_err();
        assert!(err.is_session_fatal());

        // Bad worker index is rejected.
        let oob = JobResult {
            worker_index: 7,
            ..ok.clone()
        };
        let err = manager.apply_result(node_id, oob).await.unwrap_err();
        assert!(err.is_session_fatal());

        // Bad content type is rejected.
        let bad_ct = JobResult {
            content_type: 42,
            ..ok.clone()
        };
        let err = manager.apply_result(node_id, bad_ct).await.unwrap_err();
        assert!(err.is_session_fatal());

        manager.apply_result(node_id, ok.clone()).await.unwrap();

        // The slot is free now, so a replay addresses an idle worker.
        let err = manager.apply_result(node_id, ok).await.unwrap_err();
        assert!(err.is_session_fatal());
    }

    #[tokio::test]
    async fn duplicate_result_row_is_rejected_while_slot_is_busy() {
        let (manager, _dirs) = test_manager().await;
        let node_id = running_job(&manager, "job-1", "alpha").await;

        // A result row already exists (e.g. written by an abort path).
        manager
            .store
            .save_result(&ResultRow {
                job_id: "job-1".to_string(),
                success: false,
                content: Vec::new(),
                content_type: ContentType::PlainString,
                created: Utc::now(),
            })
            .unwrap();

        let err = manager
            .apply_result(
                node_id,
                JobResult {
                    worker_index: 0,
                    success: true,
                    content_type: ContentType::PlainString.as_u16(),
                    contents: b"late".to_vec(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
