use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, trace};

use reef_core::types::JobStatus;
use reef_core::Error;

use crate::manager::Manager;

/// How often the housekeeper runs.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(2);

/// Periodic housekeeping: start queued jobs and enforce the runtime cap.
/// Only store/system faults escape this loop; the caller treats them as
/// fatal for the whole process.
pub async fn run(manager: Arc<Manager>) -> Result<(), Error> {
    info!("housekeeper running");
    let mut tick = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        trace!("housekeeping iteration");
        if let Err(e) = manager.start_queued_jobs().await {
            // Session-level trouble is contained by dropping the session;
            // store faults are not survivable.
            if !e.is_session_fatal() {
                return Err(e);
            }
            error!("dispatch failed: {e}");
        }
        manager.enforce_runtime_cap().await?;
    }
}

impl Manager {
    /// Account active runtime for every running job and abort the ones over
    /// the configured cap. Each job is aborted at most once.
    pub async fn enforce_runtime_cap(&self) -> Result<(), Error> {
        let max = self.config.max_job_runtime_secs;
        let mut over_budget = Vec::new();

        for (job_id, job) in self.jobs.entries().await {
            let mut job = job.write().await;
            if job.status != JobStatus::Running {
                continue;
            }

            let now = Utc::now();
            let elapsed = (now - job.last_runtime_increment).num_seconds().max(0) as u64;
            job.runtime_secs += elapsed;
            job.last_runtime_increment = now;
            trace!(job = %job_id, runtime = job.runtime_secs, "runtime accounted");

            if job.runtime_secs > max {
                if job.is_being_aborted {
                    debug!(job = %job_id, "over the runtime cap but already being aborted");
                    continue;
                }
                job.is_being_aborted = true;
                job.push_system_log(format!(
                    "Maximum allowed runtime of {max} seconds was exceeded, this job will be terminated."
                ));
                over_budget.push(job_id);
            }
        }

        for job_id in over_budget {
            debug!(job = %job_id, "aborting job over the runtime cap");
            match self.abort_job(&job_id).await {
                Ok(true) => {}
                Ok(false) => debug!(job = %job_id, "job disappeared before the abort"),
                // Session-level trouble only affects that node; store faults
                // have to stop the housekeeper.
                Err(e) if e.is_session_fatal() => {
                    error!(job = %job_id, "abort failed: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}
