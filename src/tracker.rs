//! Job lifecycle tracker.
//!
//! Bridges the fire-and-forget task runtime with the durable job records
//! served over the API. Workers report transitions by task handle as they
//! run; readers get a record reconciled against the runtime's live view,
//! with runtime outages degraded to a warning instead of an error.

use crate::errors::{RuntimeError, TrackerError};
use crate::runtime::{RuntimeTaskState, TaskRuntime, TaskSpec};
use crate::storage::{Job, JobFilter, JobStatus, JobStorage, JobType};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Upper bound for worker-reported progress. 100.0 is reserved for the
/// terminal success write so a poller never sees a "complete" progress bar
/// on a job that can still fail.
const PROGRESS_CEILING: f64 = 99.0;

fn status_for(state: RuntimeTaskState) -> JobStatus {
    match state {
        RuntimeTaskState::Pending => JobStatus::Pending,
        RuntimeTaskState::Started => JobStatus::Started,
        RuntimeTaskState::Success => JobStatus::Success,
        RuntimeTaskState::Failure => JobStatus::Failure,
        RuntimeTaskState::Revoked => JobStatus::Revoked,
    }
}

pub struct JobTracker {
    jobs: Arc<dyn JobStorage>,
    runtime: Arc<dyn TaskRuntime>,
}

impl JobTracker {
    pub fn new(jobs: Arc<dyn JobStorage>, runtime: Arc<dyn TaskRuntime>) -> Self {
        Self { jobs, runtime }
    }

    /// Submits the task to the runtime and creates the pending record.
    #[instrument(skip(self, spec), fields(task_name = %spec.task_name))]
    pub async fn enqueue(&self, job_type: JobType, spec: TaskSpec) -> Result<Job, TrackerError> {
        let payload = spec.args.clone();
        let handle = self.runtime.submit(spec).await?;
        let job = Job::new(job_type, handle, Some(payload));
        self.jobs.create_job(&job).await?;
        info!(job_id = %job.id, task_handle = %job.task_handle, "Job enqueued");
        Ok(job)
    }

    /// Worker-reported `Pending -> Started`. A no-op if the job already
    /// moved on, which happens when a runtime retry re-enters the body.
    pub async fn mark_started(&self, handle: &str) -> Result<(), TrackerError> {
        if !self.jobs.mark_started(handle, Utc::now()).await? {
            debug!(task_handle = %handle, "mark_started skipped; job not pending");
        }
        Ok(())
    }

    /// Worker-reported progress, clamped into `[0.0, 99.0]`.
    pub async fn update_progress(&self, handle: &str, progress: f64) -> Result<(), TrackerError> {
        let clamped = progress.clamp(0.0, PROGRESS_CEILING);
        if !self.jobs.update_progress(handle, clamped, Utc::now()).await? {
            debug!(task_handle = %handle, "progress skipped; job not started");
        }
        Ok(())
    }

    /// Worker-reported terminal success. A no-op against an already-terminal
    /// record, so a completion racing a cancel cannot resurrect the job.
    pub async fn mark_success(&self, handle: &str, result: &Value) -> Result<(), TrackerError> {
        if !self.jobs.mark_success(handle, result, Utc::now()).await? {
            debug!(task_handle = %handle, "mark_success skipped; job already terminal");
        }
        Ok(())
    }

    /// Worker-reported terminal failure, same no-op semantics as success.
    pub async fn mark_failure(&self, handle: &str, error: &str) -> Result<(), TrackerError> {
        if !self.jobs.mark_failure(handle, error, Utc::now()).await? {
            debug!(task_handle = %handle, "mark_failure skipped; job already terminal");
        }
        Ok(())
    }

    /// Cancels a non-terminal job.
    ///
    /// The runtime revoke is best effort and only prevents a task that has
    /// not started; the record transitions to `Revoked` either way, so the
    /// API reflects the operator's intent even when the body keeps running.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<Job, TrackerError> {
        let job = self
            .jobs
            .get_job(id)
            .await?
            .ok_or_else(|| TrackerError::NotFound { id: id.to_string() })?;

        if job.status.is_terminal() {
            return Err(TrackerError::InvalidTransition {
                id: id.to_string(),
                status: job.status.to_string(),
            });
        }

        if let Err(e) = self.runtime.revoke(&job.task_handle, false).await {
            warn!(job_id = %id, error = %e, "Runtime revoke failed; recording revocation anyway");
        }

        let applied = self.jobs.mark_revoked(id, Utc::now()).await?;
        let updated = self
            .jobs
            .get_job(id)
            .await?
            .ok_or_else(|| TrackerError::NotFound { id: id.to_string() })?;

        if !applied && updated.status != JobStatus::Revoked {
            // Lost the race against a terminal worker write.
            return Err(TrackerError::InvalidTransition {
                id: id.to_string(),
                status: updated.status.to_string(),
            });
        }

        info!(job_id = %id, "Job revoked");
        Ok(updated)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Job>, TrackerError> {
        Ok(self.jobs.get_job(id).await?)
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, TrackerError> {
        Ok(self.jobs.list_jobs(filter).await?)
    }

    /// Fetches a job and reconciles it against the runtime's live view.
    ///
    /// Returns the record plus an optional warning when the runtime could
    /// not be consulted. Terminal records are returned as stored without
    /// touching the runtime.
    pub async fn get_reconciled(
        &self,
        id: Uuid,
    ) -> Result<Option<(Job, Option<String>)>, TrackerError> {
        match self.jobs.get_job(id).await? {
            Some(job) => Ok(Some(self.reconcile(job).await?)),
            None => Ok(None),
        }
    }

    async fn reconcile(&self, job: Job) -> Result<(Job, Option<String>), TrackerError> {
        if job.status.is_terminal() {
            return Ok((job, None));
        }

        let state = match self.runtime.query_state(&job.task_handle).await {
            Ok(state) => state,
            Err(e @ (RuntimeError::Unavailable { .. } | RuntimeError::UnknownHandle { .. })) => {
                warn!(job_id = %job.id, error = %e, "Runtime state unavailable during reconcile");
                return Ok((job, Some("task runtime state unavailable".to_string())));
            }
            Err(e) => return Err(e.into()),
        };

        let reported = status_for(state);
        if reported == job.status {
            return Ok((job, None));
        }

        if self.jobs.reconcile_status(job.id, reported, Utc::now()).await? {
            debug!(
                job_id = %job.id,
                from = %job.status,
                to = %reported,
                "Reconciled job status from runtime"
            );
        }
        let refreshed = self
            .jobs
            .get_job(job.id)
            .await?
            .ok_or_else(|| TrackerError::NotFound {
                id: job.id.to_string(),
            })?;
        Ok((refreshed, None))
    }
}
