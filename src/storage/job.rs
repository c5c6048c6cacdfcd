//! Job records tracking background computations.
//!
//! A job bridges the fire-and-forget task runtime with a durable status
//! record that can be polled over the API. Every status write is a single
//! conditional UPDATE so that a worker's completion racing a concurrent
//! cancel or reconcile cannot produce a lost update: whichever write reaches
//! a terminal status first wins, and later writes become no-ops.

use super::StorageResult;
use crate::errors::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::str::FromStr;
use tracing::error;
use uuid::Uuid;

/// Lifecycle states of a job.
///
/// `Success`, `Failure`, and `Revoked` are terminal: once reached, no field
/// except `updated_at` may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Started,
    Success,
    Failure,
    Revoked,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Revoked => "revoked",
        }
    }
}

impl FromStr for JobStatus {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "revoked" => Ok(Self::Revoked),
            other => Err(StorageError::InvalidStoredData {
                details: format!("unknown job status: {}", other),
            }),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SlaComputation,
    BulkSlaComputation,
    WebhookDispatch,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlaComputation => "sla_computation",
            Self::BulkSlaComputation => "bulk_sla_computation",
            Self::WebhookDispatch => "webhook_dispatch",
        }
    }
}

impl FromStr for JobType {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sla_computation" => Ok(Self::SlaComputation),
            "bulk_sla_computation" => Ok(Self::BulkSlaComputation),
            "webhook_dispatch" => Ok(Self::WebhookDispatch),
            other => Err(StorageError::InvalidStoredData {
                details: format!("unknown job type: {}", other),
            }),
        }
    }
}

/// Durable record for one submitted unit of background work.
///
/// Invariants:
/// - `result` and `error` are mutually exclusive
/// - `progress == 100.0` iff `status == Success`
/// - a terminal job never changes again except for `updated_at`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,

    /// Opaque handle correlating this record with its execution inside the
    /// external task runtime. Unique, assigned at submission.
    pub task_handle: String,

    pub job_type: JobType,
    pub status: JobStatus,

    /// Serialized input parameters, fixed at enqueue time.
    pub payload: Option<Value>,

    /// Serialized output, present only in terminal `Success`.
    pub result: Option<Value>,

    /// Failure description, present only in terminal `Failure`.
    pub error: Option<String>,

    /// 0.0 - 100.0, monotonically non-decreasing while non-terminal.
    pub progress: f64,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a fresh `Pending` job record at enqueue time.
    pub fn new(job_type: JobType, task_handle: String, payload: Option<Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_handle,
            job_type,
            status: JobStatus::Pending,
            payload,
            result: None,
            error: None,
            progress: 0.0,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filter for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub limit: usize,
}

/// Storage trait for job persistence.
///
/// The conditional transition methods return `true` when the write applied
/// and `false` when the guard rejected it (job missing or already past the
/// source state), which callers treat as an idempotent no-op.
#[async_trait]
pub trait JobStorage: Send + Sync {
    async fn create_job(&self, job: &Job) -> StorageResult<()>;

    async fn get_job(&self, id: Uuid) -> StorageResult<Option<Job>>;

    async fn get_job_by_handle(&self, handle: &str) -> StorageResult<Option<Job>>;

    async fn list_jobs(&self, filter: &JobFilter) -> StorageResult<Vec<Job>>;

    /// `Pending -> Started`, setting `started_at`.
    async fn mark_started(&self, handle: &str, at: DateTime<Utc>) -> StorageResult<bool>;

    /// Progress write, valid only in `Started`. The stored value never
    /// decreases; callers clamp the reported value to at most 99.0.
    async fn update_progress(
        &self,
        handle: &str,
        progress: f64,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Non-terminal -> `Success`, setting `result`, `progress = 100.0`,
    /// and `finished_at`.
    async fn mark_success(
        &self,
        handle: &str,
        result: &Value,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Non-terminal -> `Failure`, setting `error` and `finished_at`.
    async fn mark_failure(
        &self,
        handle: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Non-terminal -> `Revoked`, setting `finished_at`. Keyed by job id
    /// because cancellation arrives through the API, not the worker.
    async fn mark_revoked(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<bool>;

    /// Reconciliation write: persists a status reported by the task runtime,
    /// only if the job is non-terminal and the status actually differs.
    /// Repairs the progress/timestamp invariants for the new status so a
    /// runtime-reported `Success` still satisfies `progress == 100.0`.
    async fn reconcile_status(
        &self,
        id: Uuid,
        status: JobStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;
}

#[async_trait]
impl<T: JobStorage + ?Sized> JobStorage for std::sync::Arc<T> {
    async fn create_job(&self, job: &Job) -> StorageResult<()> {
        self.as_ref().create_job(job).await
    }

    async fn get_job(&self, id: Uuid) -> StorageResult<Option<Job>> {
        self.as_ref().get_job(id).await
    }

    async fn get_job_by_handle(&self, handle: &str) -> StorageResult<Option<Job>> {
        self.as_ref().get_job_by_handle(handle).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StorageResult<Vec<Job>> {
        self.as_ref().list_jobs(filter).await
    }

    async fn mark_started(&self, handle: &str, at: DateTime<Utc>) -> StorageResult<bool> {
        self.as_ref().mark_started(handle, at).await
    }

    async fn update_progress(
        &self,
        handle: &str,
        progress: f64,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.as_ref().update_progress(handle, progress, at).await
    }

    async fn mark_success(
        &self,
        handle: &str,
        result: &Value,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.as_ref().mark_success(handle, result, at).await
    }

    async fn mark_failure(
        &self,
        handle: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.as_ref().mark_failure(handle, error, at).await
    }

    async fn mark_revoked(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<bool> {
        self.as_ref().mark_revoked(id, at).await
    }

    async fn reconcile_status(
        &self,
        id: Uuid,
        status: JobStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.as_ref().reconcile_status(id, status, at).await
    }
}

pub struct PostgresJobStorage {
    pool: PgPool,
}

impl PostgresJobStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> StorageResult<Job> {
    Ok(Job {
        id: row.get("id"),
        task_handle: row.get("task_handle"),
        job_type: row.get::<String, _>("job_type").parse()?,
        status: row.get::<String, _>("status").parse()?,
        payload: row.get("payload"),
        result: row.get("result"),
        error: row.get("error"),
        progress: row.get("progress"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const JOB_COLUMNS: &str = "id, task_handle, job_type, status, payload, result, error, \
                           progress, started_at, finished_at, created_at, updated_at";

#[async_trait]
impl JobStorage for PostgresJobStorage {
    async fn create_job(&self, job: &Job) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, task_handle, job_type, status, payload, progress,
                              created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id)
        .bind(&job.task_handle)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.payload)
        .bind(job.progress)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, job_id = %job.id, "Failed to create job");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> StorageResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed { source: e })?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn get_job_by_handle(&self, handle: &str) -> StorageResult<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE task_handle = $1",
            JOB_COLUMNS
        ))
        .bind(handle)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StorageResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM jobs
            WHERE ($1::text IS NULL OR job_type = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
            JOB_COLUMNS
        ))
        .bind(filter.job_type.map(|t| t.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        rows.iter().map(job_from_row).collect()
    }

    async fn mark_started(&self, handle: &str, at: DateTime<Utc>) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'started', started_at = $2, updated_at = $2
            WHERE task_handle = $1 AND status = 'pending'
            "#,
        )
        .bind(handle)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        handle: &str,
        progress: f64,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        // GREATEST keeps stored progress monotonic even if workers report
        // out of order.
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET progress = GREATEST(progress, $2), updated_at = $3
            WHERE task_handle = $1 AND status = 'started'
            "#,
        )
        .bind(handle)
        .bind(progress)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_success(
        &self,
        handle: &str,
        result: &Value,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'success', result = $2, progress = 100.0,
                finished_at = $3, updated_at = $3
            WHERE task_handle = $1
              AND status NOT IN ('success', 'failure', 'revoked')
            "#,
        )
        .bind(handle)
        .bind(result)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn mark_failure(
        &self,
        handle: &str,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failure', error = $2, finished_at = $3, updated_at = $3
            WHERE task_handle = $1
              AND status NOT IN ('success', 'failure', 'revoked')
            "#,
        )
        .bind(handle)
        .bind(error_message)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn mark_revoked(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'revoked', finished_at = $2, updated_at = $2
            WHERE id = $1
              AND status NOT IN ('success', 'failure', 'revoked')
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn reconcile_status(
        &self,
        id: Uuid,
        status: JobStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                progress = CASE WHEN $2 = 'success' THEN 100.0 ELSE progress END,
                started_at = CASE WHEN $2 = 'started'
                             THEN COALESCE(started_at, $3) ELSE started_at END,
                finished_at = CASE WHEN $2 IN ('success', 'failure', 'revoked')
                              THEN COALESCE(finished_at, $3) ELSE finished_at END,
                updated_at = $3
            WHERE id = $1
              AND status NOT IN ('success', 'failure', 'revoked')
              AND status <> $2
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(outcome.rows_affected() > 0)
    }
}
