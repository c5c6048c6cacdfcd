//! In-memory fakes for tests.
//!
//! These mirror the conditional-write semantics of the Postgres
//! implementations closely enough that lifecycle and claim races can be
//! exercised without a database. Everything mutates under a single lock per
//! store, so a claim is atomic exactly like its SQL counterpart.

use crate::errors::RuntimeError;
use crate::runtime::{RuntimeTaskState, TaskRuntime, TaskSpec};
use crate::storage::{
    DeliveryStatus, DeliveryStorage, Job, JobFilter, JobStatus, JobStorage, StorageResult,
    Webhook, WebhookDelivery, WebhookStorage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryJobStorage {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl InMemoryJobStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStorage for InMemoryJobStorage {
    async fn create_job(&self, job: &Job) -> StorageResult<()> {
        self.jobs.lock().insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> StorageResult<Option<Job>> {
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn get_job_by_handle(&self, handle: &str) -> StorageResult<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .values()
            .find(|job| job.task_handle == handle)
            .cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StorageResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .values()
            .filter(|job| filter.job_type.is_none_or(|t| job.job_type == t))
            .filter(|job| filter.status.is_none_or(|s| job.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(filter.limit);
        Ok(jobs)
    }

    async fn mark_started(&self, handle: &str, at: DateTime<Utc>) -> StorageResult<bool> {
        let mut jobs = self.jobs.lock();
        match jobs
            .values_mut()
            .find(|job| job.task_handle == handle && job.status == JobStatus::Pending)
        {
            Some(job) => {
                job.status = JobStatus::Started;
                job.started_at = Some(at);
                job.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        handle: &str,
        progress: f64,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut jobs = self.jobs.lock();
        match jobs
            .values_mut()
            .find(|job| job.task_handle == handle && job.status == JobStatus::Started)
        {
            Some(job) => {
                job.progress = job.progress.max(progress);
                job.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_success(
        &self,
        handle: &str,
        result: &Value,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut jobs = self.jobs.lock();
        match jobs
            .values_mut()
            .find(|job| job.task_handle == handle && !job.status.is_terminal())
        {
            Some(job) => {
                job.status = JobStatus::Success;
                job.result = Some(result.clone());
                job.progress = 100.0;
                job.finished_at = Some(at);
                job.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_failure(
        &self,
        handle: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut jobs = self.jobs.lock();
        match jobs
            .values_mut()
            .find(|job| job.task_handle == handle && !job.status.is_terminal())
        {
            Some(job) => {
                job.status = JobStatus::Failure;
                job.error = Some(error.to_string());
                job.finished_at = Some(at);
                job.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_revoked(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<bool> {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&id).filter(|job| !job.status.is_terminal()) {
            Some(job) => {
                job.status = JobStatus::Revoked;
                job.finished_at = Some(at);
                job.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reconcile_status(
        &self,
        id: Uuid,
        status: JobStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut jobs = self.jobs.lock();
        match jobs
            .get_mut(&id)
            .filter(|job| !job.status.is_terminal() && job.status != status)
        {
            Some(job) => {
                job.status = status;
                if status == JobStatus::Success {
                    job.progress = 100.0;
                }
                if status == JobStatus::Started && job.started_at.is_none() {
                    job.started_at = Some(at);
                }
                if status.is_terminal() && job.finished_at.is_none() {
                    job.finished_at = Some(at);
                }
                job.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryWebhookStorage {
    webhooks: Mutex<HashMap<Uuid, Webhook>>,
}

impl InMemoryWebhookStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookStorage for InMemoryWebhookStorage {
    async fn create_webhook(&self, webhook: &Webhook) -> StorageResult<()> {
        self.webhooks.lock().insert(webhook.id, webhook.clone());
        Ok(())
    }

    async fn get_webhook(&self, id: Uuid) -> StorageResult<Option<Webhook>> {
        Ok(self.webhooks.lock().get(&id).cloned())
    }

    async fn list_webhooks(&self, is_active: Option<bool>) -> StorageResult<Vec<Webhook>> {
        let mut webhooks: Vec<Webhook> = self
            .webhooks
            .lock()
            .values()
            .filter(|webhook| is_active.is_none_or(|active| webhook.is_active == active))
            .cloned()
            .collect();
        webhooks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(webhooks)
    }

    async fn update_webhook(&self, webhook: &Webhook) -> StorageResult<()> {
        self.webhooks.lock().insert(webhook.id, webhook.clone());
        Ok(())
    }

    async fn delete_webhook(&self, id: Uuid) -> StorageResult<()> {
        self.webhooks.lock().remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDeliveryStorage {
    deliveries: Mutex<HashMap<Uuid, WebhookDelivery>>,
}

impl InMemoryDeliveryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStorage for InMemoryDeliveryStorage {
    async fn create_delivery(&self, delivery: &WebhookDelivery) -> StorageResult<()> {
        self.deliveries.lock().insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn get_delivery(&self, id: Uuid) -> StorageResult<Option<WebhookDelivery>> {
        Ok(self.deliveries.lock().get(&id).cloned())
    }

    async fn list_deliveries(
        &self,
        webhook_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> StorageResult<Vec<WebhookDelivery>> {
        let mut deliveries: Vec<WebhookDelivery> = self
            .deliveries
            .lock()
            .values()
            .filter(|d| d.webhook_id == webhook_id)
            .filter(|d| status.is_none_or(|s| d.status == s))
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        deliveries.truncate(limit);
        Ok(deliveries)
    }

    async fn claim_attempt(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        due_before: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<WebhookDelivery>> {
        let mut deliveries = self.deliveries.lock();
        let Some(delivery) = deliveries.get_mut(&id) else {
            return Ok(None);
        };

        let eligible = match due_before {
            Some(due) => {
                delivery.status == DeliveryStatus::Retrying
                    && delivery.next_retry_at.is_some_and(|at| at <= due)
            }
            None => delivery.status != DeliveryStatus::Success,
        };
        if !eligible {
            return Ok(None);
        }

        let first_attempt = delivery.attempt_count == 0;
        delivery.attempt_count += 1;
        delivery.status = if first_attempt {
            DeliveryStatus::Pending
        } else {
            DeliveryStatus::Retrying
        };
        delivery.next_retry_at = None;
        delivery.updated_at = now;
        Ok(Some(delivery.clone()))
    }

    async fn record_success(
        &self,
        id: Uuid,
        response_status_code: i32,
        response_body: Option<String>,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        if let Some(delivery) = self.deliveries.lock().get_mut(&id) {
            delivery.status = DeliveryStatus::Success;
            delivery.response_status_code = Some(response_status_code);
            delivery.response_body = response_body;
            delivery.error_message = None;
            delivery.delivered_at = Some(at);
            delivery.next_retry_at = None;
            delivery.updated_at = at;
        }
        Ok(())
    }

    async fn record_retry(
        &self,
        id: Uuid,
        next_retry_at: DateTime<Utc>,
        response_status_code: Option<i32>,
        response_body: Option<String>,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        if let Some(delivery) = self.deliveries.lock().get_mut(&id) {
            delivery.status = DeliveryStatus::Retrying;
            delivery.next_retry_at = Some(next_retry_at);
            delivery.response_status_code = response_status_code;
            delivery.response_body = response_body;
            delivery.error_message = Some(error_message.to_string());
            delivery.updated_at = at;
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        response_status_code: Option<i32>,
        response_body: Option<String>,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        if let Some(delivery) = self.deliveries.lock().get_mut(&id) {
            delivery.status = DeliveryStatus::Failed;
            delivery.next_retry_at = None;
            delivery.response_status_code = response_status_code;
            delivery.response_body = response_body;
            delivery.error_message = Some(error_message.to_string());
            delivery.updated_at = at;
        }
        Ok(())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> StorageResult<Vec<Uuid>> {
        let mut due: Vec<(DateTime<Utc>, Uuid)> = self
            .deliveries
            .lock()
            .values()
            .filter(|d| d.status == DeliveryStatus::Retrying)
            .filter_map(|d| d.next_retry_at.filter(|at| *at <= now).map(|at| (at, d.id)))
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }
}

#[derive(Default)]
struct FakeRuntimeState {
    states: HashMap<String, RuntimeTaskState>,
    submitted: Vec<(String, TaskSpec)>,
    revoked: Vec<(String, bool)>,
    unavailable: bool,
    counter: u64,
}

/// Scripted task runtime for tracker tests: states are set by hand, and
/// availability can be toggled to exercise soft-failure reconciles.
#[derive(Default)]
pub struct FakeTaskRuntime {
    state: Mutex<FakeRuntimeState>,
}

impl FakeTaskRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, handle: &str, state: RuntimeTaskState) {
        self.state.lock().states.insert(handle.to_string(), state);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn submitted(&self) -> Vec<(String, TaskSpec)> {
        self.state.lock().submitted.clone()
    }

    pub fn revoked(&self) -> Vec<(String, bool)> {
        self.state.lock().revoked.clone()
    }
}

#[async_trait]
impl TaskRuntime for FakeTaskRuntime {
    async fn submit(&self, spec: TaskSpec) -> Result<String, RuntimeError> {
        let mut state = self.state.lock();
        state.counter += 1;
        let handle = format!("fake-task-{}", state.counter);
        state
            .states
            .insert(handle.clone(), RuntimeTaskState::Pending);
        state.submitted.push((handle.clone(), spec));
        Ok(handle)
    }

    async fn query_state(&self, handle: &str) -> Result<RuntimeTaskState, RuntimeError> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(RuntimeError::Unavailable {
                details: "runtime offline".to_string(),
            });
        }
        state
            .states
            .get(handle)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownHandle {
                handle: handle.to_string(),
            })
    }

    async fn revoke(&self, handle: &str, terminate: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.revoked.push((handle.to_string(), terminate));
        if let Some(task_state) = state.states.get_mut(handle) {
            if *task_state == RuntimeTaskState::Pending {
                *task_state = RuntimeTaskState::Revoked;
            }
        }
        Ok(())
    }
}
