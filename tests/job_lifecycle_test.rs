//! Job lifecycle behavior through the tracker, against in-memory storage
//! and a scripted runtime.

use nocwatch::errors::TrackerError;
use nocwatch::runtime::{RuntimeTaskState, TaskSpec};
use nocwatch::storage::{JobFilter, JobStatus, JobStorage, JobType};
use nocwatch::test_helpers::{FakeTaskRuntime, InMemoryJobStorage};
use nocwatch::tracker::JobTracker;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn setup() -> (JobTracker, Arc<InMemoryJobStorage>, Arc<FakeTaskRuntime>) {
    let jobs = Arc::new(InMemoryJobStorage::new());
    let runtime = Arc::new(FakeTaskRuntime::new());
    let tracker = JobTracker::new(jobs.clone(), runtime.clone());
    (tracker, jobs, runtime)
}

fn spec() -> TaskSpec {
    TaskSpec::new("sla.compute_device", json!({"device_id": "router-1"}))
}

#[tokio::test]
async fn enqueue_creates_pending_job_with_payload() {
    let (tracker, _, runtime) = setup();

    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0.0);
    assert_eq!(job.payload, Some(json!({"device_id": "router-1"})));

    let submitted = runtime.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, job.task_handle);
    assert_eq!(submitted[0].1.task_name, "sla.compute_device");
}

#[tokio::test]
async fn worker_transitions_flow_through_to_record() {
    let (tracker, _, _) = setup();
    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();

    tracker.mark_started(&job.task_handle).await.unwrap();
    let current = tracker.get(job.id).await.unwrap().unwrap();
    assert_eq!(current.status, JobStatus::Started);
    assert!(current.started_at.is_some());

    tracker
        .update_progress(&job.task_handle, 70.0)
        .await
        .unwrap();
    let current = tracker.get(job.id).await.unwrap().unwrap();
    assert_eq!(current.progress, 70.0);

    tracker
        .mark_success(&job.task_handle, &json!({"assessment": "met"}))
        .await
        .unwrap();
    let current = tracker.get(job.id).await.unwrap().unwrap();
    assert_eq!(current.status, JobStatus::Success);
    assert_eq!(current.progress, 100.0);
    assert_eq!(current.result, Some(json!({"assessment": "met"})));
    assert!(current.finished_at.is_some());
}

#[tokio::test]
async fn progress_is_clamped_and_monotonic() {
    let (tracker, _, _) = setup();
    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();
    tracker.mark_started(&job.task_handle).await.unwrap();

    // Over-reporting is capped below completion.
    tracker
        .update_progress(&job.task_handle, 150.0)
        .await
        .unwrap();
    let current = tracker.get(job.id).await.unwrap().unwrap();
    assert_eq!(current.progress, 99.0);

    // Out-of-order lower reports never move the bar backwards.
    tracker
        .update_progress(&job.task_handle, 40.0)
        .await
        .unwrap();
    let current = tracker.get(job.id).await.unwrap().unwrap();
    assert_eq!(current.progress, 99.0);
}

#[tokio::test]
async fn progress_before_start_is_ignored() {
    let (tracker, _, _) = setup();
    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();

    tracker
        .update_progress(&job.task_handle, 50.0)
        .await
        .unwrap();
    let current = tracker.get(job.id).await.unwrap().unwrap();
    assert_eq!(current.progress, 0.0);
    assert_eq!(current.status, JobStatus::Pending);
}

#[tokio::test]
async fn terminal_records_are_immutable() {
    let (tracker, _, _) = setup();
    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();
    tracker.mark_started(&job.task_handle).await.unwrap();
    tracker
        .mark_failure(&job.task_handle, "device unreachable")
        .await
        .unwrap();

    // Late success report after failure is a no-op.
    tracker
        .mark_success(&job.task_handle, &json!({}))
        .await
        .unwrap();
    let current = tracker.get(job.id).await.unwrap().unwrap();
    assert_eq!(current.status, JobStatus::Failure);
    assert_eq!(current.error, Some("device unreachable".to_string()));
    assert!(current.result.is_none());
}

#[tokio::test]
async fn cancel_revokes_pending_job() {
    let (tracker, _, runtime) = setup();
    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();

    let cancelled = tracker.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Revoked);
    assert!(cancelled.finished_at.is_some());

    // Revoke was requested without termination.
    assert_eq!(runtime.revoked(), vec![(job.task_handle.clone(), false)]);
}

#[tokio::test]
async fn completion_racing_cancel_stays_revoked() {
    let (tracker, _, _) = setup();
    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();
    tracker.mark_started(&job.task_handle).await.unwrap();

    tracker.cancel(job.id).await.unwrap();
    tracker
        .mark_success(&job.task_handle, &json!({}))
        .await
        .unwrap();

    let current = tracker.get(job.id).await.unwrap().unwrap();
    assert_eq!(current.status, JobStatus::Revoked);
}

#[tokio::test]
async fn cancel_terminal_job_is_rejected() {
    let (tracker, _, _) = setup();
    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();
    tracker
        .mark_success(&job.task_handle, &json!({}))
        .await
        .unwrap();

    let err = tracker.cancel(job.id).await.unwrap_err();
    assert!(matches!(err, TrackerError::InvalidTransition { .. }));
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let (tracker, _, _) = setup();
    let err = tracker.cancel(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, TrackerError::NotFound { .. }));
}

#[tokio::test]
async fn reconcile_adopts_runtime_state() {
    let (tracker, _, runtime) = setup();
    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();

    runtime.set_state(&job.task_handle, RuntimeTaskState::Success);
    let (reconciled, warning) = tracker.get_reconciled(job.id).await.unwrap().unwrap();

    assert!(warning.is_none());
    assert_eq!(reconciled.status, JobStatus::Success);
    assert_eq!(reconciled.progress, 100.0);
    assert!(reconciled.finished_at.is_some());
}

#[tokio::test]
async fn reconcile_is_idempotent_when_states_agree() {
    let (tracker, jobs, runtime) = setup();
    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();
    runtime.set_state(&job.task_handle, RuntimeTaskState::Pending);

    let (first, _) = tracker.get_reconciled(job.id).await.unwrap().unwrap();
    let (second, _) = tracker.get_reconciled(job.id).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Pending);
    assert_eq!(second.status, JobStatus::Pending);
    assert_eq!(first.updated_at, second.updated_at);

    let stored = jobs.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
}

#[tokio::test]
async fn unavailable_runtime_degrades_to_warning() {
    let (tracker, _, runtime) = setup();
    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();
    runtime.set_unavailable(true);

    let (reconciled, warning) = tracker.get_reconciled(job.id).await.unwrap().unwrap();
    assert_eq!(reconciled.status, JobStatus::Pending);
    assert!(warning.is_some());
}

#[tokio::test]
async fn terminal_jobs_skip_runtime_during_reconcile() {
    let (tracker, _, runtime) = setup();
    let job = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();
    tracker
        .mark_success(&job.task_handle, &json!({}))
        .await
        .unwrap();

    // Even an offline runtime does not affect terminal reads.
    runtime.set_unavailable(true);
    let (reconciled, warning) = tracker.get_reconciled(job.id).await.unwrap().unwrap();
    assert_eq!(reconciled.status, JobStatus::Success);
    assert!(warning.is_none());
}

#[tokio::test]
async fn list_filters_by_type_and_status() {
    let (tracker, _, _) = setup();
    let single = tracker
        .enqueue(JobType::SlaComputation, spec())
        .await
        .unwrap();
    let bulk = tracker
        .enqueue(
            JobType::BulkSlaComputation,
            TaskSpec::new("sla.compute_bulk", json!({"device_ids": ["a"]})),
        )
        .await
        .unwrap();
    tracker.mark_started(&bulk.task_handle).await.unwrap();

    let filter = JobFilter {
        job_type: Some(JobType::SlaComputation),
        status: None,
        limit: 50,
    };
    let jobs = tracker.list(&filter).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, single.id);

    let filter = JobFilter {
        job_type: None,
        status: Some(JobStatus::Started),
        limit: 50,
    };
    let jobs = tracker.list(&filter).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, bulk.id);
}
