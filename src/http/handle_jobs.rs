use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    compute::{TASK_COMPUTE_BULK, TASK_COMPUTE_DEVICE},
    errors::{HttpError, TrackerError},
    http::{WebContext, errors::WebError},
    runtime::TaskSpec,
    storage::{Job, JobFilter, JobType},
};

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Serialize)]
pub(super) struct JobResponse {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SlaComputationRequest {
    pub device_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

pub(super) async fn handle_submit_sla_computation(
    State(context): State<WebContext>,
    Json(request): Json<SlaComputationRequest>,
) -> impl IntoResponse {
    let spec = TaskSpec::new(
        TASK_COMPUTE_DEVICE,
        json!({
            "device_id": request.device_id,
            "period_start": request.period_start,
            "period_end": request.period_end,
        }),
    );

    match context.tracker.enqueue(JobType::SlaComputation, spec).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(JobResponse { job, warning: None }),
        )
            .into_response(),
        Err(e) => {
            let error = json!({
                "error": "JobSubmitFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct BulkSlaComputationRequest {
    pub device_ids: Vec<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

pub(super) async fn handle_submit_bulk_sla_computation(
    State(context): State<WebContext>,
    Json(request): Json<BulkSlaComputationRequest>,
) -> impl IntoResponse {
    if request.device_ids.is_empty() {
        return WebError::Http(HttpError::RequestValidation {
            details: "device_ids must not be empty".to_string(),
        })
        .into_response();
    }

    let spec = TaskSpec::new(
        TASK_COMPUTE_BULK,
        json!({
            "device_ids": request.device_ids,
            "period_start": request.period_start,
            "period_end": request.period_end,
        }),
    );

    match context
        .tracker
        .enqueue(JobType::BulkSlaComputation, spec)
        .await
    {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(JobResponse { job, warning: None }),
        )
            .into_response(),
        Err(e) => {
            let error = json!({
                "error": "JobSubmitFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ListJobsQuery {
    pub job_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(super) struct ListJobsResponse {
    pub jobs: Vec<Job>,
}

pub(super) async fn handle_list_jobs(
    State(context): State<WebContext>,
    Query(params): Query<ListJobsQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit < 1 || limit > context.config.job_list_max_limit {
        return WebError::Http(HttpError::RequestValidation {
            details: format!(
                "limit must be between 1 and {}",
                context.config.job_list_max_limit
            ),
        })
        .into_response();
    }

    let job_type = match params.job_type.as_deref().map(|s| s.parse::<JobType>()) {
        Some(Ok(job_type)) => Some(job_type),
        Some(Err(_)) => {
            return WebError::Http(HttpError::RequestValidation {
                details: format!("unknown job_type: {}", params.job_type.unwrap_or_default()),
            })
            .into_response();
        }
        None => None,
    };

    let status = match params
        .status
        .as_deref()
        .map(|s| s.parse::<crate::storage::JobStatus>())
    {
        Some(Ok(status)) => Some(status),
        Some(Err(_)) => {
            return WebError::Http(HttpError::RequestValidation {
                details: format!("unknown status: {}", params.status.unwrap_or_default()),
            })
            .into_response();
        }
        None => None,
    };

    let filter = JobFilter {
        job_type,
        status,
        limit,
    };

    match context.tracker.list(&filter).await {
        Ok(jobs) => (StatusCode::OK, Json(ListJobsResponse { jobs })).into_response(),
        Err(e) => {
            let error = json!({
                "error": "JobListFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}

pub(super) async fn handle_get_job(
    State(context): State<WebContext>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match context.tracker.get_reconciled(id).await {
        Ok(Some((job, warning))) => {
            (StatusCode::OK, Json(JobResponse { job, warning })).into_response()
        }
        Ok(None) => WebError::Http(HttpError::NotFound {
            details: format!("job {} not found", id),
        })
        .into_response(),
        Err(e) => {
            let error = json!({
                "error": "JobFetchFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}

pub(super) async fn handle_cancel_job(
    State(context): State<WebContext>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match context.tracker.cancel(id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(TrackerError::NotFound { .. }) => WebError::Http(HttpError::NotFound {
            details: format!("job {} not found", id),
        })
        .into_response(),
        Err(e @ TrackerError::InvalidTransition { .. }) => {
            WebError::Http(HttpError::BadRequest {
                details: e.to_string(),
            })
            .into_response()
        }
        Err(e) => {
            let error = json!({
                "error": "JobCancelFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}
