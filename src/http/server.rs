use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, patch, post},
};
use http::{
    Method,
    header::{ACCEPT, CONTENT_TYPE},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tower_http::{classify::ServerErrorsFailureClass, cors::CorsLayer, timeout::TimeoutLayer};
use tracing::Span;

use crate::storage::Storage as _;

use crate::http::{
    context::WebContext,
    handle_jobs::{
        handle_cancel_job, handle_get_job, handle_list_jobs, handle_submit_bulk_sla_computation,
        handle_submit_sla_computation,
    },
    handle_webhooks::{
        handle_create_webhook, handle_delete_webhook, handle_get_webhook, handle_list_deliveries,
        handle_list_webhooks, handle_retry_delivery, handle_update_webhook,
    },
};

async fn handle_health(State(context): State<WebContext>) -> impl IntoResponse {
    match context.storage.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "version": context.config.version,
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "message": e.to_string(),
            })),
        )
            .into_response(),
    }
}

pub fn build_router(web_context: WebContext) -> Router {
    let router = Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/jobs/sla-computation",
            post(handle_submit_sla_computation),
        )
        .route(
            "/api/jobs/sla-computation/bulk",
            post(handle_submit_bulk_sla_computation),
        )
        .route("/api/jobs", get(handle_list_jobs))
        .route("/api/jobs/{id}", get(handle_get_job))
        .route("/api/jobs/{id}", delete(handle_cancel_job))
        .route("/api/webhooks", post(handle_create_webhook))
        .route("/api/webhooks", get(handle_list_webhooks))
        .route("/api/webhooks/{id}", get(handle_get_webhook))
        .route("/api/webhooks/{id}", patch(handle_update_webhook))
        .route("/api/webhooks/{id}", delete(handle_delete_webhook))
        .route("/api/webhooks/{id}/deliveries", get(handle_list_deliveries))
        .route(
            "/api/webhooks/{id}/deliveries/{delivery_id}/retry",
            post(handle_retry_delivery),
        );

    let origins = [web_context.config.external_base.parse().unwrap()];

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &http::Request<_>| {
            // Extract trace context from headers if present
            let trace_id = request
                .headers()
                .get("x-trace-id")
                .and_then(|h| h.to_str().ok())
                .map(String::from)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                trace_id = %trace_id,
                request_id = %uuid::Uuid::new_v4(),
            )
        })
        .on_request(|request: &http::Request<_>, _span: &Span| {
            tracing::info!(
                "started processing request {} {}",
                request.method(),
                request.uri().path()
            );
        })
        .on_response(
            |response: &http::Response<_>, latency: Duration, _span: &Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis(),
                    "finished processing request"
                );
            },
        )
        .on_failure(
            |err: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                tracing::error!(
                    error = ?err,
                    latency_ms = latency.as_millis(),
                    "request failed"
                );
            },
        );

    router
        .layer((trace_layer, TimeoutLayer::new(Duration::from_secs(30))))
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
                .allow_headers([ACCEPT, CONTENT_TYPE]),
        )
        .with_state(web_context)
}
