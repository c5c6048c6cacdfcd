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
    errors::{DeliveryError, HttpError, ValidationError},
    http::{WebContext, errors::WebError},
    storage::{
        DeliveryStatus, DeliveryStorage, Webhook, WebhookDelivery, WebhookEvent, WebhookStorage,
    },
};

const DEFAULT_DELIVERY_LIMIT: usize = 50;

/// API shape of a webhook. The signing secret never leaves the service;
/// only its presence is reported.
#[derive(Debug, Serialize)]
pub(super) struct WebhookResponse {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub events: Vec<WebhookEvent>,
    pub max_retries: i32,
    pub is_active: bool,
    pub has_secret: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Webhook> for WebhookResponse {
    fn from(webhook: &Webhook) -> Self {
        let events = webhook.subscribed_events().unwrap_or_else(|e| {
            tracing::warn!(webhook_id = %webhook.id, error = %e, "Stored event list unparseable");
            Vec::new()
        });
        Self {
            id: webhook.id,
            name: webhook.name.clone(),
            url: webhook.url.clone(),
            events,
            max_retries: webhook.max_retries,
            is_active: webhook.is_active,
            has_secret: webhook.secret.is_some(),
            created_at: webhook.created_at,
            updated_at: webhook.updated_at,
        }
    }
}

fn default_max_retries() -> i32 {
    3
}

fn default_is_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateWebhookRequest {
    pub name: String,
    pub url: String,
    pub secret: Option<String>,
    pub events: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
}

fn validate_url(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ValidationError::InvalidUrl {
            url: url.to_string(),
            details: "scheme must be http or https".to_string(),
        })
    }
}

fn parse_events(tags: &[String]) -> Result<Vec<WebhookEvent>, ValidationError> {
    if tags.is_empty() {
        return Err(ValidationError::EmptyEventList);
    }
    tags.iter().map(|tag| tag.parse()).collect()
}

pub(super) async fn handle_create_webhook(
    State(context): State<WebContext>,
    Json(request): Json<CreateWebhookRequest>,
) -> impl IntoResponse {
    let events = match parse_events(&request.events) {
        Ok(events) => events,
        Err(e) => {
            return WebError::Http(HttpError::RequestValidation {
                details: e.to_string(),
            })
            .into_response();
        }
    };
    if let Err(e) = validate_url(&request.url) {
        return WebError::Http(HttpError::RequestValidation {
            details: e.to_string(),
        })
        .into_response();
    }

    let webhook = Webhook::new(
        request.name,
        request.url,
        request.secret,
        &events,
        request.max_retries,
        request.is_active,
    );

    match context.webhook_storage.create_webhook(&webhook).await {
        Ok(()) => (StatusCode::CREATED, Json(WebhookResponse::from(&webhook))).into_response(),
        Err(e) => {
            let error = json!({
                "error": "WebhookCreateFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ListWebhooksQuery {
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub(super) struct ListWebhooksResponse {
    pub webhooks: Vec<WebhookResponse>,
}

pub(super) async fn handle_list_webhooks(
    State(context): State<WebContext>,
    Query(params): Query<ListWebhooksQuery>,
) -> impl IntoResponse {
    match context.webhook_storage.list_webhooks(params.is_active).await {
        Ok(webhooks) => {
            let webhooks = webhooks.iter().map(WebhookResponse::from).collect();
            (StatusCode::OK, Json(ListWebhooksResponse { webhooks })).into_response()
        }
        Err(e) => {
            let error = json!({
                "error": "WebhookListFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}

pub(super) async fn handle_get_webhook(
    State(context): State<WebContext>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match context.webhook_storage.get_webhook(id).await {
        Ok(Some(webhook)) => {
            (StatusCode::OK, Json(WebhookResponse::from(&webhook))).into_response()
        }
        Ok(None) => WebError::Http(HttpError::NotFound {
            details: format!("webhook {} not found", id),
        })
        .into_response(),
        Err(e) => {
            let error = json!({
                "error": "WebhookFetchFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateWebhookRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub secret: Option<String>,
    pub events: Option<Vec<String>>,
    pub max_retries: Option<i32>,
    pub is_active: Option<bool>,
}

pub(super) async fn handle_update_webhook(
    State(context): State<WebContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateWebhookRequest>,
) -> impl IntoResponse {
    let mut webhook = match context.webhook_storage.get_webhook(id).await {
        Ok(Some(webhook)) => webhook,
        Ok(None) => {
            return WebError::Http(HttpError::NotFound {
                details: format!("webhook {} not found", id),
            })
            .into_response();
        }
        Err(e) => {
            let error = json!({
                "error": "WebhookFetchFailed",
                "message": e.to_string()
            });
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response();
        }
    };

    if let Some(tags) = &request.events {
        match parse_events(tags) {
            Ok(_) => {
                webhook.events =
                    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string());
            }
            Err(e) => {
                return WebError::Http(HttpError::RequestValidation {
                    details: e.to_string(),
                })
                .into_response();
            }
        }
    }
    if let Some(url) = request.url {
        if let Err(e) = validate_url(&url) {
            return WebError::Http(HttpError::RequestValidation {
                details: e.to_string(),
            })
            .into_response();
        }
        webhook.url = url;
    }
    if let Some(name) = request.name {
        webhook.name = name;
    }
    if let Some(secret) = request.secret {
        webhook.secret = Some(secret);
    }
    if let Some(max_retries) = request.max_retries {
        webhook.max_retries = max_retries;
    }
    if let Some(is_active) = request.is_active {
        webhook.is_active = is_active;
    }

    match context.webhook_storage.update_webhook(&webhook).await {
        Ok(()) => (StatusCode::OK, Json(WebhookResponse::from(&webhook))).into_response(),
        Err(e) => {
            let error = json!({
                "error": "WebhookUpdateFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}

pub(super) async fn handle_delete_webhook(
    State(context): State<WebContext>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match context.webhook_storage.get_webhook(id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return WebError::Http(HttpError::NotFound {
                details: format!("webhook {} not found", id),
            })
            .into_response();
        }
        Err(e) => {
            let error = json!({
                "error": "WebhookFetchFailed",
                "message": e.to_string()
            });
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response();
        }
    }

    match context.webhook_storage.delete_webhook(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            let error = json!({
                "error": "WebhookDeleteFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ListDeliveriesQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(super) struct ListDeliveriesResponse {
    pub deliveries: Vec<WebhookDelivery>,
}

pub(super) async fn handle_list_deliveries(
    State(context): State<WebContext>,
    Path(id): Path<Uuid>,
    Query(params): Query<ListDeliveriesQuery>,
) -> impl IntoResponse {
    let status = match params
        .status
        .as_deref()
        .map(|s| s.parse::<DeliveryStatus>())
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

    match context.webhook_storage.get_webhook(id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return WebError::Http(HttpError::NotFound {
                details: format!("webhook {} not found", id),
            })
            .into_response();
        }
        Err(e) => {
            let error = json!({
                "error": "WebhookFetchFailed",
                "message": e.to_string()
            });
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response();
        }
    }

    let limit = params.limit.unwrap_or(DEFAULT_DELIVERY_LIMIT);
    match context
        .delivery_storage
        .list_deliveries(id, status, limit)
        .await
    {
        Ok(deliveries) => {
            (StatusCode::OK, Json(ListDeliveriesResponse { deliveries })).into_response()
        }
        Err(e) => {
            let error = json!({
                "error": "DeliveryListFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}

pub(super) async fn handle_retry_delivery(
    State(context): State<WebContext>,
    Path((webhook_id, delivery_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    // A delivery is addressed through its webhook; a mismatched pair is a 404.
    match context.delivery_storage.get_delivery(delivery_id).await {
        Ok(Some(delivery)) if delivery.webhook_id == webhook_id => {}
        Ok(_) => {
            return WebError::Http(HttpError::NotFound {
                details: format!(
                    "delivery {} not found for webhook {}",
                    delivery_id, webhook_id
                ),
            })
            .into_response();
        }
        Err(e) => {
            let error = json!({
                "error": "DeliveryFetchFailed",
                "message": e.to_string()
            });
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response();
        }
    }

    match context.engine.retry_delivery(delivery_id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "message": "delivery retried" })),
        )
            .into_response(),
        Err(DeliveryError::NotFound { .. }) => WebError::Http(HttpError::NotFound {
            details: format!("delivery {} not found", delivery_id),
        })
        .into_response(),
        Err(e @ DeliveryError::AlreadyDelivered { .. }) => {
            WebError::Http(HttpError::BadRequest {
                details: e.to_string(),
            })
            .into_response()
        }
        Err(e) => {
            let error = json!({
                "error": "DeliveryRetryFailed",
                "message": e.to_string()
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
        }
    }
}
