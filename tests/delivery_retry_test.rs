//! Delivery engine behavior: signing, retry scheduling, sweeps, and the
//! conditional claim, against in-memory storage and a wiremock endpoint.

use chrono::Utc;
use nocwatch::delivery::{DeliveryEngine, DeliveryEngineConfig};
use nocwatch::errors::DeliveryError;
use nocwatch::storage::{
    DeliveryStatus, DeliveryStorage, Webhook, WebhookDelivery, WebhookEvent, WebhookStorage,
};
use nocwatch::test_helpers::{InMemoryDeliveryStorage, InMemoryWebhookStorage};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    engine: DeliveryEngine,
    webhooks: Arc<InMemoryWebhookStorage>,
    deliveries: Arc<InMemoryDeliveryStorage>,
}

fn harness() -> Harness {
    let webhooks = Arc::new(InMemoryWebhookStorage::new());
    let deliveries = Arc::new(InMemoryDeliveryStorage::new());
    let engine = DeliveryEngine::new(
        webhooks.clone(),
        deliveries.clone(),
        reqwest::Client::new(),
        DeliveryEngineConfig {
            request_timeout: Duration::from_secs(5),
            response_body_limit: 4000,
        },
    );
    Harness {
        engine,
        webhooks,
        deliveries,
    }
}

async fn seed_delivery(
    h: &Harness,
    url: String,
    secret: Option<String>,
    max_retries: i32,
    is_active: bool,
) -> WebhookDelivery {
    let webhook = Webhook::new(
        "ops".to_string(),
        url,
        secret,
        &[WebhookEvent::SlaViolation],
        max_retries,
        is_active,
    );
    h.webhooks.create_webhook(&webhook).await.unwrap();

    let delivery = WebhookDelivery::new(webhook.id, WebhookEvent::SlaViolation, "{}".to_string());
    h.deliveries.create_delivery(&delivery).await.unwrap();
    delivery
}

#[tokio::test]
async fn successful_delivery_carries_signed_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("Content-Type", "application/json"))
        .and(header("X-Webhook-Event", "sla.violation"))
        .and(header_exists("X-Webhook-Timestamp"))
        .and(header(
            "X-Webhook-Signature",
            "sha256=143ca8d517ba1b181025d732b1cf275d90104fca57bb02a565542978aa18c4b6",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness();
    let delivery = seed_delivery(
        &h,
        format!("{}/hook", server.uri()),
        Some("s".to_string()),
        3,
        true,
    )
    .await;

    assert!(h.engine.dispatch(delivery.id).await.unwrap());

    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Success);
    assert_eq!(stored.attempt_count, 1);
    assert_eq!(stored.response_status_code, Some(200));
    assert_eq!(stored.response_body, Some("ok".to_string()));
    assert!(stored.delivered_at.is_some());
    assert!(stored.next_retry_at.is_none());
}

#[tokio::test]
async fn delivery_without_secret_is_unsigned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness();
    let delivery = seed_delivery(&h, server.uri(), None, 3, true).await;
    assert!(h.engine.dispatch(delivery.id).await.unwrap());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("x-webhook-signature"));

    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Success);
    assert_eq!(stored.response_status_code, Some(204));
}

#[tokio::test]
async fn failing_endpoint_walks_the_retry_schedule_then_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(4)
        .mount(&server)
        .await;

    let h = harness();
    let delivery = seed_delivery(&h, server.uri(), None, 3, true).await;

    // Initial attempt fails and schedules the first retry 30s out.
    assert!(h.engine.dispatch(delivery.id).await.unwrap());
    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Retrying);
    assert_eq!(stored.attempt_count, 1);
    assert_eq!(stored.response_status_code, Some(500));
    let delay = (stored.next_retry_at.unwrap() - Utc::now()).num_seconds();
    assert!((28..=31).contains(&delay), "first retry delay was {delay}s");

    // Not due yet: a sweep right now dispatches nothing.
    assert_eq!(h.engine.sweep_due(Utc::now()).await.unwrap(), 0);

    // Sweep at the due time makes the second attempt, scheduled 240s out.
    let due = stored.next_retry_at.unwrap();
    assert_eq!(h.engine.sweep_due(due).await.unwrap(), 1);
    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 2);
    assert_eq!(stored.status, DeliveryStatus::Retrying);
    let delay = (stored.next_retry_at.unwrap() - Utc::now()).num_seconds();
    assert!((238..=241).contains(&delay), "second retry delay was {delay}s");

    // Third attempt, scheduled 2400s out.
    assert_eq!(h.engine.sweep_due(stored.next_retry_at.unwrap()).await.unwrap(), 1);
    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 3);
    let delay = (stored.next_retry_at.unwrap() - Utc::now()).num_seconds();
    assert!((2398..=2401).contains(&delay), "third retry delay was {delay}s");

    // Fourth attempt exhausts the budget and fails permanently.
    assert_eq!(h.engine.sweep_due(stored.next_retry_at.unwrap()).await.unwrap(), 1);
    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 4);
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert!(stored.next_retry_at.is_none());
    assert!(stored.error_message.is_some());
}

#[tokio::test]
async fn zero_retry_budget_fails_after_first_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness();
    let delivery = seed_delivery(&h, server.uri(), None, 0, true).await;
    assert!(h.engine.dispatch(delivery.id).await.unwrap());

    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(stored.attempt_count, 1);
}

#[tokio::test]
async fn due_claim_is_granted_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let h = harness();
    let delivery = seed_delivery(&h, server.uri(), None, 3, true).await;
    assert!(h.engine.dispatch(delivery.id).await.unwrap());

    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    let due = stored.next_retry_at.unwrap();

    // Two racing due-only claims: only the first wins, because the winning
    // claim clears next_retry_at.
    let first = h
        .deliveries
        .claim_attempt(delivery.id, due, Some(due))
        .await
        .unwrap();
    let second = h
        .deliveries
        .claim_attempt(delivery.id, due, Some(due))
        .await
        .unwrap();
    assert!(first.is_some());
    assert!(second.is_none());

    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 2);
}

#[tokio::test]
async fn manual_retry_rejects_successful_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness();
    let delivery = seed_delivery(&h, server.uri(), None, 3, true).await;
    assert!(h.engine.dispatch(delivery.id).await.unwrap());

    let err = h.engine.retry_delivery(delivery.id).await.unwrap_err();
    assert!(matches!(err, DeliveryError::AlreadyDelivered { .. }));
}

#[tokio::test]
async fn manual_retry_revives_failed_delivery() {
    let server = MockServer::start().await;
    // First attempt fails, the manual retry succeeds.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness();
    let delivery = seed_delivery(&h, server.uri(), None, 0, true).await;
    assert!(h.engine.dispatch(delivery.id).await.unwrap());
    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);

    h.engine.retry_delivery(delivery.id).await.unwrap();
    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Success);
    assert_eq!(stored.attempt_count, 2);
}

#[tokio::test]
async fn retry_of_unknown_delivery_is_not_found() {
    let h = harness();
    let err = h.engine.retry_delivery(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, DeliveryError::NotFound { .. }));
}

#[tokio::test]
async fn response_body_is_truncated_for_storage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(5000)))
        .mount(&server)
        .await;

    let h = harness();
    let delivery = seed_delivery(&h, server.uri(), None, 3, true).await;
    assert!(h.engine.dispatch(delivery.id).await.unwrap());

    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.response_body.unwrap().len(), 4000);
}

#[tokio::test]
async fn inactive_webhook_fails_the_delivery() {
    let h = harness();
    let delivery = seed_delivery(&h, "http://localhost:9".to_string(), None, 3, false).await;
    assert!(h.engine.dispatch(delivery.id).await.unwrap());

    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(
        stored.error_message,
        Some("webhook not found or inactive".to_string())
    );
}

#[tokio::test]
async fn connection_error_counts_as_failed_attempt() {
    let h = harness();
    // Port 9 (discard) is not listening; the request errors out.
    let delivery = seed_delivery(&h, "http://127.0.0.1:9".to_string(), None, 3, true).await;
    assert!(h.engine.dispatch(delivery.id).await.unwrap());

    let stored = h.deliveries.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Retrying);
    assert!(stored.response_status_code.is_none());
    assert!(stored.error_message.unwrap().starts_with("request failed"));
}
