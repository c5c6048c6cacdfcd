//! Event fan-out through the trigger gateway.

use nocwatch::delivery::{DeliveryEngine, DeliveryEngineConfig};
use nocwatch::storage::{
    DeliveryStatus, DeliveryStorage, Webhook, WebhookEvent, WebhookStorage,
};
use nocwatch::test_helpers::{InMemoryDeliveryStorage, InMemoryWebhookStorage};
use nocwatch::trigger::EventTriggerGateway;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    gateway: EventTriggerGateway,
    webhooks: Arc<InMemoryWebhookStorage>,
    deliveries: Arc<InMemoryDeliveryStorage>,
}

fn harness() -> Harness {
    let webhooks = Arc::new(InMemoryWebhookStorage::new());
    let deliveries = Arc::new(InMemoryDeliveryStorage::new());
    let engine = Arc::new(DeliveryEngine::new(
        webhooks.clone(),
        deliveries.clone(),
        reqwest::Client::new(),
        DeliveryEngineConfig {
            request_timeout: Duration::from_secs(5),
            response_body_limit: 4000,
        },
    ));
    let gateway = EventTriggerGateway::new(webhooks.clone(), deliveries.clone(), engine);
    Harness {
        gateway,
        webhooks,
        deliveries,
    }
}

async fn add_webhook(
    h: &Harness,
    url: String,
    secret: Option<String>,
    events: &[WebhookEvent],
    is_active: bool,
) -> Webhook {
    let webhook = Webhook::new("hook".to_string(), url, secret, events, 3, is_active);
    h.webhooks.create_webhook(&webhook).await.unwrap();
    webhook
}

#[tokio::test]
async fn fans_out_only_to_active_subscribed_webhooks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/signed"))
        .and(header_exists("X-Webhook-Signature"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/plain"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/inactive"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/resolved-only"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness();
    let signed = add_webhook(
        &h,
        format!("{}/signed", server.uri()),
        Some("secret".to_string()),
        &[WebhookEvent::SlaViolation, WebhookEvent::SlaResolved],
        true,
    )
    .await;
    let plain = add_webhook(
        &h,
        format!("{}/plain", server.uri()),
        None,
        &[WebhookEvent::SlaViolation],
        true,
    )
    .await;
    add_webhook(
        &h,
        format!("{}/inactive", server.uri()),
        None,
        &[WebhookEvent::SlaViolation],
        false,
    )
    .await;
    add_webhook(
        &h,
        format!("{}/resolved-only", server.uri()),
        None,
        &[WebhookEvent::SlaResolved],
        true,
    )
    .await;

    let created = h
        .gateway
        .trigger_event(WebhookEvent::SlaViolation, json!({"device_id": "router-1"}))
        .await
        .unwrap();
    assert_eq!(created.len(), 2);

    let mut target_ids: Vec<_> = created.iter().map(|d| d.webhook_id).collect();
    target_ids.sort();
    let mut expected = vec![signed.id, plain.id];
    expected.sort();
    assert_eq!(target_ids, expected);

    for delivery in &created {
        let stored = h
            .deliveries
            .get_delivery(delivery.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DeliveryStatus::Success);
    }
}

#[tokio::test]
async fn payload_envelope_is_shared_and_well_formed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness();
    add_webhook(&h, server.uri(), None, &[WebhookEvent::SlaWarning], true).await;
    add_webhook(&h, server.uri(), None, &[WebhookEvent::SlaWarning], true).await;

    let created = h
        .gateway
        .trigger_event(
            WebhookEvent::SlaWarning,
            json!({"device_id": "router-1", "mttr_minutes": 14.0}),
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 2);

    // Every receiver gets byte-identical payloads.
    assert_eq!(created[0].payload, created[1].payload);

    let envelope: Value = serde_json::from_str(&created[0].payload).unwrap();
    assert_eq!(envelope["event"], "sla.warning");
    assert!(envelope["timestamp"].is_string());
    assert_eq!(envelope["data"]["device_id"], "router-1");
    assert_eq!(envelope["data"]["mttr_minutes"], 14.0);
}

#[tokio::test]
async fn webhook_with_malformed_event_list_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness();
    add_webhook(&h, server.uri(), None, &[WebhookEvent::SlaViolation], true).await;

    let mut broken =
        Webhook::new("broken".to_string(), server.uri(), None, &[], 3, true);
    broken.events = "not json".to_string();
    h.webhooks.create_webhook(&broken).await.unwrap();

    let created = h
        .gateway
        .trigger_event(WebhookEvent::SlaViolation, json!({}))
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_ne!(created[0].webhook_id, broken.id);
}

#[tokio::test]
async fn failed_initial_attempt_leaves_delivery_scheduled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let h = harness();
    add_webhook(&h, server.uri(), None, &[WebhookEvent::SlaViolation], true).await;

    let created = h
        .gateway
        .trigger_event(WebhookEvent::SlaViolation, json!({}))
        .await
        .unwrap();
    assert_eq!(created.len(), 1);

    let stored = h
        .deliveries
        .get_delivery(created[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DeliveryStatus::Retrying);
    assert!(stored.next_retry_at.is_some());
}
