//! Event trigger gateway.
//!
//! Fan-out point between domain events and the delivery engine: one event
//! occurrence becomes one delivery record per active, subscribed webhook,
//! each dispatched immediately. The payload envelope is serialized once and
//! snapshotted into every record so all receivers sign-verify identical
//! bytes.

use crate::delivery::DeliveryEngine;
use crate::errors::TriggerError;
use crate::storage::{DeliveryStorage, WebhookDelivery, WebhookEvent, WebhookStorage};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct EventTriggerGateway {
    webhooks: Arc<dyn WebhookStorage>,
    deliveries: Arc<dyn DeliveryStorage>,
    engine: Arc<DeliveryEngine>,
}

impl EventTriggerGateway {
    pub fn new(
        webhooks: Arc<dyn WebhookStorage>,
        deliveries: Arc<dyn DeliveryStorage>,
        engine: Arc<DeliveryEngine>,
    ) -> Self {
        Self {
            webhooks,
            deliveries,
            engine,
        }
    }

    /// Fans an event out to every active webhook subscribed to it.
    ///
    /// Returns the created delivery records. A webhook whose stored event
    /// list cannot be parsed is skipped with a warning; delivery attempt
    /// errors are logged and never propagated, since retries are the
    /// sweeper's job from here on.
    #[instrument(skip(self, data), fields(event = %event))]
    pub async fn trigger_event(
        &self,
        event: WebhookEvent,
        data: Value,
    ) -> Result<Vec<WebhookDelivery>, TriggerError> {
        let payload = json!({
            "event": event.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "data": data,
        })
        .to_string();

        let mut created = Vec::new();
        for webhook in self.webhooks.list_webhooks(Some(true)).await? {
            let subscribed = match webhook.subscribed_events() {
                Ok(events) => events,
                Err(e) => {
                    warn!(
                        webhook_id = %webhook.id,
                        error = %e,
                        "Skipping webhook with unparseable event list"
                    );
                    continue;
                }
            };
            if !subscribed.contains(&event) {
                continue;
            }

            let delivery = WebhookDelivery::new(webhook.id, event, payload.clone());
            self.deliveries.create_delivery(&delivery).await?;
            created.push(delivery);
        }

        debug!(count = created.len(), "Event fanned out to webhooks");

        for delivery in &created {
            if let Err(e) = self.engine.dispatch(delivery.id).await {
                warn!(
                    delivery_id = %delivery.id,
                    error = %e,
                    "Initial delivery attempt errored"
                );
            }
        }

        Ok(created)
    }
}
