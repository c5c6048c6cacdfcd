//! Webhook delivery engine.
//!
//! Owns the outbound HTTP attempts for delivery records: claims the attempt,
//! POSTs the signed payload, and records the outcome as success, a scheduled
//! retry, or a permanent failure once the retry budget is spent.

use crate::errors::DeliveryError;
use crate::storage::{DeliveryStatus, DeliveryStorage, Webhook, WebhookDelivery, WebhookStorage};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Base retry delays in seconds, indexed by 0-based retry number. Each base
/// is additionally doubled per prior retry, so the effective schedule is
/// 30s, 240s, 2400s.
pub const RETRY_DELAYS_SECONDS: [i64; 3] = [30, 120, 600];

/// Effective delay before retry number `retry_index` (0-based), or `None`
/// when the schedule is exhausted.
pub fn retry_delay(retry_index: usize) -> Option<ChronoDuration> {
    RETRY_DELAYS_SECONDS
        .get(retry_index)
        .map(|base| ChronoDuration::seconds(base * (1i64 << retry_index)))
}

/// Computes the `X-Webhook-Signature` header value: an HMAC-SHA256 of the
/// exact payload bytes under the webhook's secret, hex-encoded with a
/// `sha256=` prefix.
pub fn signature_header(secret: &str, payload: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(payload.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn truncate_body(mut body: String, limit: usize) -> String {
    if body.len() <= limit {
        return body;
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body.truncate(end);
    body
}

#[derive(Clone)]
pub struct DeliveryEngineConfig {
    /// Per-attempt outbound HTTP timeout.
    pub request_timeout: Duration,
    /// Stored response bodies are truncated to this many bytes.
    pub response_body_limit: usize,
}

impl Default for DeliveryEngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            response_body_limit: 4000,
        }
    }
}

struct AttemptOutcome {
    success: bool,
    status_code: Option<i32>,
    body: Option<String>,
    error: Option<String>,
}

pub struct DeliveryEngine {
    webhooks: Arc<dyn WebhookStorage>,
    deliveries: Arc<dyn DeliveryStorage>,
    http_client: reqwest::Client,
    config: DeliveryEngineConfig,
}

impl DeliveryEngine {
    pub fn new(
        webhooks: Arc<dyn WebhookStorage>,
        deliveries: Arc<dyn DeliveryStorage>,
        http_client: reqwest::Client,
        config: DeliveryEngineConfig,
    ) -> Self {
        Self {
            webhooks,
            deliveries,
            http_client,
            config,
        }
    }

    /// Claims and performs one delivery attempt. Returns `false` when the
    /// claim was rejected, meaning the delivery is already successful or a
    /// concurrent caller got there first.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, id: Uuid) -> Result<bool, DeliveryError> {
        self.dispatch_claimed(id, None).await
    }

    /// Manual retry requested over the API. Rejects deliveries that already
    /// succeeded; anything else, including terminal failures, gets a fresh
    /// attempt immediately.
    pub async fn retry_delivery(&self, id: Uuid) -> Result<(), DeliveryError> {
        let delivery = self
            .deliveries
            .get_delivery(id)
            .await?
            .ok_or_else(|| DeliveryError::NotFound { id: id.to_string() })?;

        if delivery.status == DeliveryStatus::Success {
            return Err(DeliveryError::AlreadyDelivered { id: id.to_string() });
        }

        self.dispatch_claimed(id, None).await?;
        Ok(())
    }

    /// One sweep pass: claims and dispatches every delivery whose retry time
    /// has arrived. Per-delivery errors are logged and do not stop the pass.
    /// Returns the number of attempts actually made.
    #[instrument(skip(self))]
    pub async fn sweep_due(&self, now: DateTime<Utc>) -> Result<usize, DeliveryError> {
        let due = self.deliveries.list_due(now).await?;
        if due.is_empty() {
            return Ok(0);
        }
        debug!(count = due.len(), "Dispatching due webhook retries");

        let mut dispatched = 0;
        for id in due {
            match self.dispatch_claimed(id, Some(now)).await {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(delivery_id = %id, error = %e, "Due retry dispatch failed");
                }
            }
        }
        Ok(dispatched)
    }

    async fn dispatch_claimed(
        &self,
        id: Uuid,
        due_before: Option<DateTime<Utc>>,
    ) -> Result<bool, DeliveryError> {
        let now = Utc::now();
        let Some(delivery) = self.deliveries.claim_attempt(id, now, due_before).await? else {
            debug!(delivery_id = %id, "Delivery attempt claim rejected");
            return Ok(false);
        };

        let webhook = match self.webhooks.get_webhook(delivery.webhook_id).await? {
            Some(webhook) if webhook.is_active => webhook,
            _ => {
                warn!(
                    delivery_id = %id,
                    webhook_id = %delivery.webhook_id,
                    "Webhook missing or inactive; failing delivery"
                );
                self.deliveries
                    .record_failure(id, None, None, "webhook not found or inactive", Utc::now())
                    .await?;
                return Ok(true);
            }
        };

        let outcome = self.attempt(&webhook, &delivery).await;
        let finished_at = Utc::now();

        if outcome.success {
            info!(
                delivery_id = %id,
                webhook_id = %webhook.id,
                status_code = outcome.status_code,
                attempt = delivery.attempt_count,
                "Webhook delivered"
            );
            self.deliveries
                .record_success(
                    id,
                    outcome.status_code.unwrap_or(0),
                    outcome.body,
                    finished_at,
                )
                .await?;
            return Ok(true);
        }

        let error_message = outcome
            .error
            .unwrap_or_else(|| format!("unexpected status {:?}", outcome.status_code));

        // attempt_count reflects the attempt just made, so the 0-based retry
        // index it would schedule is attempt_count - 1.
        let retry_index = (delivery.attempt_count - 1).max(0) as usize;
        let delay = if retry_index < webhook.max_retries.max(0) as usize {
            retry_delay(retry_index)
        } else {
            None
        };

        match delay {
            Some(delay) => {
                let next_retry_at = finished_at + delay;
                warn!(
                    delivery_id = %id,
                    webhook_id = %webhook.id,
                    attempt = delivery.attempt_count,
                    next_retry_at = %next_retry_at,
                    error = %error_message,
                    "Webhook delivery failed; retry scheduled"
                );
                self.deliveries
                    .record_retry(
                        id,
                        next_retry_at,
                        outcome.status_code,
                        outcome.body,
                        &error_message,
                        finished_at,
                    )
                    .await?;
            }
            None => {
                warn!(
                    delivery_id = %id,
                    webhook_id = %webhook.id,
                    attempt = delivery.attempt_count,
                    error = %error_message,
                    "Webhook delivery failed permanently; retries exhausted"
                );
                self.deliveries
                    .record_failure(
                        id,
                        outcome.status_code,
                        outcome.body,
                        &error_message,
                        finished_at,
                    )
                    .await?;
            }
        }

        Ok(true)
    }

    async fn attempt(&self, webhook: &Webhook, delivery: &WebhookDelivery) -> AttemptOutcome {
        let mut request = self
            .http_client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Event", delivery.event.as_str())
            .header("X-Webhook-Timestamp", Utc::now().to_rfc3339())
            .timeout(self.config.request_timeout)
            .body(delivery.payload.clone());

        // An empty secret means unsigned, same as no secret at all.
        if let Some(secret) = webhook.secret.as_deref().filter(|s| !s.is_empty()) {
            request = request.header(
                "X-Webhook-Signature",
                signature_header(secret, &delivery.payload),
            );
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let body = truncate_body(body, self.config.response_body_limit);
                AttemptOutcome {
                    success: status.is_success(),
                    status_code: Some(status.as_u16() as i32),
                    body: Some(body),
                    error: if status.is_success() {
                        None
                    } else {
                        Some(format!("endpoint returned status {}", status.as_u16()))
                    },
                }
            }
            Err(e) => AttemptOutcome {
                success: false,
                status_code: None,
                body: None,
                error: Some(format!("request failed: {}", e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delays_compound_per_retry() {
        assert_eq!(retry_delay(0), Some(ChronoDuration::seconds(30)));
        assert_eq!(retry_delay(1), Some(ChronoDuration::seconds(240)));
        assert_eq!(retry_delay(2), Some(ChronoDuration::seconds(2400)));
        assert_eq!(retry_delay(3), None);
    }

    #[test]
    fn signature_matches_known_vector() {
        assert_eq!(
            signature_header("s", "{}"),
            "sha256=143ca8d517ba1b181025d732b1cf275d90104fca57bb02a565542978aa18c4b6"
        );
    }

    #[test]
    fn signature_changes_with_payload() {
        assert_ne!(
            signature_header("secret", "{\"a\":1}"),
            signature_header("secret", "{\"a\":2}")
        );
    }

    #[test]
    fn body_truncation_respects_char_boundaries() {
        assert_eq!(truncate_body("abcdef".to_string(), 4), "abcd");
        assert_eq!(truncate_body("ab".to_string(), 4000), "ab");
        // Multi-byte char straddling the limit is dropped whole.
        let s = format!("{}é", "a".repeat(3999));
        assert_eq!(truncate_body(s, 4000).len(), 3999);
    }
}
