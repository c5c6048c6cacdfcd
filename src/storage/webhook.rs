//! Webhook endpoint registrations.
//!
//! Webhooks are created and edited by operator action and read-only to the
//! delivery engine. The subscribed event list is stored as JSON-encoded text,
//! exactly as operators submitted it; a row with an unparseable list is
//! skipped with a warning during fan-out rather than failing the trigger.

use super::StorageResult;
use crate::errors::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::str::FromStr;
use tracing::error;
use uuid::Uuid;

/// Event types that webhooks can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEvent {
    #[serde(rename = "sla.violation")]
    SlaViolation,
    #[serde(rename = "sla.warning")]
    SlaWarning,
    #[serde(rename = "sla.resolved")]
    SlaResolved,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlaViolation => "sla.violation",
            Self::SlaWarning => "sla.warning",
            Self::SlaResolved => "sla.resolved",
        }
    }
}

impl FromStr for WebhookEvent {
    type Err = crate::errors::ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sla.violation" => Ok(Self::SlaViolation),
            "sla.warning" => Ok(Self::SlaWarning),
            "sla.resolved" => Ok(Self::SlaResolved),
            other => Err(crate::errors::ValidationError::UnknownEventType {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered external HTTP endpoint subscribed to one or more event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Uuid,
    pub name: String,
    pub url: String,

    /// Optional HMAC-SHA256 signing secret. When present, deliveries carry
    /// an `X-Webhook-Signature` header over the exact body bytes.
    pub secret: Option<String>,

    /// JSON-encoded list of event-type tags, e.g. `["sla.violation"]`.
    pub events: String,

    /// Retry budget for failed deliveries, beyond the initial attempt.
    pub max_retries: i32,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    pub fn new(
        name: String,
        url: String,
        secret: Option<String>,
        events: &[WebhookEvent],
        max_retries: i32,
        is_active: bool,
    ) -> Self {
        let now = Utc::now();
        let tags: Vec<&str> = events.iter().map(|e| e.as_str()).collect();
        Self {
            id: Uuid::new_v4(),
            name,
            url,
            secret,
            events: serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string()),
            max_retries,
            is_active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parses the stored event list. Fails on malformed JSON or unknown tags;
    /// callers decide whether that is fatal (API serialization) or skippable
    /// (delivery fan-out).
    pub fn subscribed_events(&self) -> Result<Vec<WebhookEvent>, crate::errors::ValidationError> {
        let tags: Vec<String> = serde_json::from_str(&self.events).map_err(|e| {
            crate::errors::ValidationError::UnknownEventType {
                value: format!("{}: {}", self.events, e),
            }
        })?;
        tags.iter().map(|tag| tag.parse()).collect()
    }
}

/// Storage trait for webhook registrations.
#[async_trait]
pub trait WebhookStorage: Send + Sync {
    async fn create_webhook(&self, webhook: &Webhook) -> StorageResult<()>;

    async fn get_webhook(&self, id: Uuid) -> StorageResult<Option<Webhook>>;

    async fn list_webhooks(&self, is_active: Option<bool>) -> StorageResult<Vec<Webhook>>;

    async fn update_webhook(&self, webhook: &Webhook) -> StorageResult<()>;

    /// Deletes the webhook; deliveries cascade at the database level.
    async fn delete_webhook(&self, id: Uuid) -> StorageResult<()>;
}

#[async_trait]
impl<T: WebhookStorage + ?Sized> WebhookStorage for std::sync::Arc<T> {
    async fn create_webhook(&self, webhook: &Webhook) -> StorageResult<()> {
        self.as_ref().create_webhook(webhook).await
    }

    async fn get_webhook(&self, id: Uuid) -> StorageResult<Option<Webhook>> {
        self.as_ref().get_webhook(id).await
    }

    async fn list_webhooks(&self, is_active: Option<bool>) -> StorageResult<Vec<Webhook>> {
        self.as_ref().list_webhooks(is_active).await
    }

    async fn update_webhook(&self, webhook: &Webhook) -> StorageResult<()> {
        self.as_ref().update_webhook(webhook).await
    }

    async fn delete_webhook(&self, id: Uuid) -> StorageResult<()> {
        self.as_ref().delete_webhook(id).await
    }
}

pub struct PostgresWebhookStorage {
    pool: PgPool,
}

impl PostgresWebhookStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn webhook_from_row(row: &PgRow) -> Webhook {
    Webhook {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        secret: row.get("secret"),
        events: row.get("events"),
        max_retries: row.get("max_retries"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const WEBHOOK_COLUMNS: &str =
    "id, name, url, secret, events, max_retries, is_active, created_at, updated_at";

#[async_trait]
impl WebhookStorage for PostgresWebhookStorage {
    async fn create_webhook(&self, webhook: &Webhook) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhooks (id, name, url, secret, events, max_retries,
                                  is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(webhook.id)
        .bind(&webhook.name)
        .bind(&webhook.url)
        .bind(&webhook.secret)
        .bind(&webhook.events)
        .bind(webhook.max_retries)
        .bind(webhook.is_active)
        .bind(webhook.created_at)
        .bind(webhook.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, webhook_id = %webhook.id, "Failed to create webhook");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }

    async fn get_webhook(&self, id: Uuid) -> StorageResult<Option<Webhook>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM webhooks WHERE id = $1",
            WEBHOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(row.as_ref().map(webhook_from_row))
    }

    async fn list_webhooks(&self, is_active: Option<bool>) -> StorageResult<Vec<Webhook>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM webhooks
            WHERE ($1::bool IS NULL OR is_active = $1)
            ORDER BY created_at DESC
            "#,
            WEBHOOK_COLUMNS
        ))
        .bind(is_active)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(rows.iter().map(webhook_from_row).collect())
    }

    async fn update_webhook(&self, webhook: &Webhook) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE webhooks
            SET name = $2, url = $3, secret = $4, events = $5, max_retries = $6,
                is_active = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(webhook.id)
        .bind(&webhook.name)
        .bind(&webhook.url)
        .bind(&webhook.secret)
        .bind(&webhook.events)
        .bind(webhook.max_retries)
        .bind(webhook.is_active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(())
    }

    async fn delete_webhook(&self, id: Uuid) -> StorageResult<()> {
        sqlx::query("DELETE FROM webhooks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tags_round_trip() {
        for event in [
            WebhookEvent::SlaViolation,
            WebhookEvent::SlaWarning,
            WebhookEvent::SlaResolved,
        ] {
            assert_eq!(event.as_str().parse::<WebhookEvent>().unwrap(), event);
        }
        assert!("sla.unknown".parse::<WebhookEvent>().is_err());
    }

    #[test]
    fn subscribed_events_parses_stored_json() {
        let webhook = Webhook::new(
            "ops".to_string(),
            "https://example.com/hook".to_string(),
            None,
            &[WebhookEvent::SlaViolation, WebhookEvent::SlaResolved],
            3,
            true,
        );
        let events = webhook.subscribed_events().expect("valid event list");
        assert_eq!(
            events,
            vec![WebhookEvent::SlaViolation, WebhookEvent::SlaResolved]
        );
    }

    #[test]
    fn subscribed_events_rejects_malformed_json() {
        let mut webhook = Webhook::new(
            "broken".to_string(),
            "https://example.com/hook".to_string(),
            None,
            &[WebhookEvent::SlaViolation],
            3,
            true,
        );
        webhook.events = "not json".to_string();
        assert!(webhook.subscribed_events().is_err());

        webhook.events = "[\"sla.unknown\"]".to_string();
        assert!(webhook.subscribed_events().is_err());
    }
}
