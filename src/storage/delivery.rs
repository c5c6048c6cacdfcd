//! Webhook delivery records and the conditional attempt claim.
//!
//! A delivery is one logical attempt-sequence to deliver a single event
//! occurrence to a single webhook. `claim_attempt` is the concurrency
//! control point: it increments the attempt counter and flips the status in
//! one conditional UPDATE, so a periodic sweep racing another sweep cycle or
//! a manual retry can never record the same attempt twice. The claim also
//! clears `next_retry_at`, which is what makes a second due-only claim miss.

use super::StorageResult;
use super::webhook::WebhookEvent;
use crate::errors::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::str::FromStr;
use tracing::error;
use uuid::Uuid;

/// Delivery states. `Pending` and `Retrying` are the only non-terminal
/// states; `nextRetryAt` is set iff the status is `Retrying`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            other => Err(StorageError::InvalidStoredData {
                details: format!("unknown delivery status: {}", other),
            }),
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivery record. The payload snapshot is fixed at creation so later
/// webhook edits never change in-flight deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event: WebhookEvent,

    /// Serialized `{event, timestamp, data}` envelope; these exact bytes are
    /// what gets POSTed and signed.
    pub payload: String,

    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn new(webhook_id: Uuid, event: WebhookEvent, payload: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            webhook_id,
            event,
            payload,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            next_retry_at: None,
            response_status_code: None,
            response_body: None,
            error_message: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage trait for delivery persistence.
#[async_trait]
pub trait DeliveryStorage: Send + Sync {
    async fn create_delivery(&self, delivery: &WebhookDelivery) -> StorageResult<()>;

    async fn get_delivery(&self, id: Uuid) -> StorageResult<Option<WebhookDelivery>>;

    async fn list_deliveries(
        &self,
        webhook_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> StorageResult<Vec<WebhookDelivery>>;

    /// Atomically claims one delivery attempt.
    ///
    /// Increments `attempt_count`, sets the status for the in-flight attempt
    /// (`Pending` for the very first attempt, `Retrying` after), and clears
    /// `next_retry_at`, all in a single conditional statement. With
    /// `due_before` set (the sweep path) the claim requires
    /// `status = Retrying` and `next_retry_at <= due_before`; without it
    /// (the direct and manual-retry path) any non-`Success` delivery
    /// qualifies, including terminal `Failed` ones being retried by hand.
    ///
    /// Returns the claimed row, or `None` when the guard rejected the claim
    /// (terminal, not due, or already claimed by a concurrent caller).
    async fn claim_attempt(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        due_before: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<WebhookDelivery>>;

    /// Records a successful attempt: terminal `Success`, diagnostics, and
    /// `delivered_at`.
    async fn record_success(
        &self,
        id: Uuid,
        response_status_code: i32,
        response_body: Option<String>,
        at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Records a failed attempt that will be retried: status `Retrying`,
    /// `next_retry_at`, and last-attempt diagnostics.
    async fn record_retry(
        &self,
        id: Uuid,
        next_retry_at: DateTime<Utc>,
        response_status_code: Option<i32>,
        response_body: Option<String>,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Records a permanently failed attempt: terminal `Failed`, cleared
    /// `next_retry_at`, and last-attempt diagnostics.
    async fn record_failure(
        &self,
        id: Uuid,
        response_status_code: Option<i32>,
        response_body: Option<String>,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Ids of deliveries due for retry: `status = Retrying` with
    /// `next_retry_at <= now`.
    async fn list_due(&self, now: DateTime<Utc>) -> StorageResult<Vec<Uuid>>;
}

#[async_trait]
impl<T: DeliveryStorage + ?Sized> DeliveryStorage for std::sync::Arc<T> {
    async fn create_delivery(&self, delivery: &WebhookDelivery) -> StorageResult<()> {
        self.as_ref().create_delivery(delivery).await
    }

    async fn get_delivery(&self, id: Uuid) -> StorageResult<Option<WebhookDelivery>> {
        self.as_ref().get_delivery(id).await
    }

    async fn list_deliveries(
        &self,
        webhook_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> StorageResult<Vec<WebhookDelivery>> {
        self.as_ref().list_deliveries(webhook_id, status, limit).await
    }

    async fn claim_attempt(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        due_before: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<WebhookDelivery>> {
        self.as_ref().claim_attempt(id, now, due_before).await
    }

    async fn record_success(
        &self,
        id: Uuid,
        response_status_code: i32,
        response_body: Option<String>,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.as_ref()
            .record_success(id, response_status_code, response_body, at)
            .await
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
        self.as_ref()
            .record_retry(id, next_retry_at, response_status_code, response_body, error_message, at)
            .await
    }

    async fn record_failure(
        &self,
        id: Uuid,
        response_status_code: Option<i32>,
        response_body: Option<String>,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.as_ref()
            .record_failure(id, response_status_code, response_body, error_message, at)
            .await
    }

    async fn list_due(&self, now: DateTime<Utc>) -> StorageResult<Vec<Uuid>> {
        self.as_ref().list_due(now).await
    }
}

pub struct PostgresDeliveryStorage {
    pool: PgPool,
}

impl PostgresDeliveryStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn delivery_from_row(row: &PgRow) -> StorageResult<WebhookDelivery> {
    let event: String = row.get("event");
    Ok(WebhookDelivery {
        id: row.get("id"),
        webhook_id: row.get("webhook_id"),
        event: event
            .parse()
            .map_err(|_| StorageError::InvalidStoredData {
                details: format!("unknown delivery event: {}", event),
            })?,
        payload: row.get("payload"),
        status: row.get::<String, _>("status").parse()?,
        attempt_count: row.get("attempt_count"),
        next_retry_at: row.get("next_retry_at"),
        response_status_code: row.get("response_status_code"),
        response_body: row.get("response_body"),
        error_message: row.get("error_message"),
        delivered_at: row.get("delivered_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const DELIVERY_COLUMNS: &str = "id, webhook_id, event, payload, status, attempt_count, \
                                next_retry_at, response_status_code, response_body, \
                                error_message, delivered_at, created_at, updated_at";

#[async_trait]
impl DeliveryStorage for PostgresDeliveryStorage {
    async fn create_delivery(&self, delivery: &WebhookDelivery) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries (id, webhook_id, event, payload, status,
                                            attempt_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.webhook_id)
        .bind(delivery.event.as_str())
        .bind(&delivery.payload)
        .bind(delivery.status.as_str())
        .bind(delivery.attempt_count)
        .bind(delivery.created_at)
        .bind(delivery.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, delivery_id = %delivery.id, "Failed to create delivery");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }

    async fn get_delivery(&self, id: Uuid) -> StorageResult<Option<WebhookDelivery>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM webhook_deliveries WHERE id = $1",
            DELIVERY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        row.as_ref().map(delivery_from_row).transpose()
    }

    async fn list_deliveries(
        &self,
        webhook_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> StorageResult<Vec<WebhookDelivery>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM webhook_deliveries
            WHERE webhook_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
            DELIVERY_COLUMNS
        ))
        .bind(webhook_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        rows.iter().map(delivery_from_row).collect()
    }

    async fn claim_attempt(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        due_before: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<WebhookDelivery>> {
        // References to attempt_count on the right-hand side of SET read the
        // pre-update value, so the CASE picks the status for the attempt
        // being claimed.
        let row = sqlx::query(&format!(
            r#"
            UPDATE webhook_deliveries
            SET attempt_count = attempt_count + 1,
                status = CASE WHEN attempt_count = 0 THEN 'pending' ELSE 'retrying' END,
                next_retry_at = NULL,
                updated_at = $2
            WHERE id = $1
              AND CASE WHEN $3::timestamptz IS NULL
                       THEN status IN ('pending', 'retrying', 'failed')
                       ELSE status = 'retrying' AND next_retry_at <= $3
                  END
            RETURNING {}
            "#,
            DELIVERY_COLUMNS
        ))
        .bind(id)
        .bind(now)
        .bind(due_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        row.as_ref().map(delivery_from_row).transpose()
    }

    async fn record_success(
        &self,
        id: Uuid,
        response_status_code: i32,
        response_body: Option<String>,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'success', response_status_code = $2, response_body = $3,
                error_message = NULL, delivered_at = $4, next_retry_at = NULL,
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(response_status_code)
        .bind(response_body)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

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
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'retrying', next_retry_at = $2, response_status_code = $3,
                response_body = $4, error_message = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_retry_at)
        .bind(response_status_code)
        .bind(response_body)
        .bind(error_message)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

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
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = 'failed', next_retry_at = NULL, response_status_code = $2,
                response_body = $3, error_message = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(response_status_code)
        .bind(response_body)
        .bind(error_message)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> StorageResult<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM webhook_deliveries
            WHERE status = 'retrying' AND next_retry_at <= $1
            ORDER BY next_retry_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::Retrying.is_terminal());
        assert!(DeliveryStatus::Success.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
    }

    #[test]
    fn new_delivery_starts_pending_with_zero_attempts() {
        let delivery = WebhookDelivery::new(
            Uuid::new_v4(),
            WebhookEvent::SlaViolation,
            "{\"event\":\"sla.violation\"}".to_string(),
        );
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.attempt_count, 0);
        assert!(delivery.next_retry_at.is_none());
        assert!(delivery.delivered_at.is_none());
    }
}
