//! Storage layer for jobs, webhooks, and delivery records.
//!
//! Each subsystem gets its own trait so the tracker, delivery engine, and
//! trigger gateway can be composed against exactly the persistence surface
//! they need, and tests can swap in the in-memory implementations from
//! `test_helpers`.

pub mod delivery;
pub mod job;
pub mod traits;
pub mod webhook;

pub use delivery::{
    DeliveryStatus, DeliveryStorage, PostgresDeliveryStorage, WebhookDelivery,
};
pub use job::{Job, JobFilter, JobStatus, JobStorage, JobType, PostgresJobStorage};
pub use traits::{Storage, StorageResult};
pub use webhook::{PostgresWebhookStorage, Webhook, WebhookEvent, WebhookStorage};

use crate::errors::StorageError;
use async_trait::async_trait;
use sqlx::PgPool;

/// Health-check handle over the shared connection pool.
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::ConnectionFailed { source: e })?;
        Ok(())
    }
}
