//! SLA computation workers.
//!
//! Job bodies executed by the task runtime: they report lifecycle
//! transitions through the tracker as they run, assess repair times against
//! SLA terms, and push violations through the trigger gateway.

use crate::errors::StorageError;
use crate::runtime::{ExecutionContext, JobExecutor, TaskSpec};
use crate::sla::{self, Severity, SlaAssessment};
use crate::storage::{StorageResult, WebhookEvent};
use crate::tracker::JobTracker;
use crate::trigger::EventTriggerGateway;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{info, warn};

pub const TASK_COMPUTE_DEVICE: &str = "sla.compute_device";
pub const TASK_COMPUTE_BULK: &str = "sla.compute_bulk";

/// Aggregated outage metrics for one device over one reporting period.
#[derive(Debug, Clone)]
pub struct DeviceOutage {
    /// Worst severity observed across the period's outages.
    pub severity: Severity,
    /// Mean time to repair across the period's outages, in minutes.
    pub mttr_minutes: f64,
    pub outage_count: usize,
}

/// Source of per-device outage metrics.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Returns `None` when the device had no resolved outages in the period.
    async fn outage_metrics(
        &self,
        device_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> StorageResult<Option<DeviceOutage>>;
}

#[async_trait]
impl<T: MetricsSource + ?Sized> MetricsSource for Arc<T> {
    async fn outage_metrics(
        &self,
        device_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> StorageResult<Option<DeviceOutage>> {
        self.as_ref()
            .outage_metrics(device_id, period_start, period_end)
            .await
    }
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => 3,
        Severity::High => 2,
        Severity::Medium => 1,
        Severity::Low => 0,
    }
}

pub struct PostgresMetricsSource {
    pool: PgPool,
}

impl PostgresMetricsSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsSource for PostgresMetricsSource {
    async fn outage_metrics(
        &self,
        device_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> StorageResult<Option<DeviceOutage>> {
        let rows = sqlx::query(
            r#"
            SELECT severity, occurred_at, resolved_at
            FROM device_outages
            WHERE device_id = $1
              AND occurred_at >= $2 AND occurred_at < $3
              AND resolved_at IS NOT NULL
            "#,
        )
        .bind(device_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut worst = Severity::Low;
        let mut total_minutes = 0.0;
        for row in &rows {
            let severity: Severity = row.get::<String, _>("severity").parse().map_err(|_| {
                StorageError::InvalidStoredData {
                    details: format!("unknown outage severity: {}", row.get::<String, _>("severity")),
                }
            })?;
            if severity_rank(severity) > severity_rank(worst) {
                worst = severity;
            }
            let occurred_at: DateTime<Utc> = row.get("occurred_at");
            let resolved_at: DateTime<Utc> = row.get("resolved_at");
            total_minutes += (resolved_at - occurred_at).num_seconds() as f64 / 60.0;
        }

        Ok(Some(DeviceOutage {
            severity: worst,
            mttr_minutes: total_minutes / rows.len() as f64,
            outage_count: rows.len(),
        }))
    }
}

#[derive(Deserialize)]
struct SingleArgs {
    device_id: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct BulkArgs {
    device_ids: Vec<String>,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
}

pub struct SlaComputeWorker {
    tracker: Arc<JobTracker>,
    metrics: Arc<dyn MetricsSource>,
    gateway: Arc<EventTriggerGateway>,
}

impl SlaComputeWorker {
    pub fn new(
        tracker: Arc<JobTracker>,
        metrics: Arc<dyn MetricsSource>,
        gateway: Arc<EventTriggerGateway>,
    ) -> Self {
        Self {
            tracker,
            metrics,
            gateway,
        }
    }

    async fn assess_device(
        &self,
        device_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> anyhow::Result<(SlaAssessment, usize)> {
        let outage = self
            .metrics
            .outage_metrics(device_id, period_start, period_end)
            .await?
            .ok_or_else(|| anyhow!("no resolved outages for device {device_id} in period"))?;
        Ok((
            sla::assess(outage.severity, outage.mttr_minutes),
            outage.outage_count,
        ))
    }

    async fn publish_violation(&self, device_id: &str, assessment: &SlaAssessment) {
        let data = json!({
            "device_id": device_id,
            "assessment": assessment,
        });
        if let Err(e) = self
            .gateway
            .trigger_event(WebhookEvent::SlaViolation, data)
            .await
        {
            warn!(device_id, error = %e, "Failed to fan out violation event");
        }
    }

    async fn run_single(&self, ctx: &ExecutionContext, args: &Value) -> anyhow::Result<()> {
        let args: SingleArgs =
            serde_json::from_value(args.clone()).context("invalid sla computation arguments")?;

        self.tracker.mark_started(&ctx.handle).await?;

        let (assessment, outage_count) = self
            .assess_device(&args.device_id, args.period_start, args.period_end)
            .await?;

        self.tracker.update_progress(&ctx.handle, 70.0).await?;

        if assessment.is_violated() {
            self.publish_violation(&args.device_id, &assessment).await;
        }

        let result = json!({
            "device_id": args.device_id,
            "outage_count": outage_count,
            "assessment": assessment,
        });
        self.tracker.mark_success(&ctx.handle, &result).await?;
        info!(
            device_id = %args.device_id,
            status = %assessment.status,
            "SLA computation finished"
        );
        Ok(())
    }

    async fn run_bulk(&self, ctx: &ExecutionContext, args: &Value) -> anyhow::Result<()> {
        let args: BulkArgs = serde_json::from_value(args.clone())
            .context("invalid bulk sla computation arguments")?;
        if args.device_ids.is_empty() {
            anyhow::bail!("device list is empty");
        }

        self.tracker.mark_started(&ctx.handle).await?;

        let total = args.device_ids.len();
        let mut results = Vec::with_capacity(total);
        let mut violated_devices = Vec::new();

        for (idx, device_id) in args.device_ids.iter().enumerate() {
            match self
                .assess_device(device_id, args.period_start, args.period_end)
                .await
            {
                Ok((assessment, outage_count)) => {
                    if assessment.is_violated() {
                        violated_devices.push(device_id.clone());
                        self.publish_violation(device_id, &assessment).await;
                    }
                    results.push(json!({
                        "device_id": device_id,
                        "outage_count": outage_count,
                        "assessment": assessment,
                    }));
                }
                Err(e) => {
                    // One bad device does not fail the batch; the error rides
                    // along in its result entry.
                    warn!(device_id = %device_id, error = %e, "Device assessment failed");
                    results.push(json!({
                        "device_id": device_id,
                        "error": e.to_string(),
                    }));
                }
            }

            let progress = (idx + 1) as f64 / total as f64 * 100.0;
            self.tracker.update_progress(&ctx.handle, progress).await?;
        }

        let result = json!({
            "total": total,
            "violations": violated_devices.len(),
            "violated_devices": violated_devices,
            "results": results,
        });
        self.tracker.mark_success(&ctx.handle, &result).await?;
        info!(
            total,
            violations = violated_devices.len(),
            "Bulk SLA computation finished"
        );
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for SlaComputeWorker {
    async fn execute(&self, ctx: &ExecutionContext, spec: &TaskSpec) -> anyhow::Result<()> {
        let outcome = match spec.task_name.as_str() {
            TASK_COMPUTE_DEVICE => self.run_single(ctx, &spec.args).await,
            TASK_COMPUTE_BULK => self.run_bulk(ctx, &spec.args).await,
            other => Err(anyhow!("unknown task name: {other}")),
        };

        // Intermediate failures stay invisible in the job record; only the
        // last runtime attempt records the failure as final.
        if let Err(e) = &outcome {
            if ctx.is_final_attempt() {
                if let Err(tracker_err) =
                    self.tracker.mark_failure(&ctx.handle, &e.to_string()).await
                {
                    warn!(
                        task_handle = %ctx.handle,
                        error = %tracker_err,
                        "Failed to record job failure"
                    );
                }
            }
        }

        outcome
    }
}
