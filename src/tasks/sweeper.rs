//! Periodic delivery sweeper.

use crate::delivery::DeliveryEngine;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Background loop that re-dispatches webhook deliveries whose retry time
/// has arrived. Runs every `interval` until the token cancels; a failed
/// sweep pass is logged and the loop keeps going.
pub struct DeliverySweeperTask {
    engine: Arc<DeliveryEngine>,
    interval: Duration,
}

impl DeliverySweeperTask {
    pub fn new(engine: Arc<DeliveryEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    #[instrument(skip(self, cancel_token), name = "delivery_sweeper")]
    pub async fn run(&self, cancel_token: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!("Delivery sweeper shutting down");
                    return Ok(());
                }
                () = tokio::time::sleep(self.interval) => {}
            }

            match self.engine.sweep_due(Utc::now()).await {
                Ok(0) => {}
                Ok(count) => {
                    debug!(count, "Sweep dispatched due webhook retries");
                }
                Err(e) => {
                    warn!(error = %e, "Delivery sweep pass failed");
                }
            }
        }
    }
}
