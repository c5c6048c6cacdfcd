//! Task spawning helpers for consistent background task handling.
//!
//! Background loops are spawned on a shared [`TaskTracker`] so shutdown can
//! wait for them, and an unexpected loop failure cancels the application
//! token to bring the whole process down rather than limping on without the
//! loop.

use std::future::Future;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};

/// Spawns a background task with start/stop logging. A task error triggers
/// application shutdown via the shared token.
pub fn spawn_managed_task<F>(
    tracker: &TaskTracker,
    app_token: CancellationToken,
    task_name: &'static str,
    task_future: F,
) where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    info!(task = task_name, "Starting background task");

    let task_token = app_token.clone();

    tracker.spawn(async move {
        match task_future.await {
            Ok(()) => {
                info!(task = task_name, "Background task completed successfully");
            }
            Err(e) => {
                error!(task = task_name, error = ?e, "Background task failed unexpectedly");
                task_token.cancel();
            }
        }
    });
}

/// Spawns a background task that receives the cancellation token, so the
/// loop itself can observe shutdown between iterations.
pub fn spawn_cancellable_task<F, Fut>(
    tracker: &TaskTracker,
    app_token: CancellationToken,
    task_name: &'static str,
    task_builder: F,
) where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    info!(task = task_name, "Starting cancellable background task");

    let task_token = app_token.clone();
    let cancel_token = app_token.clone();

    tracker.spawn(async move {
        tokio::select! {
            result = task_builder(cancel_token.clone()) => {
                match result {
                    Ok(()) => {
                        info!(task = task_name, "Background task completed successfully");
                    }
                    Err(e) => {
                        error!(task = task_name, error = ?e, "Background task failed unexpectedly");
                        task_token.cancel();
                    }
                }
            }
            () = task_token.cancelled() => {
                info!(task = task_name, "Background task shutting down gracefully");
            }
        }
    });
}
