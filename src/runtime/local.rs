//! In-process task runtime.
//!
//! Runs job bodies on the ambient tokio runtime with the same
//! bounded-attempts-and-fixed-delay retry behavior an external execution
//! backend would apply. Handles are UUIDs; per-handle state lives in memory,
//! so a restart forgets in-flight tasks and the tracker's read-time
//! reconcile surfaces that as an unavailable-runtime warning.

use super::{ExecutionContext, JobExecutor, RuntimeTaskState, TaskRuntime, TaskSpec};
use crate::config::RuntimeRetryConfig;
use crate::errors::RuntimeError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

struct TaskEntry {
    state: RuntimeTaskState,
    cancel: CancellationToken,
}

pub struct LocalTaskRuntime {
    entries: RwLock<HashMap<String, Arc<Mutex<TaskEntry>>>>,
    // Set after construction; the executor itself holds a tracker that needs
    // a runtime reference, so the cycle is broken with a late registration.
    executor: OnceLock<Arc<dyn JobExecutor>>,
    retry: RuntimeRetryConfig,
}

impl LocalTaskRuntime {
    pub fn new(retry: RuntimeRetryConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            executor: OnceLock::new(),
            retry,
        }
    }

    /// Registers the executor that will run submitted task bodies. Must be
    /// called exactly once before the first submission.
    pub fn set_executor(&self, executor: Arc<dyn JobExecutor>) {
        if self.executor.set(executor).is_err() {
            warn!("Task executor already registered; ignoring replacement");
        }
    }
}

#[async_trait]
impl TaskRuntime for LocalTaskRuntime {
    async fn submit(&self, spec: TaskSpec) -> Result<String, RuntimeError> {
        let executor =
            self.executor
                .get()
                .cloned()
                .ok_or_else(|| RuntimeError::SubmitFailed {
                    details: "no task executor registered".to_string(),
                })?;

        let handle = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let entry = Arc::new(Mutex::new(TaskEntry {
            state: RuntimeTaskState::Pending,
            cancel: cancel.clone(),
        }));
        self.entries
            .write()
            .insert(handle.clone(), entry.clone());

        debug!(handle = %handle, task_name = %spec.task_name, "Submitting task");

        let max_attempts = self.retry.max_attempts.max(1);
        let retry_delay = self.retry.retry_delay;
        let task_handle = handle.clone();

        tokio::spawn(async move {
            // Revocation before start wins; the body never runs.
            if cancel.is_cancelled() {
                entry.lock().state = RuntimeTaskState::Revoked;
                return;
            }
            entry.lock().state = RuntimeTaskState::Started;

            for attempt in 1..=max_attempts {
                let ctx = ExecutionContext {
                    handle: task_handle.clone(),
                    attempt,
                    max_attempts,
                };
                match executor.execute(&ctx, &spec).await {
                    Ok(()) => {
                        entry.lock().state = RuntimeTaskState::Success;
                        return;
                    }
                    Err(e) => {
                        warn!(
                            handle = %task_handle,
                            task_name = %spec.task_name,
                            attempt,
                            max_attempts,
                            error = ?e,
                            "Task attempt failed"
                        );
                        if attempt < max_attempts {
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    entry.lock().state = RuntimeTaskState::Revoked;
                                    return;
                                }
                                _ = sleep(retry_delay) => {}
                            }
                        }
                    }
                }
            }

            entry.lock().state = RuntimeTaskState::Failure;
        });

        Ok(handle)
    }

    async fn query_state(&self, handle: &str) -> Result<RuntimeTaskState, RuntimeError> {
        let entry = self
            .entries
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownHandle {
                handle: handle.to_string(),
            })?;
        let state = entry.lock().state;
        Ok(state)
    }

    async fn revoke(&self, handle: &str, _terminate: bool) -> Result<(), RuntimeError> {
        let entry = self
            .entries
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownHandle {
                handle: handle.to_string(),
            })?;

        let mut guard = entry.lock();
        guard.cancel.cancel();
        if guard.state == RuntimeTaskState::Pending {
            guard.state = RuntimeTaskState::Revoked;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingExecutor {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute(&self, _ctx: &ExecutionContext, _spec: &TaskSpec) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                anyhow::bail!("transient failure {call}");
            }
            Ok(())
        }
    }

    fn fast_retry(max_attempts: u32) -> RuntimeRetryConfig {
        RuntimeRetryConfig {
            max_attempts,
            retry_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let runtime = LocalTaskRuntime::new(fast_retry(3));
        let executor = Arc::new(CountingExecutor {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        runtime.set_executor(executor.clone());

        let handle = runtime
            .submit(TaskSpec::new("test.task", json!({})))
            .await
            .unwrap();

        for _ in 0..200 {
            if runtime.query_state(&handle).await.unwrap() == RuntimeTaskState::Success {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            runtime.query_state(&handle).await.unwrap(),
            RuntimeTaskState::Success
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausting_attempts_reports_failure() {
        let runtime = LocalTaskRuntime::new(fast_retry(2));
        let executor = Arc::new(CountingExecutor {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        runtime.set_executor(executor.clone());

        let handle = runtime
            .submit(TaskSpec::new("test.task", json!({})))
            .await
            .unwrap();

        for _ in 0..200 {
            if runtime.query_state(&handle).await.unwrap() == RuntimeTaskState::Failure {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            runtime.query_state(&handle).await.unwrap(),
            RuntimeTaskState::Failure
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_unknown_handle_fails() {
        let runtime = LocalTaskRuntime::new(fast_retry(1));
        assert!(matches!(
            runtime.query_state("missing").await,
            Err(RuntimeError::UnknownHandle { .. })
        ));
    }

    #[tokio::test]
    async fn submit_without_executor_fails() {
        let runtime = LocalTaskRuntime::new(fast_retry(1));
        assert!(matches!(
            runtime.submit(TaskSpec::new("test.task", json!({}))).await,
            Err(RuntimeError::SubmitFailed { .. })
        ));
    }
}
