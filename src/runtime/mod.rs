//! Task runtime abstraction.
//!
//! The tracker submits work through [`TaskRuntime`] and never assumes the
//! backend is reachable afterwards: state queries can fail transiently and
//! are treated as soft by callers. [`JobExecutor`] is the inverse seam, the
//! runtime calls back into application code to run one job body.

pub mod local;

use crate::errors::RuntimeError;
use async_trait::async_trait;
use serde_json::Value;

pub use local::LocalTaskRuntime;

/// Execution state of a task as reported by the runtime backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeTaskState {
    Pending,
    Started,
    Success,
    Failure,
    Revoked,
}

/// One unit of work handed to the runtime at submission.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Registered task name, e.g. `sla.compute_device`.
    pub task_name: String,
    /// Serialized arguments, opaque to the runtime.
    pub args: Value,
}

impl TaskSpec {
    pub fn new(task_name: impl Into<String>, args: Value) -> Self {
        Self {
            task_name: task_name.into(),
            args,
        }
    }
}

/// Per-attempt context handed to the executor.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Runtime handle of the task being executed.
    pub handle: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl ExecutionContext {
    /// True when the runtime will not retry after this attempt. Workers use
    /// this to record a failure as final only once the retry budget is spent.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Fire-and-forget execution backend.
#[async_trait]
pub trait TaskRuntime: Send + Sync {
    /// Submits a task for execution and returns its opaque handle.
    async fn submit(&self, spec: TaskSpec) -> Result<String, RuntimeError>;

    /// Queries the runtime's view of a task. May fail transiently with
    /// [`RuntimeError::Unavailable`].
    async fn query_state(&self, handle: &str) -> Result<RuntimeTaskState, RuntimeError>;

    /// Requests revocation. With `terminate` false this only prevents a task
    /// that has not started yet; a running body is left alone.
    async fn revoke(&self, handle: &str, terminate: bool) -> Result<(), RuntimeError>;
}

#[async_trait]
impl<T: TaskRuntime + ?Sized> TaskRuntime for std::sync::Arc<T> {
    async fn submit(&self, spec: TaskSpec) -> Result<String, RuntimeError> {
        self.as_ref().submit(spec).await
    }

    async fn query_state(&self, handle: &str) -> Result<RuntimeTaskState, RuntimeError> {
        self.as_ref().query_state(handle).await
    }

    async fn revoke(&self, handle: &str, terminate: bool) -> Result<(), RuntimeError> {
        self.as_ref().revoke(handle, terminate).await
    }
}

/// Application-side job body invoked by the runtime.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext, spec: &TaskSpec) -> anyhow::Result<()>;
}
