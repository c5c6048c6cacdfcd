use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error-nocwatch-config-1 Required environment variable not set: {var_name}")]
    EnvVarRequired { var_name: String },

    #[error("error-nocwatch-config-2 Version not available")]
    VersionNotAvailable,

    #[error("error-nocwatch-config-3 Invalid port number: {port}")]
    InvalidPortNumber { port: String },

    #[error("error-nocwatch-config-4 Invalid duration value: {value}")]
    InvalidDuration { value: String },

    #[error("error-nocwatch-config-5 Invalid numeric value for {var_name}: {value}")]
    InvalidNumber { var_name: String, value: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("error-nocwatch-storage-1 Database connection failed: {source}")]
    ConnectionFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("error-nocwatch-storage-2 Query execution failed: {source}")]
    QueryFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("error-nocwatch-storage-3 Invalid stored data: {details}")]
    InvalidStoredData { details: String },

    #[error("error-nocwatch-storage-4 Invalid input data: {details}")]
    InvalidInput { details: String },
}

/// Errors surfaced by the task runtime adapter.
///
/// `Unavailable` is the transient case: callers performing a read-time
/// reconcile treat it as a soft warning and keep the stored record untouched.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("error-nocwatch-runtime-1 Task submission failed: {details}")]
    SubmitFailed { details: String },

    #[error("error-nocwatch-runtime-2 Task runtime unavailable: {details}")]
    Unavailable { details: String },

    #[error("error-nocwatch-runtime-3 Unknown task handle: {handle}")]
    UnknownHandle { handle: String },

    #[error("error-nocwatch-runtime-4 Task revocation failed: {handle}: {details}")]
    RevokeFailed { handle: String, details: String },
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("error-nocwatch-tracker-1 Job not found: {id}")]
    NotFound { id: String },

    #[error("error-nocwatch-tracker-2 Invalid transition: job {id} is already {status}")]
    InvalidTransition { id: String, status: String },

    #[error("error-nocwatch-tracker-3 Job storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("error-nocwatch-tracker-4 Task runtime operation failed: {0}")]
    Runtime(#[from] RuntimeError),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("error-nocwatch-delivery-1 Delivery not found: {id}")]
    NotFound { id: String },

    #[error("error-nocwatch-delivery-2 Webhook not found for delivery: {webhook_id}")]
    WebhookNotFound { webhook_id: String },

    #[error("error-nocwatch-delivery-3 Delivery {id} already succeeded; retry not needed")]
    AlreadyDelivered { id: String },

    #[error("error-nocwatch-delivery-4 Delivery storage operation failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("error-nocwatch-trigger-1 Webhook storage operation failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("error-nocwatch-validation-1 At least one subscribed event must be specified")]
    EmptyEventList,

    #[error("error-nocwatch-validation-2 Invalid webhook URL: {url}: {details}")]
    InvalidUrl { url: String, details: String },

    #[error("error-nocwatch-validation-3 Unknown event type: {value}")]
    UnknownEventType { value: String },

    #[error("error-nocwatch-validation-4 Unknown severity level: {value}")]
    UnknownSeverity { value: String },
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("error-nocwatch-http-100 Unhandled web error: {details}")]
    Unhandled { details: String },

    #[error("error-nocwatch-http-101 Request validation failed: {details}")]
    RequestValidation { details: String },

    #[error("error-nocwatch-http-104 Resource not found: {details}")]
    NotFound { details: String },

    #[error("error-nocwatch-http-106 Bad request: {details}")]
    BadRequest { details: String },

    #[error("error-nocwatch-http-109 Conflict: {details}")]
    Conflict { details: String },
}
