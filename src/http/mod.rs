//! HTTP API surface.
//!
//! Thin axum handlers over the tracker, delivery engine, and webhook
//! storage. Handlers serialize domain errors into `{"error", "message"}`
//! bodies and never leak internals beyond the error message text.

pub mod context;
pub(crate) mod errors;
mod handle_jobs;
mod handle_webhooks;
pub mod server;

pub use context::WebContext;
pub use server::build_router;
