//! Durable job tracking and webhook delivery for network operations SLA
//! monitoring.
//!
//! The service accepts SLA computation work over HTTP, runs it on a
//! fire-and-forget task runtime while keeping a pollable job record in
//! Postgres, and pushes SLA events to registered webhooks with signed
//! payloads and bounded retries.

/// SLA computation workers executed by the task runtime.
pub mod compute;

/// Environment-driven service configuration.
pub mod config;

/// Webhook delivery engine: signed HTTP attempts and the retry schedule.
pub mod delivery;

/// Error types for every subsystem.
pub mod errors;

/// axum HTTP API.
pub mod http;

/// Task runtime abstraction and the in-process implementation.
pub mod runtime;

/// SLA threshold policies and assessment rules.
pub mod sla;

/// Postgres-backed persistence for jobs, webhooks, and deliveries.
pub mod storage;

/// Background task spawning and the delivery sweeper.
pub mod tasks;

/// In-memory fakes shared by unit and integration tests.
pub mod test_helpers;

/// Job lifecycle tracker bridging the runtime and storage.
pub mod tracker;

/// Event fan-out from domain events to webhook deliveries.
pub mod trigger;
