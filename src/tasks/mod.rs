//! Background task infrastructure.
//!
//! Long-running loops are spawned through the helpers in [`manager`] so
//! their lifecycle is tracked and failures propagate into application
//! shutdown. The only permanent loop is the delivery sweeper.

pub mod manager;
pub mod sweeper;

pub use manager::{spawn_cancellable_task, spawn_managed_task};
pub use sweeper::DeliverySweeperTask;
