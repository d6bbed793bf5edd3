//! stackhold: backup, restore, and update lifecycle manager for a
//! self-hosted service stack.
//!
//! The library wraps two external collaborators behind traits: a
//! content-addressed snapshot engine (restic) and a service group
//! controller (docker compose). The pipelines in [`pipeline`] sequence
//! them into fail-safe backup, restore, and update runs.

pub mod config;
pub mod error;
pub mod exec;
pub mod notify;
pub mod pipeline;
pub mod report;
pub mod services;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use notify::Notifier;
pub use services::{ComposeController, ServiceController};
pub use store::{ResticStore, SnapshotStore};
pub use types::{
    HealthState, ImageStatus, OperationOutcome, RetentionPolicy, Selector, ServiceHealth,
    Snapshot, StackMeta,
};
