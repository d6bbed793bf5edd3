//! Service group controller

mod compose;

pub use compose::ComposeController;

use crate::error::Result;
use crate::types::ServiceHealth;
use std::collections::BTreeMap;
use std::time::Duration;

/// Owner of the service group. Pipelines never touch services directly;
/// every start, stop, and restart goes through this trait.
pub trait ServiceController {
    /// Stop the full service group. Idempotent: stopping an already
    /// stopped group succeeds.
    fn stop_all(&self) -> Result<()>;

    /// Start (or recreate) the full service group. Idempotent.
    fn start_all(&self) -> Result<()>;

    /// Restart one service for targeted remediation, without touching
    /// the rest of the group
    fn restart(&self, service: &str) -> Result<()>;

    /// Poll each service's liveness signal with bounded retry. A running
    /// service with no probe defined is reported healthy.
    fn health_check(&self, timeout: Duration) -> Result<Vec<ServiceHealth>>;

    /// Names of the services currently running
    fn running_services(&self) -> Result<Vec<String>>;

    /// Image id each service's container was actually created from,
    /// None for services with no container. This is the "current" side
    /// of an update comparison; the tag-resolved id moves as soon as a
    /// pull happens, the container's image does not.
    fn container_image_ids(&self) -> Result<BTreeMap<String, Option<String>>>;

    /// Locally-present image id for each service's configured image
    /// reference, None when the image has never been pulled
    fn image_ids(&self) -> Result<BTreeMap<String, Option<String>>>;

    /// Pull the latest images for every service
    fn pull_images(&self) -> Result<()>;
}
