//! Content-addressed snapshot store

mod restic;

pub use restic::ResticStore;

use crate::error::{Error, Result};
use crate::types::{RetentionPolicy, Selector, Snapshot};
use std::path::{Path, PathBuf};

/// Contract over the external content-addressed backup engine.
///
/// Abstracting the engine keeps the pipelines testable against a mock
/// without a repository or network in reach.
pub trait SnapshotStore {
    /// Verify the repository is reachable, initializing it if absent
    fn ensure_repository(&self) -> Result<()>;

    /// Create a snapshot of the given paths. On failure no snapshot id is
    /// registered, partially or otherwise.
    fn create_snapshot(
        &self,
        paths: &[PathBuf],
        excludes: &[String],
        tags: &[String],
    ) -> Result<Snapshot>;

    /// All snapshots in the repository, newest first
    fn list_snapshots(&self) -> Result<Vec<Snapshot>>;

    /// Extract a snapshot beneath `target`. Never restores in place over
    /// the live installation; on failure the target is undefined and must
    /// not be treated as usable.
    fn restore(&self, snapshot: &Snapshot, target: &Path) -> Result<()>;

    /// Apply the retention policy. Idempotent: a second call with no new
    /// snapshots is a no-op.
    fn prune(&self, policy: &RetentionPolicy) -> Result<()>;

    /// Structural repository check. A failed check is diagnostic only.
    fn verify_integrity(&self) -> Result<bool>;

    /// Resolve a selector against the repository. Snapshots are ordered
    /// newest first, so ambiguous prefixes resolve to the most recent match.
    fn resolve_selector(&self, selector: &Selector) -> Result<Snapshot> {
        self.list_snapshots()?
            .into_iter()
            .find(|snapshot| selector.matches(snapshot))
            .ok_or_else(|| Error::SnapshotNotFound(selector.to_string()))
    }
}
