//! Snapshot store backed by the restic binary
//!
//! All structured data crosses the boundary as JSON (`--json`), never as
//! scraped table output.

use crate::error::{Error, Result};
use crate::exec;
use crate::store::SnapshotStore;
use crate::types::{RetentionPolicy, Snapshot};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Client for a restic repository, addressed by location and credential
pub struct ResticStore {
    repository: String,
    password: String,
}

/// Final line of `restic backup --json` output
#[derive(Debug, Deserialize)]
struct BackupMessage {
    message_type: String,
    #[serde(default)]
    snapshot_id: String,
}

impl ResticStore {
    pub fn new(repository: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            password: password.into(),
        }
    }

    fn envs(&self) -> [(&str, &str); 2] {
        [
            ("RESTIC_REPOSITORY", self.repository.as_str()),
            ("RESTIC_PASSWORD", self.password.as_str()),
        ]
    }

    fn restic(&self, args: &[&str]) -> Result<String> {
        exec::run("restic", args, &self.envs())
    }

    fn restic_check(&self, args: &[&str]) -> Result<bool> {
        exec::run_check("restic", args, &self.envs())
    }

    /// Fetch one snapshot's metadata by id
    fn snapshot_by_id(&self, id: &str) -> Result<Snapshot> {
        let output = self
            .restic(&["snapshots", "--json", id])
            .map_err(|e| Error::SnapshotFailed(e.to_string()))?;
        parse_snapshots(&output)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::SnapshotNotFound(id.to_string()))
    }
}

impl SnapshotStore for ResticStore {
    fn ensure_repository(&self) -> Result<()> {
        let reachable = self
            .restic_check(&["cat", "config", "--no-lock"])
            .map_err(|e| Error::RepositoryUnreachable(e.to_string()))?;
        if reachable {
            return Ok(());
        }

        // Absent or never initialized; try to create it, then re-probe.
        self.restic(&["init"]).map_err(|e| {
            Error::RepositoryUnreachable(format!("initialization failed: {}", e))
        })?;

        let reachable = self
            .restic_check(&["cat", "config", "--no-lock"])
            .map_err(|e| Error::RepositoryUnreachable(e.to_string()))?;
        if reachable {
            Ok(())
        } else {
            Err(Error::RepositoryUnreachable(self.repository.clone()))
        }
    }

    fn create_snapshot(
        &self,
        paths: &[PathBuf],
        excludes: &[String],
        tags: &[String],
    ) -> Result<Snapshot> {
        let mut args: Vec<String> = vec!["backup".to_string(), "--json".to_string()];
        for tag in tags {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }
        for pattern in excludes {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }
        for path in paths {
            args.push(path.display().to_string());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self
            .restic(&arg_refs)
            .map_err(|e| Error::SnapshotFailed(e.to_string()))?;

        let id = parse_backup_summary(&output)?;
        self.snapshot_by_id(&id)
    }

    fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let output = self
            .restic(&["snapshots", "--json"])
            .map_err(|e| Error::RepositoryUnreachable(e.to_string()))?;
        parse_snapshots(&output)
    }

    fn restore(&self, snapshot: &Snapshot, target: &Path) -> Result<()> {
        let target_str = target.display().to_string();
        self.restic(&["restore", &snapshot.id, "--target", &target_str])
            .map_err(|e| Error::RestoreFailed(e.to_string()))?;
        Ok(())
    }

    fn prune(&self, policy: &RetentionPolicy) -> Result<()> {
        let daily = policy.daily.to_string();
        let weekly = policy.weekly.to_string();
        let monthly = policy.monthly.to_string();
        self.restic(&[
            "forget",
            "--prune",
            "--keep-daily",
            &daily,
            "--keep-weekly",
            &weekly,
            "--keep-monthly",
            &monthly,
        ])?;
        Ok(())
    }

    fn verify_integrity(&self) -> Result<bool> {
        self.restic_check(&["check"])
    }
}

/// Parse `restic snapshots --json` output into newest-first order
fn parse_snapshots(json: &str) -> Result<Vec<Snapshot>> {
    let trimmed = json.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let mut snapshots: Vec<Snapshot> = serde_json::from_str(trimmed)?;
    snapshots.sort_by(|a, b| b.time.cmp(&a.time));
    Ok(snapshots)
}

/// Pull the snapshot id out of the NDJSON stream emitted by `backup --json`
fn parse_backup_summary(output: &str) -> Result<String> {
    for line in output.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(msg) = serde_json::from_str::<BackupMessage>(line) {
            if msg.message_type == "summary" && !msg.snapshot_id.is_empty() {
                return Ok(msg.snapshot_id);
            }
        }
    }
    Err(Error::SnapshotFailed(
        "backup produced no summary record".to_string(),
    ))
}
