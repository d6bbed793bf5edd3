//! Backup pipeline
//!
//! `Idle -> RepoEnsured -> PreBackupSnapshotTaken -> [ServicesStopped] ->
//! SnapshotCreated -> Pruned -> Verified -> Notified`. Verification
//! failure is diagnostic only; the snapshot is already durable by then.

use crate::config::Config;
use crate::error::Result;
use crate::exec;
use crate::notify::Notifier;
use crate::pipeline::QuiesceGuard;
use crate::report;
use crate::services::ServiceController;
use crate::store::SnapshotStore;
use crate::types::{OperationOutcome, Snapshot, StackMeta};
use chrono::Utc;
use std::fs;

/// Tag applied to every scheduled backup snapshot
pub const BACKUP_TAG: &str = "automated-backup";

#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Stop the service group for a consistent capture. Disabling trades
    /// consistency for zero downtime.
    pub stop_services: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            stop_services: true,
        }
    }
}

pub struct BackupPipeline<'a, S: SnapshotStore, C: ServiceController> {
    store: &'a S,
    services: &'a C,
    config: &'a Config,
    notifier: &'a Notifier,
}

impl<'a, S: SnapshotStore, C: ServiceController> BackupPipeline<'a, S, C> {
    pub fn new(
        store: &'a S,
        services: &'a C,
        config: &'a Config,
        notifier: &'a Notifier,
    ) -> Self {
        Self {
            store,
            services,
            config,
            notifier,
        }
    }

    /// Run the full pipeline. Exactly one notification attempt per run,
    /// success or failure.
    pub fn run(&self, opts: &BackupOptions) -> Result<Snapshot> {
        let started = Utc::now();
        let result = self.execute(opts);
        let outcome = OperationOutcome::record(
            "backup",
            started,
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
        );
        self.notifier.send(&outcome);
        if let Ok(snapshot) = &result {
            report::success(&format!("Backup finished: snapshot {}", snapshot.short()));
        }
        result
    }

    pub(crate) fn execute(&self, opts: &BackupOptions) -> Result<Snapshot> {
        report::info("Checking repository...");
        self.store.ensure_repository()?;

        self.write_meta()?;

        let snapshot = if opts.stop_services {
            report::info("Stopping services for a consistent capture...");
            let guard = QuiesceGuard::stop(self.services)?;
            let snapshot = self.create()?;
            guard.resume()?;
            snapshot
        } else {
            report::warn("Services stay up; the capture will be crash-consistent");
            self.create()?
        };
        report::info(&format!("Snapshot {} created", snapshot.short()));

        report::info("Applying retention policy...");
        self.store.prune(&self.config.retention)?;

        match self.store.verify_integrity() {
            Ok(true) => report::info("Repository integrity check passed"),
            Ok(false) => report::warn("Repository integrity check reported errors"),
            Err(e) => report::warn(&format!("Repository integrity check did not run: {}", e)),
        }

        Ok(snapshot)
    }

    fn create(&self) -> Result<Snapshot> {
        self.store.create_snapshot(
            std::slice::from_ref(&self.config.stack_dir),
            &self.config.excludes,
            &[BACKUP_TAG.to_string()],
        )
    }

    /// Capture point-in-time metadata inside the installation tree so it
    /// travels with the snapshot
    fn write_meta(&self) -> Result<()> {
        let meta = StackMeta {
            timestamp: Utc::now(),
            hostname: crate::types::hostname(),
            running_services: self.services.running_services()?,
            engine_version: exec::version_line("restic", &["version"]),
            docker_version: exec::version_line("docker", &["--version"]),
        };
        let dir = self.config.stack_dir.join(".stack-meta");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("meta.json"), serde_json::to_string_pretty(&meta)?)?;
        fs::write(dir.join("last-backup"), meta.timestamp.to_rfc3339())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::testing::{MockServices, MockStore};
    use crate::types::Selector;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Config, MockStore, MockServices, Notifier) {
        let tmp = TempDir::new().unwrap();
        let stack_dir = tmp.path().join("opt").join("stack");
        fs::create_dir_all(&stack_dir).unwrap();
        fs::write(stack_dir.join("docker-compose.yml"), "# stack\n").unwrap();

        let stack_str = stack_dir.display().to_string();
        let config = Config::from_lookup(move |key| match key {
            "STACK_DIR" => Some(stack_str.clone()),
            _ => None,
        })
        .unwrap();

        let stack_rel = stack_dir
            .strip_prefix("/")
            .map(PathBuf::from)
            .unwrap_or(stack_dir);
        let store = MockStore::new(stack_rel);
        let services = MockServices::new();
        (tmp, config, store, services, Notifier::disabled())
    }

    #[test]
    fn default_backup_creates_one_tagged_snapshot() {
        let (_tmp, config, store, services, notifier) = fixture();
        let pipeline = BackupPipeline::new(&store, &services, &config, &notifier);

        let snapshot = pipeline.run(&BackupOptions::default()).unwrap();

        let listed = store.list_snapshots().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, snapshot.id);
        assert_eq!(listed[0].tags, vec![BACKUP_TAG]);
        assert_eq!(services.stops.get(), 1);
        assert_eq!(services.starts.get(), 1);
        assert_eq!(store.prune_calls.get(), 1);
        assert!(config.stack_dir.join(".stack-meta").join("meta.json").exists());
        assert!(config.stack_dir.join(".stack-meta").join("last-backup").exists());
    }

    #[test]
    fn latest_selector_resolves_to_the_new_snapshot() {
        let (_tmp, config, store, services, notifier) = fixture();
        let pipeline = BackupPipeline::new(&store, &services, &config, &notifier);

        let snapshot = pipeline.run(&BackupOptions::default()).unwrap();
        let resolved = store.resolve_selector(&Selector::Latest).unwrap();
        assert_eq!(resolved.id, snapshot.id);
    }

    #[test]
    fn no_stop_mode_leaves_services_alone() {
        let (_tmp, config, store, services, notifier) = fixture();
        let pipeline = BackupPipeline::new(&store, &services, &config, &notifier);

        pipeline
            .run(&BackupOptions {
                stop_services: false,
            })
            .unwrap();
        assert_eq!(services.stops.get(), 0);
        assert_eq!(services.starts.get(), 0);
    }

    #[test]
    fn failed_snapshot_registers_nothing_and_restarts_services() {
        let (_tmp, config, store, services, notifier) = fixture();
        store.fail_create.set(true);
        let pipeline = BackupPipeline::new(&store, &services, &config, &notifier);

        let result = pipeline.run(&BackupOptions::default());
        assert!(matches!(result, Err(Error::SnapshotFailed(_))));
        assert!(store.list_snapshots().unwrap().is_empty());
        // Guaranteed release: stop was followed by exactly one start.
        assert_eq!(services.stops.get(), 1);
        assert_eq!(services.starts.get(), 1);
        // Retention never ran after the failed stage.
        assert_eq!(store.prune_calls.get(), 0);
    }

    #[test]
    fn integrity_warning_does_not_fail_the_run() {
        let (_tmp, config, store, services, notifier) = fixture();
        store.verify_result.set(false);
        let pipeline = BackupPipeline::new(&store, &services, &config, &notifier);

        assert!(pipeline.run(&BackupOptions::default()).is_ok());
    }
}
