//! Restore pipeline
//!
//! `SelectorResolved -> Extracted -> [ServicesStopped] -> CurrentBackedUp
//! -> Swapped -> [ServicesStarted] -> Verified`. Extraction always lands
//! in a staging path; the live installation is only touched by the swap,
//! and the replaced tree is preserved side by side, never deleted.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::exec;
use crate::notify::Notifier;
use crate::pipeline::QuiesceGuard;
use crate::report;
use crate::services::ServiceController;
use crate::store::SnapshotStore;
use crate::types::{OperationOutcome, Selector};
use chrono::{Local, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Configuration artifacts expected in any usable installation
const EXPECTED_ARTIFACTS: [&str; 2] = ["docker-compose.yml", ".env"];

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub selector: Selector,
    /// Staging path override; defaults to the configured staging dir
    pub target: Option<PathBuf>,
    /// Stop after extraction, leaving the installation untouched
    pub extract_only: bool,
    /// Swap the extracted tree into place (`--no-replace` clears this)
    pub replace: bool,
    /// Start services after the swap (`--no-start` clears this)
    pub start_services: bool,
    /// Fix ownership of the installation after the swap; requires root
    pub fix_ownership: bool,
    /// Settle time before the post-restore health poll
    pub grace: Duration,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            selector: Selector::Latest,
            target: None,
            extract_only: false,
            replace: true,
            start_services: true,
            fix_ownership: true,
            grace: Duration::from_secs(10),
        }
    }
}

pub struct RestorePipeline<'a, S: SnapshotStore, C: ServiceController> {
    store: &'a S,
    services: &'a C,
    config: &'a Config,
    notifier: &'a Notifier,
}

impl<'a, S: SnapshotStore, C: ServiceController> RestorePipeline<'a, S, C> {
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

    pub fn run(&self, opts: &RestoreOptions) -> Result<()> {
        let started = Utc::now();
        let result = self.execute(opts);
        let outcome = OperationOutcome::record(
            "restore",
            started,
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
        );
        self.notifier.send(&outcome);
        if result.is_ok() {
            report::success("Restore finished");
        }
        result
    }

    pub(crate) fn execute(&self, opts: &RestoreOptions) -> Result<()> {
        let snapshot = self.store.resolve_selector(&opts.selector)?;
        report::info(&format!(
            "Selected snapshot {} from {}",
            snapshot.short(),
            snapshot.time.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        let staging = opts
            .target
            .clone()
            .unwrap_or_else(|| self.config.staging_dir.clone());
        if staging == self.config.stack_dir {
            return Err(Error::RestoreFailed(
                "staging path must differ from the installation path".to_string(),
            ));
        }
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        report::info(&format!("Extracting to {}...", staging.display()));
        self.store.restore(&snapshot, &staging)?;

        let extracted = staged_root(&staging, &self.config.stack_dir);
        validate_staged(&extracted)?;

        if opts.extract_only || !opts.replace {
            report::success(&format!("Snapshot extracted to {}", extracted.display()));
            return Ok(());
        }

        if opts.fix_ownership && !nix::unistd::geteuid().is_root() {
            return Err(Error::PermissionDenied);
        }

        report::info("Stopping services...");
        let guard = if opts.start_services {
            Some(QuiesceGuard::stop(self.services)?)
        } else {
            self.services.stop_all()?;
            None
        };

        if let Some(preserved) = self.swap(&extracted)? {
            report::info(&format!(
                "Previous installation preserved at {}",
                preserved.display()
            ));
        }

        if opts.fix_ownership {
            self.fix_ownership()?;
        }

        if let Some(guard) = guard {
            report::info("Starting services...");
            guard.resume()?;
            self.verify(opts.grace);
        }

        Ok(())
    }

    /// Two-phase rename swap. The current tree is renamed aside first
    /// (doubling as the preserved side-by-side backup); if moving the
    /// staged tree into place then fails, the aside copy is renamed back
    /// so the host is never left without an installation.
    fn swap(&self, extracted: &Path) -> Result<Option<PathBuf>> {
        self.swap_with(extracted, move_tree)
    }

    fn swap_with(
        &self,
        extracted: &Path,
        move_in: impl Fn(&Path, &Path) -> std::io::Result<()>,
    ) -> Result<Option<PathBuf>> {
        let current = &self.config.stack_dir;

        let aside = if current.exists() {
            let stamp = Local::now().format("%Y%m%d-%H%M%S");
            let aside = PathBuf::from(format!(
                "{}.pre-restore-{}",
                current.display(),
                stamp
            ));
            fs::rename(current, &aside)?;
            Some(aside)
        } else {
            None
        };

        if let Err(e) = move_in(extracted, current) {
            if let Some(aside) = &aside {
                if fs::rename(aside, current).is_err() {
                    report::error(&format!(
                        "Previous installation could not be put back; it remains at {}",
                        aside.display()
                    ));
                }
            }
            return Err(Error::RestoreFailed(format!(
                "could not move staged tree into place: {}",
                e
            )));
        }

        Ok(aside)
    }

    fn fix_ownership(&self) -> Result<()> {
        let path = self.config.stack_dir.display().to_string();
        exec::run("chown", &["-R", &self.config.owner, &path], &[])?;
        Ok(())
    }

    /// Post-restore checks are warnings only; the restore itself already
    /// completed.
    fn verify(&self, grace: Duration) {
        for artifact in EXPECTED_ARTIFACTS {
            if !self.config.stack_dir.join(artifact).exists() {
                report::warn(&format!(
                    "Expected artifact missing after restore: {}",
                    artifact
                ));
            }
        }
        if !grace.is_zero() {
            thread::sleep(grace);
        }
        match self.services.health_check(Duration::from_secs(60)) {
            Ok(statuses) => {
                for service in statuses.iter().filter(|s| !s.is_healthy()) {
                    report::warn(&format!(
                        "Service '{}' is unhealthy after restore",
                        service.name
                    ));
                }
            }
            Err(e) => report::warn(&format!("Health check did not run: {}", e)),
        }
    }
}

/// The engine recreates absolute source paths beneath the target, so the
/// extracted installation sits at `staging/<stack_dir minus leading />`
fn staged_root(staging: &Path, stack_dir: &Path) -> PathBuf {
    match stack_dir.strip_prefix("/") {
        Ok(rel) => staging.join(rel),
        Err(_) => staging.join(stack_dir),
    }
}

/// The live tree is only ever touched after the staged content proved to
/// exist and be non-empty
fn validate_staged(extracted: &Path) -> Result<()> {
    if !extracted.is_dir() {
        return Err(Error::RestoreFailed(format!(
            "staged restore missing at {}",
            extracted.display()
        )));
    }
    if fs::read_dir(extracted)?.next().is_none() {
        return Err(Error::RestoreFailed(
            "staged restore is empty".to_string(),
        ));
    }
    Ok(())
}

fn move_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        // Staging may live on a different filesystem; fall back to copy.
        Err(_) => {
            copy_tree(src, dst)?;
            fs::remove_dir_all(src)
        }
    }
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(&from)?;
            std::os::unix::fs::symlink(link, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
