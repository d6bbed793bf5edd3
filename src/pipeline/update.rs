//! Update and rollback pipeline
//!
//! Composes the backup and restore pipelines: images are only recreated
//! when the pulled digests actually differ (or `--force`), and rollback
//! is a restore of the latest snapshot.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::exec;
use crate::notify::Notifier;
use crate::pipeline::backup::BACKUP_TAG;
use crate::pipeline::restore::{RestoreOptions, RestorePipeline};
use crate::report;
use crate::services::ServiceController;
use crate::store::SnapshotStore;
use crate::types::{ImageStatus, OperationOutcome};
use chrono::Utc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCommand {
    /// System packages, images, and blocklists in one pass
    All,
    /// Pull images and recreate services whose digest changed
    Images,
    /// Host package upgrade
    System,
    /// Restart the DNS filter service to refresh its lists
    Blocklists,
    /// Report available image updates without applying them
    Check,
    /// Restore the most recent snapshot
    Rollback,
}

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub command: UpdateCommand,
    /// Recreate services even when no digest changed
    pub force: bool,
    /// Skip the pre-update snapshot
    pub skip_backup: bool,
}

pub struct UpdatePipeline<'a, S: SnapshotStore, C: ServiceController> {
    store: Option<&'a S>,
    services: &'a C,
    config: &'a Config,
    notifier: &'a Notifier,
}

impl<'a, S: SnapshotStore, C: ServiceController> UpdatePipeline<'a, S, C> {
    /// `store` may be absent; operations that need the repository fail
    /// with a configuration error, everything else runs without it.
    pub fn new(
        store: Option<&'a S>,
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

    pub fn run(&self, opts: &UpdateOptions) -> Result<()> {
        let started = Utc::now();
        let result = self.execute(opts);
        let outcome = OperationOutcome::record(
            "update",
            started,
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
        );
        self.notifier.send(&outcome);
        if result.is_ok() {
            report::success("Update finished");
        }
        result
    }

    pub(crate) fn execute(&self, opts: &UpdateOptions) -> Result<()> {
        match opts.command {
            UpdateCommand::Check => {
                let statuses = self.check_images()?;
                self.report_updates(&statuses);
                Ok(())
            }
            UpdateCommand::Images => self.update_images(opts),
            UpdateCommand::System => self.update_system(),
            UpdateCommand::Blocklists => self.refresh_blocklists(),
            UpdateCommand::All => {
                self.update_system()?;
                self.update_images(opts)?;
                self.refresh_blocklists()
            }
            UpdateCommand::Rollback => self.rollback(),
        }
    }

    fn store(&self) -> Result<&'a S> {
        self.store.ok_or_else(|| {
            Error::Configuration(
                "RESTIC_REPOSITORY and RESTIC_PASSWORD must be set for this operation"
                    .to_string(),
            )
        })
    }

    /// Compare what the containers are running against what a pull
    /// brings in. The containers are the baseline: the tag-resolved id
    /// already points at a new image after any earlier pull, even though
    /// the services were never recreated from it.
    fn check_images(&self) -> Result<Vec<ImageStatus>> {
        let running = self.services.container_image_ids()?;
        report::info("Pulling latest images...");
        self.services.pull_images()?;
        let pulled = self.services.image_ids()?;

        Ok(pulled
            .into_iter()
            .map(|(service, pulled_id)| {
                let current_id = running.get(&service).cloned().flatten();
                ImageStatus {
                    service,
                    current_id,
                    pulled_id,
                }
            })
            .collect())
    }

    fn report_updates(&self, statuses: &[ImageStatus]) -> bool {
        let updated: Vec<&ImageStatus> =
            statuses.iter().filter(|s| s.updated()).collect();
        if updated.is_empty() {
            report::info("No updates available");
            return false;
        }
        for status in updated {
            report::info(&format!(
                "{}: {} -> {}",
                status.service,
                status.current_id.as_deref().unwrap_or("(none)"),
                status.pulled_id.as_deref().unwrap_or("(none)"),
            ));
        }
        true
    }

    fn update_images(&self, opts: &UpdateOptions) -> Result<()> {
        if !opts.skip_backup {
            report::info("Taking pre-update snapshot...");
            let store = self.store()?;
            store.ensure_repository()?;
            store.create_snapshot(
                std::slice::from_ref(&self.config.stack_dir),
                &self.config.excludes,
                &[BACKUP_TAG.to_string(), "pre-update".to_string()],
            )?;
        }

        let statuses = self.check_images()?;
        let has_updates = self.report_updates(&statuses);
        if !has_updates && !opts.force {
            return Ok(());
        }

        report::info("Recreating services with updated images...");
        self.services.start_all()?;

        let health = self.services.health_check(Duration::from_secs(120))?;
        for service in health.iter().filter(|s| !s.is_healthy()) {
            report::warn(&format!(
                "Service '{}' is unhealthy after update",
                service.name
            ));
        }
        Ok(())
    }

    fn update_system(&self) -> Result<()> {
        report::info("Upgrading host packages...");
        let env = [("DEBIAN_FRONTEND", "noninteractive")];
        exec::run("apt-get", &["update", "-qq"], &env)?;
        exec::run("apt-get", &["upgrade", "-y", "-qq"], &env)?;
        Ok(())
    }

    fn refresh_blocklists(&self) -> Result<()> {
        report::info(&format!(
            "Restarting '{}' to refresh filter lists...",
            self.config.dns_service
        ));
        self.services.restart(&self.config.dns_service)
    }

    /// Restore the latest snapshot; services come back only through the
    /// restore pipeline's health-verified start
    fn rollback(&self) -> Result<()> {
        report::info("Rolling back to the most recent snapshot...");
        let store = self.store()?;
        let restore = RestorePipeline::new(store, self.services, self.config, self.notifier);
        restore.execute(&RestoreOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{MockServices, MockStore};

    fn config() -> Config {
        Config::from_lookup(|_| None).unwrap()
    }

    fn opts(command: UpdateCommand) -> UpdateOptions {
        UpdateOptions {
            command,
            force: false,
            skip_backup: true,
        }
    }

    #[test]
    fn check_with_no_digest_changes_restarts_nothing() {
        let services = MockServices::new();
        services.set_container_images(&[("adguard", Some("sha256:aaa"))]);
        services.queue_images(&[("adguard", Some("sha256:aaa"))]);
        let config = config();
        let notifier = Notifier::disabled();
        let pipeline = UpdatePipeline::<MockStore, _>::new(None, &services, &config, &notifier);

        pipeline.run(&opts(UpdateCommand::Check)).unwrap();

        assert_eq!(services.pulls.get(), 1);
        assert_eq!(services.starts.get(), 0);
        assert_eq!(services.stops.get(), 0);
    }

    #[test]
    fn images_with_changed_digest_recreates_services() {
        let services = MockServices::new();
        services.set_container_images(&[("adguard", Some("sha256:aaa"))]);
        services.queue_images(&[("adguard", Some("sha256:bbb"))]);
        let config = config();
        let notifier = Notifier::disabled();
        let pipeline = UpdatePipeline::<MockStore, _>::new(None, &services, &config, &notifier);

        pipeline.run(&opts(UpdateCommand::Images)).unwrap();

        assert_eq!(services.pulls.get(), 1);
        assert_eq!(services.starts.get(), 1);
    }

    #[test]
    fn images_still_sees_updates_pulled_by_an_earlier_check() {
        let services = MockServices::new();
        // An earlier check already pulled the new image, so the tag
        // resolves to the new id on both runs while the containers still
        // run the old one.
        services.set_container_images(&[("adguard", Some("sha256:aaa"))]);
        services.queue_images(&[("adguard", Some("sha256:bbb"))]);
        services.queue_images(&[("adguard", Some("sha256:bbb"))]);
        let config = config();
        let notifier = Notifier::disabled();
        let pipeline = UpdatePipeline::<MockStore, _>::new(None, &services, &config, &notifier);

        pipeline.run(&opts(UpdateCommand::Check)).unwrap();
        assert_eq!(services.starts.get(), 0);

        pipeline.run(&opts(UpdateCommand::Images)).unwrap();
        assert_eq!(services.pulls.get(), 2);
        assert_eq!(services.starts.get(), 1);
    }

    #[test]
    fn images_without_changes_skips_recreate_unless_forced() {
        let services = MockServices::new();
        services.set_container_images(&[("adguard", Some("sha256:aaa"))]);
        services.queue_images(&[("adguard", Some("sha256:aaa"))]);
        let config = config();
        let notifier = Notifier::disabled();
        let pipeline = UpdatePipeline::<MockStore, _>::new(None, &services, &config, &notifier);
        pipeline.run(&opts(UpdateCommand::Images)).unwrap();
        assert_eq!(services.starts.get(), 0);

        let forced = MockServices::new();
        forced.set_container_images(&[("adguard", Some("sha256:aaa"))]);
        forced.queue_images(&[("adguard", Some("sha256:aaa"))]);
        let pipeline = UpdatePipeline::<MockStore, _>::new(None, &forced, &config, &notifier);
        pipeline
            .run(&UpdateOptions {
                force: true,
                ..opts(UpdateCommand::Images)
            })
            .unwrap();
        assert_eq!(forced.starts.get(), 1);
    }

    #[test]
    fn pre_update_backup_requires_repository_credentials() {
        let services = MockServices::new();
        let config = config();
        let notifier = Notifier::disabled();
        let pipeline = UpdatePipeline::<MockStore, _>::new(None, &services, &config, &notifier);

        let result = pipeline.run(&UpdateOptions {
            command: UpdateCommand::Images,
            force: false,
            skip_backup: false,
        });
        assert!(matches!(result, Err(Error::Configuration(_))));
        // Nothing was pulled or restarted before the error.
        assert_eq!(services.pulls.get(), 0);
        assert_eq!(services.starts.get(), 0);
    }

    #[test]
    fn blocklists_restarts_only_the_dns_service() {
        let services = MockServices::new();
        let config = config();
        let notifier = Notifier::disabled();
        let pipeline = UpdatePipeline::<MockStore, _>::new(None, &services, &config, &notifier);

        pipeline.run(&opts(UpdateCommand::Blocklists)).unwrap();

        assert_eq!(*services.restarts.borrow(), vec!["adguard".to_string()]);
        assert_eq!(services.stops.get(), 0);
        assert_eq!(services.starts.get(), 0);
    }

    #[test]
    fn rollback_without_credentials_is_a_configuration_error() {
        let services = MockServices::new();
        let config = config();
        let notifier = Notifier::disabled();
        let pipeline = UpdatePipeline::<MockStore, _>::new(None, &services, &config, &notifier);

        let result = pipeline.run(&opts(UpdateCommand::Rollback));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
