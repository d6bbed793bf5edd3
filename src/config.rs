//! Environment-driven configuration

use crate::error::{Error, Result};
use crate::types::RetentionPolicy;
use std::path::PathBuf;

/// Runtime configuration, read once from the environment and passed into
/// the pipelines at construction. No global mutable state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Snapshot repository location (e.g. a local path or s3/sftp URI)
    pub repository: Option<String>,
    /// Repository encryption credential
    pub password: Option<String>,
    /// Installation root holding service config and data volumes
    pub stack_dir: PathBuf,
    /// Staging path for restore extraction, never the live installation
    pub staging_dir: PathBuf,
    /// Ownership applied to the installation tree after a restore swap
    pub owner: String,
    /// Service whose restart refreshes DNS filter lists
    pub dns_service: String,
    pub retention: RetentionPolicy,
    /// Webhook notification sink; unset disables it silently
    pub webhook_url: Option<String>,
    /// Email notification sink; unset disables it silently
    pub email_to: Option<String>,
    /// Glob patterns excluded from backups
    pub excludes: Vec<String>,
}

impl Config {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an injected lookup (testable headlessly)
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let retention = RetentionPolicy {
            daily: parse_count(&get, "BACKUP_KEEP_DAILY", 30)?,
            weekly: parse_count(&get, "BACKUP_KEEP_WEEKLY", 4)?,
            monthly: parse_count(&get, "BACKUP_KEEP_MONTHLY", 12)?,
        };
        // The engine rejects a forget run with no keep rule at all, so
        // catch that before any snapshot work has been done.
        if retention.daily == 0 && retention.weekly == 0 && retention.monthly == 0 {
            return Err(Error::Configuration(
                "retention policy keeps nothing; set at least one of \
                 BACKUP_KEEP_DAILY/WEEKLY/MONTHLY above zero"
                    .to_string(),
            ));
        }

        let excludes = match get("BACKUP_EXCLUDES") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => vec!["**/cache".to_string(), "**/*.log".to_string()],
        };

        Ok(Self {
            repository: get("RESTIC_REPOSITORY"),
            password: get("RESTIC_PASSWORD"),
            stack_dir: PathBuf::from(
                get("STACK_DIR").unwrap_or_else(|| "/opt/stack".to_string()),
            ),
            staging_dir: PathBuf::from(
                get("BACKUP_STAGING_DIR")
                    .unwrap_or_else(|| "/var/tmp/stackhold-staging".to_string()),
            ),
            owner: get("STACK_OWNER").unwrap_or_else(|| "root:root".to_string()),
            dns_service: get("DNS_SERVICE").unwrap_or_else(|| "adguard".to_string()),
            retention,
            webhook_url: get("BACKUP_WEBHOOK_URL"),
            email_to: get("BACKUP_EMAIL_TO"),
            excludes,
        })
    }

    /// Repository location and credential, required for any snapshot operation
    pub fn require_repository(&self) -> Result<(&str, &str)> {
        match (&self.repository, &self.password) {
            (Some(repo), Some(pass)) => Ok((repo, pass)),
            _ => Err(Error::Configuration(
                "RESTIC_REPOSITORY and RESTIC_PASSWORD must be set".to_string(),
            )),
        }
    }
}

fn parse_count(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u32,
) -> Result<u32> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
            Error::Configuration(format!("{} must be a non-negative integer, got '{}'", key, raw))
        }),
    }
}
