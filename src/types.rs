//! Core types for the backup/restore lifecycle

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// An immutable, content-addressed capture of the installation tree.
///
/// Deserialized from the snapshot engine's JSON output; never constructed
/// for a backup that did not complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(default)]
    pub short_id: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub hostname: String,
}

impl Snapshot {
    /// Short identifier for display, falling back to a prefix of the
    /// full id. `get` keeps this total for ids that are short or not
    /// sliceable at the eighth byte.
    pub fn short(&self) -> &str {
        if !self.short_id.is_empty() {
            &self.short_id
        } else {
            self.id.get(..8).unwrap_or(&self.id)
        }
    }
}

/// How a restore target snapshot is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Most recent snapshot in the repository
    Latest,
    /// Explicit snapshot id (full or short prefix)
    Id(String),
    /// Most recent snapshot whose creation date starts with this prefix
    Date(String),
}

impl Selector {
    /// Build a date selector, validating the `YYYY-MM-DD` format
    pub fn date(s: &str) -> Result<Self, String> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| format!("Invalid date '{}'. Expected YYYY-MM-DD", s))?;
        Ok(Selector::Date(s.to_string()))
    }

    /// Whether a snapshot satisfies this selector.
    ///
    /// Callers iterate newest-first, so the first match is also the most
    /// recent one for ambiguous prefixes.
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        match self {
            Selector::Latest => true,
            Selector::Id(id) => {
                snapshot.id.starts_with(id.as_str()) || snapshot.short_id == *id
            }
            Selector::Date(prefix) => snapshot
                .time
                .format("%Y-%m-%d")
                .to_string()
                .starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Latest => write!(f, "latest"),
            Selector::Id(id) => write!(f, "{}", id),
            Selector::Date(prefix) => write!(f, "date {}", prefix),
        }
    }
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("Selector cannot be empty".to_string());
        }
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Selector::Latest);
        }
        if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
            return Ok(Selector::Date(s.to_string()));
        }
        Ok(Selector::Id(s.to_string()))
    }
}

/// Which snapshots survive pruning, by recency bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily: 30,
            weekly: 4,
            monthly: 12,
        }
    }
}

/// Liveness signal of one service in the group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
    /// Running, but no health probe is defined for the service
    NoSignal,
}

/// Health report entry for one service
#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub name: String,
    pub state: HealthState,
}

impl ServiceHealth {
    /// A running service without a probe counts as healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self.state, HealthState::Healthy | HealthState::NoSignal)
    }
}

/// Per-service image comparison before and after a pull
#[derive(Debug, Clone)]
pub struct ImageStatus {
    pub service: String,
    pub current_id: Option<String>,
    pub pulled_id: Option<String>,
}

impl ImageStatus {
    /// True when the pulled image differs from the one currently in use
    pub fn updated(&self) -> bool {
        match (&self.current_id, &self.pulled_id) {
            (Some(current), Some(pulled)) => current != pulled,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

/// Point-in-time fingerprint written into the installation tree before a
/// backup, so it travels inside every snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackMeta {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub running_services: Vec<String>,
    pub engine_version: String,
    pub docker_version: String,
}

/// Outcome of one pipeline run, surfaced through logs and notification only
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub operation: String,
    pub success: bool,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub hostname: String,
    pub detail: Option<String>,
}

impl OperationOutcome {
    pub fn record(
        operation: &str,
        started: DateTime<Utc>,
        success: bool,
        detail: Option<String>,
    ) -> Self {
        Self {
            operation: operation.to_string(),
            success,
            started,
            finished: Utc::now(),
            hostname: hostname(),
            detail,
        }
    }
}

/// Best-effort local hostname for metadata and notifications
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snap(id: &str, short: &str, time: DateTime<Utc>) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            short_id: short.to_string(),
            time,
            tags: vec![],
            paths: vec![],
            hostname: "host".to_string(),
        }
    }

    #[test]
    fn selector_parses_latest_date_and_id() {
        assert_eq!("latest".parse::<Selector>().unwrap(), Selector::Latest);
        assert_eq!(
            "2024-01-01".parse::<Selector>().unwrap(),
            Selector::Date("2024-01-01".to_string())
        );
        assert_eq!(
            "ab12cd34".parse::<Selector>().unwrap(),
            Selector::Id("ab12cd34".to_string())
        );
        assert!("".parse::<Selector>().is_err());
    }

    #[test]
    fn selector_date_rejects_malformed_input() {
        assert!(Selector::date("2024-13-40").is_err());
        assert!(Selector::date("yesterday").is_err());
        assert!(Selector::date("2024-01-02").is_ok());
    }

    #[test]
    fn selector_matches_by_id_prefix_and_date() {
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap();
        let s = snap("ab12cd34ef56", "ab12cd34", time);

        assert!(Selector::Latest.matches(&s));
        assert!(Selector::Id("ab12".to_string()).matches(&s));
        assert!(Selector::Id("ab12cd34".to_string()).matches(&s));
        assert!(!Selector::Id("ff00".to_string()).matches(&s));
        assert!(Selector::Date("2024-01-02".to_string()).matches(&s));
        assert!(!Selector::Date("2024-01-03".to_string()).matches(&s));
    }

    #[test]
    fn retention_defaults() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.daily, 30);
        assert_eq!(policy.weekly, 4);
        assert_eq!(policy.monthly, 12);
    }

    #[test]
    fn image_status_updated() {
        let changed = ImageStatus {
            service: "adguard".to_string(),
            current_id: Some("sha256:aaa".to_string()),
            pulled_id: Some("sha256:bbb".to_string()),
        };
        assert!(changed.updated());

        let same = ImageStatus {
            service: "adguard".to_string(),
            current_id: Some("sha256:aaa".to_string()),
            pulled_id: Some("sha256:aaa".to_string()),
        };
        assert!(!same.updated());

        let fresh = ImageStatus {
            service: "adguard".to_string(),
            current_id: None,
            pulled_id: Some("sha256:aaa".to_string()),
        };
        assert!(fresh.updated());

        let absent = ImageStatus {
            service: "adguard".to_string(),
            current_id: None,
            pulled_id: None,
        };
        assert!(!absent.updated());
    }

    #[test]
    fn snapshot_short_prefers_short_id() {
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(snap("ab12cd34ef56", "ab12cd34", time).short(), "ab12cd34");
        assert_eq!(snap("ab12cd34ef56", "", time).short(), "ab12cd34");
        assert_eq!(snap("ab", "", time).short(), "ab");
    }

    #[test]
    fn snapshot_short_handles_multibyte_ids() {
        // A malformed id must never panic the display path; fall back to
        // the whole string when byte 8 is mid-character.
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let odd = snap("abcdefgé-rest", "", time);
        assert_eq!(odd.short(), "abcdefgé-rest");
        let clean = snap("ééééabcd", "", time);
        assert_eq!(clean.short(), "éééé");
    }
}
