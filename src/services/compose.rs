//! Service controller backed by docker compose
//!
//! State and health come from `ps --format json`, image identity from
//! `docker inspect` on the containers and on each service's configured
//! reference. No text-table scraping.

use crate::error::{Error, Result};
use crate::exec;
use crate::services::ServiceController;
use crate::types::{HealthState, ServiceHealth};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLL_ATTEMPTS: u64 = 30;

/// Controller for the compose project rooted at the installation directory
pub struct ComposeController {
    project_dir: PathBuf,
}

/// One container line from `docker compose ps --format json`
#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(default, rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(default, rename = "Health")]
    health: String,
}

/// `docker compose config --format json`, reduced to what we consume
#[derive(Debug, Deserialize)]
struct ComposeConfig {
    #[serde(default)]
    services: BTreeMap<String, ServiceDef>,
}

#[derive(Debug, Deserialize)]
struct ServiceDef {
    #[serde(default)]
    image: Option<String>,
}

impl ComposeController {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    fn compose(&self, args: &[&str]) -> Result<String> {
        let dir = self.project_dir.display().to_string();
        let mut full: Vec<&str> = vec!["compose", "--project-directory", &dir];
        full.extend_from_slice(args);
        exec::run("docker", &full, &[])
    }

    fn ps_entries(&self) -> Result<Vec<PsEntry>> {
        let output = self.compose(&["ps", "--format", "json"])?;
        parse_ps(&output)
    }

    fn ps(&self) -> Result<Vec<ServiceHealth>> {
        Ok(self
            .ps_entries()?
            .into_iter()
            .map(|entry| ServiceHealth {
                state: classify(&entry),
                name: entry.service,
            })
            .collect())
    }

    /// Image references declared for each service in the compose file
    fn image_refs(&self) -> Result<BTreeMap<String, String>> {
        let output = self.compose(&["config", "--format", "json"])?;
        let config: ComposeConfig = serde_json::from_str(&output)?;
        Ok(config
            .services
            .into_iter()
            .filter_map(|(name, def)| def.image.map(|image| (name, image)))
            .collect())
    }

    /// Locally-present image id for a reference, None if never pulled
    fn inspect_image(&self, reference: &str) -> Result<Option<String>> {
        match exec::run(
            "docker",
            &["image", "inspect", "--format", "{{.Id}}", reference],
            &[],
        ) {
            Ok(id) => Ok(Some(id.trim().to_string())),
            Err(Error::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Image id a container was created from, None when the container
    /// disappeared between the listing and the inspect
    fn inspect_container_image(&self, container: &str) -> Result<Option<String>> {
        match exec::run(
            "docker",
            &["inspect", "--format", "{{.Image}}", container],
            &[],
        ) {
            Ok(id) => Ok(Some(id.trim().to_string())),
            Err(Error::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl ServiceController for ComposeController {
    fn stop_all(&self) -> Result<()> {
        self.compose(&["stop"])?;
        Ok(())
    }

    fn start_all(&self) -> Result<()> {
        self.compose(&["up", "-d", "--remove-orphans"])?;
        Ok(())
    }

    fn restart(&self, service: &str) -> Result<()> {
        self.compose(&["restart", service])?;
        Ok(())
    }

    fn health_check(&self, timeout: Duration) -> Result<Vec<ServiceHealth>> {
        let attempts = (timeout.as_secs() / POLL_INTERVAL.as_secs())
            .clamp(1, MAX_POLL_ATTEMPTS);

        let mut report = self.ps()?;
        for _ in 1..attempts {
            if !report.is_empty() && report.iter().all(ServiceHealth::is_healthy) {
                break;
            }
            thread::sleep(POLL_INTERVAL);
            report = self.ps()?;
        }
        Ok(report)
    }

    fn running_services(&self) -> Result<Vec<String>> {
        Ok(self
            .ps_entries()?
            .into_iter()
            .filter(|entry| entry.state == "running")
            .map(|entry| entry.service)
            .collect())
    }

    fn container_image_ids(&self) -> Result<BTreeMap<String, Option<String>>> {
        let mut ids: BTreeMap<String, Option<String>> = self
            .image_refs()?
            .into_keys()
            .map(|service| (service, None))
            .collect();
        for entry in self.ps_entries()? {
            if entry.id.is_empty() {
                continue;
            }
            let image = self.inspect_container_image(&entry.id)?;
            ids.insert(entry.service, image);
        }
        Ok(ids)
    }

    fn image_ids(&self) -> Result<BTreeMap<String, Option<String>>> {
        let mut ids = BTreeMap::new();
        for (service, reference) in self.image_refs()? {
            let id = self.inspect_image(&reference)?;
            ids.insert(service, id);
        }
        Ok(ids)
    }

    fn pull_images(&self) -> Result<()> {
        self.compose(&["pull", "--quiet"])?;
        Ok(())
    }
}

/// Accept both NDJSON (one object per line) and a single JSON array;
/// compose has emitted either depending on version
fn parse_ps(output: &str) -> Result<Vec<PsEntry>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    let mut entries = Vec::new();
    for line in trimmed.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(line)?);
    }
    Ok(entries)
}

fn classify(entry: &PsEntry) -> HealthState {
    if entry.state != "running" {
        return HealthState::Unhealthy;
    }
    match entry.health.as_str() {
        "healthy" => HealthState::Healthy,
        "" | "none" => HealthState::NoSignal,
        _ => HealthState::Unhealthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ps_parses_ndjson_lines() {
        let output = concat!(
            r#"{"ID":"0a1b2c","Service":"adguard","State":"running","Health":"healthy"}"#,
            "\n",
            r#"{"ID":"3d4e5f","Service":"unbound","State":"running","Health":""}"#,
            "\n",
            r#"{"Service":"grafana","State":"exited","Health":""}"#,
            "\n",
        );
        let entries = parse_ps(output).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].id, "0a1b2c");
        assert_eq!(entries[2].id, "");
        assert_eq!(classify(&entries[0]), HealthState::Healthy);
        assert_eq!(classify(&entries[1]), HealthState::NoSignal);
        assert_eq!(classify(&entries[2]), HealthState::Unhealthy);
    }

    #[test]
    fn ps_parses_json_array() {
        let output = r#"[
            {"Service":"adguard","State":"running","Health":"unhealthy"}
        ]"#;
        let entries = parse_ps(output).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(classify(&entries[0]), HealthState::Unhealthy);
    }

    #[test]
    fn ps_empty_output_is_an_empty_group() {
        assert!(parse_ps("").unwrap().is_empty());
        assert!(parse_ps("\n").unwrap().is_empty());
    }
}
