//! Best-effort delivery of run outcomes to external sinks
//!
//! The notifier can never fail a pipeline: sink errors are logged as
//! warnings and swallowed.

use crate::config::Config;
use crate::report;
use crate::types::OperationOutcome;
use serde_json::json;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

pub struct Notifier {
    webhook_url: Option<String>,
    email_to: Option<String>,
    client: Option<reqwest::blocking::Client>,
}

impl Notifier {
    pub fn from_config(config: &Config) -> Self {
        let client = if config.webhook_url.is_some() {
            match reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
            {
                Ok(client) => Some(client),
                Err(e) => {
                    report::warn(&format!("Webhook client unavailable: {}", e));
                    None
                }
            }
        } else {
            None
        };

        Self {
            webhook_url: config.webhook_url.clone(),
            email_to: config.email_to.clone(),
            client,
        }
    }

    /// A notifier with every sink disabled
    pub fn disabled() -> Self {
        Self {
            webhook_url: None,
            email_to: None,
            client: None,
        }
    }

    /// One attempt per sink; unconfigured sinks are skipped silently
    pub fn send(&self, outcome: &OperationOutcome) {
        if let (Some(url), Some(client)) = (&self.webhook_url, &self.client) {
            if let Err(e) = post_webhook(client, url, outcome) {
                report::warn(&format!("Webhook notification failed: {}", e));
            }
        }
        if let Some(address) = &self.email_to {
            if let Err(e) = send_email(address, outcome) {
                report::warn(&format!("Email notification failed: {}", e));
            }
        }
    }
}

fn post_webhook(
    client: &reqwest::blocking::Client,
    url: &str,
    outcome: &OperationOutcome,
) -> Result<(), String> {
    let response = client
        .post(url)
        .json(&payload(outcome))
        .send()
        .map_err(|e| e.to_string())?;
    response.error_for_status().map_err(|e| e.to_string())?;
    Ok(())
}

/// Pipe a short report through the system mail binary
fn send_email(address: &str, outcome: &OperationOutcome) -> Result<(), String> {
    let subject = format!(
        "[{}] {} {}",
        outcome.hostname,
        outcome.operation,
        if outcome.success { "succeeded" } else { "FAILED" }
    );
    let body = format!(
        "Operation: {}\nStatus: {}\nStarted: {}\nFinished: {}\n{}",
        outcome.operation,
        if outcome.success { "success" } else { "failure" },
        outcome.started.to_rfc3339(),
        outcome.finished.to_rfc3339(),
        outcome.detail.as_deref().unwrap_or(""),
    );

    let mut child = Command::new("mail")
        .args(["-s", &subject, address])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| e.to_string())?;
    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(body.as_bytes()).map_err(|e| e.to_string())?;
    }
    let status = child.wait().map_err(|e| e.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("mail exited with {}", status))
    }
}

fn payload(outcome: &OperationOutcome) -> serde_json::Value {
    json!({
        "operation": outcome.operation,
        "status": if outcome.success { "success" } else { "failure" },
        "hostname": outcome.hostname,
        "started": outcome.started.to_rfc3339(),
        "finished": outcome.finished.to_rfc3339(),
        "detail": outcome.detail,
    })
}
