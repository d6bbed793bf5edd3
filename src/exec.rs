//! Thin wrappers around external command invocation

use crate::error::{Error, Result};
use std::process::Command;

/// Run a command and return its stdout, with extra environment variables
pub fn run(program: &str, args: &[&str], envs: &[(&str, &str)]) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let output = cmd.output()?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(Error::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run a command, returning Ok(true) on success, Ok(false) on non-zero exit
pub fn run_check(program: &str, args: &[&str], envs: &[(&str, &str)]) -> Result<bool> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    let status = cmd.status()?;
    Ok(status.success())
}

/// First line of a version-printing command, or "unknown"
pub fn version_line(program: &str, args: &[&str]) -> String {
    match run(program, args, &[]) {
        Ok(out) => out.lines().next().unwrap_or("unknown").trim().to_string(),
        Err(_) => "unknown".to_string(),
    }
}
