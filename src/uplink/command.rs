//! External command invocation shared by the uplink, power and clock code.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// A program plus its fixed leading arguments, e.g. `sudo hologram send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// Captured result of one command run.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Whether the process exited with status 0
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// True when the command exited cleanly and printed `marker` on stdout.
    pub fn reports(&self, marker: &str) -> bool {
        self.success && self.stdout.contains(marker)
    }
}

impl CommandSpec {
    /// Split a command line on whitespace. No shell quoting is interpreted.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| RelayError::config_error("Command line is empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Run the command with `extra` appended to the fixed arguments.
    ///
    /// Arguments are passed to the program directly, so payloads need no
    /// shell escaping. The child is killed if `timeout` elapses.
    pub async fn run(&self, extra: &[&str], timeout: Duration) -> Result<CommandOutput> {
        debug!(command = %self, extra = ?extra, "Running external command");

        let child = Command::new(&self.program)
            .args(&self.args)
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::uplink_error(format!("Failed to start {}: {}", self, e)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                RelayError::uplink_error(format!("{} timed out after {:?}", self, timeout))
            })?
            .map_err(|e| RelayError::uplink_error(format!("Failed to wait for {}: {}", self, e)))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
