//! Uplink backed by the Hologram modem CLI.

use super::{CommandSpec, UplinkClient};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Sends payloads with `hologram send` and opens sessions with
/// `hologram network connect`. Success is judged from the command's output.
#[derive(Debug, Clone)]
pub struct HologramUplink {
    send_command: CommandSpec,
    connect_command: CommandSpec,
    send_marker: String,
    connect_marker: String,
    timeout: Duration,
}

impl HologramUplink {
    pub fn new(send_command: CommandSpec, connect_command: CommandSpec) -> Self {
        Self {
            send_command,
            connect_command,
            send_marker: "Message sent successfully".to_string(),
            connect_marker: "PPP session started".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the stdout text that confirms a send.
    pub fn with_send_marker(mut self, marker: impl Into<String>) -> Self {
        self.send_marker = marker.into();
        self
    }

    /// Set the stdout text that confirms a session.
    pub fn with_connect_marker(mut self, marker: impl Into<String>) -> Self {
        self.connect_marker = marker.into();
        self
    }

    /// Set how long one command may run before it is killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl UplinkClient for HologramUplink {
    async fn connect(&self) -> bool {
        match self.connect_command.run(&[], self.timeout).await {
            Ok(output) if output.reports(&self.connect_marker) => true,
            Ok(output) => {
                debug!(
                    stdout = %output.stdout.trim(),
                    stderr = %output.stderr.trim(),
                    "Network connect did not report a session"
                );
                false
            }
            Err(e) => {
                warn!("Network connect failed: {}", e);
                false
            }
        }
    }

    async fn send(&self, payload: &str) -> bool {
        match self.send_command.run(&[payload], self.timeout).await {
            Ok(output) if output.reports(&self.send_marker) => true,
            Ok(output) => {
                debug!(
                    stdout = %output.stdout.trim(),
                    stderr = %output.stderr.trim(),
                    "Send was not acknowledged"
                );
                false
            }
            Err(e) => {
                warn!("Send failed: {}", e);
                false
            }
        }
    }
}
