//! Collector configuration.

use crate::mode::Mode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the collector service.
///
/// Every interval is a tunable; the defaults match the field deployment
/// (six hour duty cycle, thirty second retries, five second jumper polling).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Host to bind the ingest listener to
    pub host: String,
    /// Port to bind the ingest listener to
    pub port: u16,
    /// Largest accepted frame payload in bytes
    pub max_frame_bytes: usize,
    /// How long a sensor node may take to deliver its frame
    pub read_timeout: Duration,
    /// Queue file holding frames waiting for the uplink
    pub queue_path: PathBuf,
    /// Sleep between forwarding cycles after a successful drain
    pub duty_cycle: Duration,
    /// Short wait when there is nothing to forward or debug mode is active
    pub idle_poll: Duration,
    /// Wait between uplink connect/send retries
    pub retry_backoff: Duration,
    /// Interval between mode jumper samples
    pub mode_poll: Duration,
    /// Delay before the first forwarding cycle
    pub startup_delay: Duration,
    /// Time the modem needs after power-up before it can connect
    pub modem_warmup: Duration,
    /// Longest any single external command may run
    pub command_timeout: Duration,
    /// Command that sends one payload (the payload is appended as the last argument)
    pub send_command: String,
    /// Command that opens a network session
    pub connect_command: String,
    /// Command that prints the modem's location report
    pub location_command: String,
    /// Command that sets the system clock (the time is appended)
    pub set_time_command: String,
    /// Text printed by the send command on success
    pub send_success_marker: String,
    /// Text printed by the connect command on success
    pub connect_success_marker: String,
    /// USB port the modem hangs off, for power switching
    pub usb_port: String,
    /// BCM pin read to detect the debug jumper
    pub sense_pin: u8,
    /// BCM pin driven high to feed the debug jumper
    pub drive_pin: u8,
    /// Set the system clock from the modem before starting
    pub sync_clock: bool,
    /// Ignore the jumper and run in this mode
    pub forced_mode: Option<Mode>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: crate::DEFAULT_PORT,
            max_frame_bytes: crate::DEFAULT_MAX_FRAME_BYTES,
            read_timeout: Duration::from_secs(10),
            queue_path: PathBuf::from(crate::DEFAULT_QUEUE_PATH),
            duty_cycle: Duration::from_secs(6 * 60 * 60),
            idle_poll: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(30),
            mode_poll: Duration::from_secs(5),
            startup_delay: Duration::from_secs(60),
            modem_warmup: Duration::from_secs(90),
            command_timeout: Duration::from_secs(120),
            send_command: "sudo hologram send".to_string(),
            connect_command: "sudo hologram network connect".to_string(),
            location_command: "sudo hologram modem location".to_string(),
            set_time_command: "sudo timedatectl set-time".to_string(),
            send_success_marker: "Message sent successfully".to_string(),
            connect_success_marker: "PPP session started".to_string(),
            usb_port: "1-1".to_string(),
            sense_pin: crate::mode::gpio::DEFAULT_SENSE_PIN,
            drive_pin: crate::mode::gpio::DEFAULT_DRIVE_PIN,
            sync_clock: false,
            forced_mode: None,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the host for the ingest listener.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port for the ingest listener.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_queue_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.queue_path = path.into();
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    pub fn with_duty_cycle(mut self, duty_cycle: Duration) -> Self {
        self.duty_cycle = duty_cycle;
        self
    }

    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_mode_poll(mut self, interval: Duration) -> Self {
        self.mode_poll = interval;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn with_modem_warmup(mut self, warmup: Duration) -> Self {
        self.modem_warmup = warmup;
        self
    }

    /// Run in `mode` regardless of the jumper.
    pub fn with_forced_mode(mut self, mode: Option<Mode>) -> Self {
        self.forced_mode = mode;
        self
    }

    /// Enable or disable clock sync at startup.
    pub fn with_clock_sync(mut self, enabled: bool) -> Self {
        self.sync_clock = enabled;
        self
    }

    /// Get the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
