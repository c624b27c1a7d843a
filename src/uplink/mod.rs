//! Capabilities for reaching the cellular uplink.
//!
//! The collector only ever sees two narrow interfaces: [`UplinkClient`] to
//! open a session and push one payload, and [`PowerControl`] to switch the
//! modem on and off. Both report plain success or failure; the production
//! implementations shell out to the Hologram CLI and the USB driver sysfs.

pub mod command;
pub mod hologram;
pub mod power;

// Re-export commonly used items
pub use command::{CommandOutput, CommandSpec};
pub use hologram::HologramUplink;
pub use power::UsbPower;

use async_trait::async_trait;

/// Opaque uplink used to deliver frames.
#[async_trait]
pub trait UplinkClient: Send + Sync {
    /// Establish a network session. Returns `true` once the session is up.
    async fn connect(&self) -> bool;

    /// Deliver one payload. Returns `true` iff the uplink acknowledged it.
    async fn send(&self, payload: &str) -> bool;
}

/// Power switch for the uplink hardware.
#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn power_on(&self) -> bool;

    async fn power_off(&self) -> bool;
}

/// Power control for setups where the modem is always on.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOn;

#[async_trait]
impl PowerControl for AlwaysOn {
    async fn power_on(&self) -> bool {
        true
    }

    async fn power_off(&self) -> bool {
        true
    }
}
