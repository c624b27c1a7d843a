//! Modem power switching through the USB driver's bind/unbind files.

use super::PowerControl;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

/// Binds and unbinds one USB port, powering the modem up or down.
#[derive(Debug, Clone)]
pub struct UsbPower {
    port: String,
    driver_dir: PathBuf,
}

impl UsbPower {
    /// Control `port` (e.g. `1-1`) through `/sys/bus/usb/drivers/usb`.
    pub fn new(port: impl Into<String>) -> Self {
        Self::with_driver_dir(port, "/sys/bus/usb/drivers/usb")
    }

    pub fn with_driver_dir(port: impl Into<String>, driver_dir: impl Into<PathBuf>) -> Self {
        Self {
            port: port.into(),
            driver_dir: driver_dir.into(),
        }
    }

    async fn write_control(&self, file: &str) -> bool {
        let path = self.driver_dir.join(file);
        match tokio::fs::write(&path, self.port.as_bytes()).await {
            Ok(()) => {
                info!(port = %self.port, "USB port {}", file);
                true
            }
            Err(e) => {
                warn!(port = %self.port, path = %path.display(), "USB {} failed: {}", file, e);
                false
            }
        }
    }
}

#[async_trait]
impl PowerControl for UsbPower {
    async fn power_on(&self) -> bool {
        self.write_control("bind").await
    }

    async fn power_off(&self) -> bool {
        self.write_control("unbind").await
    }
}
