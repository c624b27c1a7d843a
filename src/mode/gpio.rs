//! Debug jumper input for the Raspberry Pi collector.
//!
//! The jumper bridges two header pins: one is driven high, the other is read
//! back. A high reading means the jumper is fitted and debug mode is wanted.
//! The rppal backend is feature-gated to allow compilation on non-Raspberry Pi
//! systems; without it the kernel's sysfs GPIO interface is used.

use super::ModeSignal;
use crate::error::{RelayError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// BCM pin read to detect the jumper.
pub const DEFAULT_SENSE_PIN: u8 = 21;

/// BCM pin driven high to feed the jumper.
pub const DEFAULT_DRIVE_PIN: u8 = 20;

/// Signal with a fixed value, for forcing a mode from the command line.
#[derive(Debug, Clone, Copy)]
pub struct FixedSignal {
    debug: bool,
}

impl FixedSignal {
    pub fn debug() -> Self {
        Self { debug: true }
    }

    pub fn normal() -> Self {
        Self { debug: false }
    }
}

impl ModeSignal for FixedSignal {
    fn read_debug(&mut self) -> Result<bool> {
        Ok(self.debug)
    }
}

/// Jumper read through `/sys/class/gpio`.
#[derive(Debug, Clone)]
pub struct SysfsJumper {
    base: PathBuf,
    sense_pin: u8,
}

impl SysfsJumper {
    /// Export and configure the jumper pins under `/sys/class/gpio`.
    pub fn new(sense_pin: u8, drive_pin: u8) -> Result<Self> {
        Self::with_base("/sys/class/gpio", sense_pin, drive_pin)
    }

    /// Same as [`SysfsJumper::new`] against another sysfs root.
    pub fn with_base(base: impl Into<PathBuf>, sense_pin: u8, drive_pin: u8) -> Result<Self> {
        let base = base.into();

        export_pin(&base, drive_pin)?;
        write_attr(&base, drive_pin, "direction", "out")?;
        write_attr(&base, drive_pin, "value", "1")?;

        export_pin(&base, sense_pin)?;
        write_attr(&base, sense_pin, "direction", "in")?;

        debug!(sense_pin, drive_pin, "Sysfs jumper configured");
        Ok(Self { base, sense_pin })
    }
}

fn pin_dir(base: &Path, pin: u8) -> PathBuf {
    base.join(format!("gpio{}", pin))
}

fn export_pin(base: &Path, pin: u8) -> Result<()> {
    if pin_dir(base, pin).exists() {
        return Ok(());
    }
    fs::write(base.join("export"), pin.to_string()).map_err(|e| {
        RelayError::signal_error(format!("Failed to export GPIO {}: {}", pin, e))
    })
}

fn write_attr(base: &Path, pin: u8, attr: &str, value: &str) -> Result<()> {
    fs::write(pin_dir(base, pin).join(attr), value).map_err(|e| {
        RelayError::signal_error(format!("Failed to set {} of GPIO {}: {}", attr, pin, e))
    })
}

impl ModeSignal for SysfsJumper {
    fn read_debug(&mut self) -> Result<bool> {
        let path = pin_dir(&self.base, self.sense_pin).join("value");
        let raw = fs::read_to_string(&path).map_err(|e| {
            RelayError::signal_error(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(RelayError::signal_error(format!(
                "Unexpected GPIO {} value {:?}",
                self.sense_pin, other
            ))),
        }
    }
}

#[cfg(feature = "gpio")]
mod raspberry_pi {
    use super::*;
    use rppal::gpio::{Gpio, InputPin, OutputPin};

    /// Jumper read through rppal's memory-mapped GPIO access.
    pub struct RppalJumper {
        sense: InputPin,
        // Held so the drive pin stays high for the life of the jumper.
        _drive: OutputPin,
    }

    impl RppalJumper {
        pub fn new(sense_pin: u8, drive_pin: u8) -> Result<Self> {
            let gpio = Gpio::new().map_err(|e| {
                RelayError::gpio_error(format!("Failed to initialize GPIO: {}", e))
            })?;

            let mut drive = gpio
                .get(drive_pin)
                .map_err(|e| {
                    RelayError::gpio_error(format!("Failed to access pin {}: {}", drive_pin, e))
                })?
                .into_output();
            drive.set_reset_on_drop(false);
            drive.set_high();

            let sense = gpio
                .get(sense_pin)
                .map_err(|e| {
                    RelayError::gpio_error(format!("Failed to access pin {}: {}", sense_pin, e))
                })?
                .into_input_pulldown();

            Ok(Self {
                sense,
                _drive: drive,
            })
        }
    }

    impl ModeSignal for RppalJumper {
        fn read_debug(&mut self) -> Result<bool> {
            Ok(self.sense.is_high())
        }
    }
}

#[cfg(feature = "gpio")]
pub use raspberry_pi::RppalJumper;

// Re-export the appropriate jumper backend
#[cfg(feature = "gpio")]
pub use raspberry_pi::RppalJumper as DefaultJumper;

#[cfg(not(feature = "gpio"))]
pub use self::SysfsJumper as DefaultJumper;
