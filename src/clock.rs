//! Setting the system clock from the cellular modem.
//!
//! Field collectors have no RTC and often boot without network time. Before
//! frames get timestamped, the modem's location report is used as a time
//! source and pushed to the system clock with `timedatectl`.

use crate::error::{RelayError, Result};
use crate::shutdown::Shutdown;
use crate::uplink::{CommandSpec, PowerControl};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

lazy_static! {
    static ref LOCATION_PATTERN: Regex = Regex::new(concat!(
        r#"^Location: \{"altitude": "(-?\d+\.?\d*)", "uncertainty": "(-?\d+\.?\d*)", "#,
        r#""longitude": "(-?\d+\.?\d*)", "latitude": "(-?\d+\.?\d*)", "#,
        r#""time": "(\d+:\d+:\d+\.\d+)", "date": "(\d+/\d+/\d+)"\}$"#
    ))
    .expect("location pattern is valid");
}

/// Position and time reported by the modem.
#[derive(Debug, Clone, PartialEq)]
pub struct ModemLocation {
    pub altitude: f64,
    pub uncertainty: f64,
    pub longitude: f64,
    pub latitude: f64,
    pub time: NaiveDateTime,
}

impl ModemLocation {
    /// Parse one `Location: {...}` line. The date is day/month/year.
    pub fn parse(line: &str) -> Result<Self> {
        let caps = LOCATION_PATTERN
            .captures(line.trim_end())
            .ok_or_else(|| RelayError::clock_error(format!("Not a location report: {:?}", line)))?;

        let number = |idx: usize| -> Result<f64> {
            caps[idx]
                .parse()
                .map_err(|e| RelayError::clock_error(format!("Bad number {:?}: {}", &caps[idx], e)))
        };

        let time = NaiveTime::parse_from_str(&caps[5], "%H:%M:%S%.f")
            .map_err(|e| RelayError::clock_error(format!("Bad time {:?}: {}", &caps[5], e)))?;
        let date = NaiveDate::parse_from_str(&caps[6], "%d/%m/%Y")
            .map_err(|e| RelayError::clock_error(format!("Bad date {:?}: {}", &caps[6], e)))?;

        Ok(Self {
            altitude: number(1)?,
            uncertainty: number(2)?,
            longitude: number(3)?,
            latitude: number(4)?,
            time: NaiveDateTime::new(date, time),
        })
    }

    /// Time formatted for `timedatectl set-time`.
    pub fn set_time_argument(&self) -> String {
        self.time.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Startup step that sets the clock from the modem's location report.
pub struct ClockSync {
    location_command: CommandSpec,
    set_time_command: CommandSpec,
    power: Arc<dyn PowerControl>,
    retry_backoff: Duration,
    timeout: Duration,
}

impl ClockSync {
    pub fn new(
        location_command: CommandSpec,
        set_time_command: CommandSpec,
        power: Arc<dyn PowerControl>,
        retry_backoff: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            location_command,
            set_time_command,
            power,
            retry_backoff,
            timeout,
        }
    }

    /// Query the modem until it reports a location, then set the clock.
    ///
    /// Returns `Ok(None)` if shutdown arrived before a report was obtained.
    pub async fn run(&self, shutdown: &mut Shutdown) -> Result<Option<NaiveDateTime>> {
        info!("Acquiring date and time from the modem");
        if !self.power.power_on().await {
            warn!("Modem power-up reported failure");
        }

        let location = loop {
            match self.query().await {
                Ok(location) => break Some(location),
                Err(e) => debug!("No location report yet: {}", e),
            }
            if !shutdown.sleep(self.retry_backoff).await {
                break None;
            }
        };

        self.power.power_off().await;

        let Some(location) = location else {
            return Ok(None);
        };
        info!(
            latitude = location.latitude,
            longitude = location.longitude,
            altitude = location.altitude,
            "Modem location acquired"
        );

        let arg = location.set_time_argument();
        let output = self.set_time_command.run(&[&arg], self.timeout).await?;
        if !output.success {
            return Err(RelayError::clock_error(format!(
                "{} {:?} failed: {}",
                self.set_time_command,
                arg,
                output.stderr.trim()
            )));
        }

        Ok(Some(location.time))
    }

    async fn query(&self) -> Result<ModemLocation> {
        let output = self.location_command.run(&[], self.timeout).await?;
        output
            .stdout
            .lines()
            .find(|line| line.contains("altitude"))
            .ok_or_else(|| RelayError::clock_error("Modem did not report a location"))
            .and_then(ModemLocation::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"Location: {"altitude": "1337.5", "uncertainty": "25", "longitude": "85.3240", "latitude": "27.7172", "time": "14:05:09.123", "date": "23/01/2019"}"#;

    #[test]
    fn test_parse_location_report() {
        let location = ModemLocation::parse(REPORT).unwrap();
        assert_eq!(location.altitude, 1337.5);
        assert_eq!(location.latitude, 27.7172);
        assert_eq!(location.set_time_argument(), "2019-01-23 14:05:09");
    }

    #[test]
    fn test_rejects_other_output() {
        assert!(ModemLocation::parse("Error: modem not found").is_err());
        let bad_date = REPORT.replace("23/01/2019", "41/13/2019");
        assert!(ModemLocation::parse(&bad_date).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sync_sets_time_from_report() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("location.sh");
        std::fs::write(&script, format!("#!/bin/sh\necho 'Booting modem'\necho '{}'\n", REPORT)).unwrap();

        let sync = ClockSync::new(
            CommandSpec::parse(&format!("sh {}", script.display())).unwrap(),
            CommandSpec::parse("true").unwrap(),
            Arc::new(crate::uplink::AlwaysOn),
            Duration::from_millis(1),
            Duration::from_secs(5),
        );

        let time = sync.run(&mut Shutdown::never()).await.unwrap().unwrap();
        assert_eq!(time.format("%Y-%m-%d %H:%M:%S").to_string(), "2019-01-23 14:05:09");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sync_gives_up_on_shutdown() {
        let sync = ClockSync::new(
            CommandSpec::parse("false").unwrap(),
            CommandSpec::parse("true").unwrap(),
            Arc::new(crate::uplink::AlwaysOn),
            Duration::from_millis(1),
            Duration::from_secs(5),
        );
        let (trigger, mut shutdown) = crate::shutdown::shutdown_channel();
        trigger.trigger();

        assert_eq!(sync.run(&mut shutdown).await.unwrap(), None);
    }
}
