//! Sensor node side of the link.
//!
//! A node formats its readings with a [`ChannelSet`] and pushes each frame to
//! the collector over its own TCP connection with [`send_frame`].

use crate::error::{RelayError, Result};
use crate::frame::{wire_number, NodeKind, SourceId, UNUSED_CHANNEL};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// One round of readings. Channels the node did not read are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub rotation_rate: Option<f64>,
}

/// The channels a node type produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSet {
    pub temperature: bool,
    pub pressure: bool,
    pub humidity: bool,
    pub rotation_rate: bool,
}

impl ChannelSet {
    /// Every channel enabled.
    pub fn all() -> Self {
        Self {
            temperature: true,
            pressure: true,
            humidity: true,
            rotation_rate: true,
        }
    }

    /// Channels carried by a given node type.
    pub fn for_kind(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Skimmer => Self {
                temperature: true,
                pressure: false,
                humidity: false,
                rotation_rate: false,
            },
            NodeKind::Centrifuge => Self {
                temperature: true,
                pressure: false,
                humidity: false,
                rotation_rate: true,
            },
            NodeKind::Warehouse => Self {
                temperature: true,
                pressure: true,
                humidity: true,
                rotation_rate: false,
            },
        }
    }

    /// Format a sample as a wire frame, filling unused channels with the sentinel.
    pub fn format(&self, id: &SourceId, sample: &Sample) -> Result<String> {
        let pick = |enabled: bool, value: Option<f64>, name: &str| -> Result<f64> {
            let value = if enabled { value } else { None }.unwrap_or(UNUSED_CHANNEL);
            if !value.is_finite() || value < 0.0 {
                return Err(RelayError::config_error(format!(
                    "{} reading {} cannot be sent, frames carry non-negative numbers",
                    name, value
                )));
            }
            Ok(wire_number(value))
        };

        Ok(format!(
            "{},{},{},{},{}",
            id,
            pick(self.temperature, sample.temperature, "temperature")?,
            pick(self.pressure, sample.pressure, "pressure")?,
            pick(self.humidity, sample.humidity, "humidity")?,
            pick(self.rotation_rate, sample.rotation_rate, "rotation rate")?,
        ))
    }
}

/// Deliver one frame to the collector: connect, write, close.
pub async fn send_frame(addr: &str, payload: &str, timeout: Duration) -> Result<()> {
    let deliver = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(payload.as_bytes()).await?;
        // Closing our half marks the end of the frame.
        stream.shutdown().await?;
        Ok::<_, std::io::Error>(())
    };

    tokio::time::timeout(timeout, deliver)
        .await
        .map_err(|_| {
            RelayError::uplink_error(format!("Sending frame to {} timed out after {:?}", addr, timeout))
        })??;

    debug!(%addr, bytes = payload.len(), "Frame delivered to collector");
    Ok(())
}
