//! Data structures for sensor frames.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value carried by a channel the node does not measure.
pub const UNUSED_CHANNEL: f64 = 0.0;

/// Folds `-0.0` into `0.0`, which the frame grammar has no sign for.
pub(crate) fn wire_number(value: f64) -> f64 {
    value + 0.0
}

/// Two character tag identifying the node that produced a frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

/// Known node types in the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Cream separator, reports temperature
    Skimmer,
    /// Centrifuge, reports rotation rate
    Centrifuge,
    /// Warehouse environment node, reports temperature, pressure and humidity
    Warehouse,
}

impl SourceId {
    /// Tag sent by skimmer nodes.
    pub const SKIMMER: &'static str = "EC";
    /// Tag sent by centrifuge nodes.
    pub const CENTRIFUGE: &'static str = "CE";
    /// Tag sent by warehouse nodes.
    pub const WAREHOUSE: &'static str = "EN";

    /// Build a source id from a tag of exactly two ASCII word characters.
    pub fn new(tag: impl Into<String>) -> Option<Self> {
        let tag = tag.into();
        let valid = tag.len() == 2
            && tag
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_');
        valid.then_some(Self(tag))
    }

    /// The raw tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The node type behind this tag, if it is one of the deployment's tags.
    pub fn kind(&self) -> Option<NodeKind> {
        match self.0.as_str() {
            Self::SKIMMER => Some(NodeKind::Skimmer),
            Self::CENTRIFUGE => Some(NodeKind::Centrifuge),
            Self::WAREHOUSE => Some(NodeKind::Warehouse),
            _ => None,
        }
    }
}

impl NodeKind {
    /// Tag used on the wire by this node type.
    pub fn tag(&self) -> SourceId {
        let tag = match self {
            NodeKind::Skimmer => SourceId::SKIMMER,
            NodeKind::Centrifuge => SourceId::CENTRIFUGE,
            NodeKind::Warehouse => SourceId::WAREHOUSE,
        };
        SourceId(tag.to_string())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SourceId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        SourceId::new(value.clone()).ok_or_else(|| format!("invalid source id: {:?}", value))
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.0
    }
}

/// One measurement sample, stamped by the collector on arrival.
///
/// Frames are immutable once built: all four channels are always present and
/// hold [`UNUSED_CHANNEL`] when the node does not measure them.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    source_id: SourceId,
    temperature: f64,
    pressure: f64,
    humidity: f64,
    rotation_rate: f64,
    timestamp: DateTime<Local>,
}

impl SensorFrame {
    /// Create a new frame with the current wall-clock time.
    pub fn new(
        source_id: SourceId,
        temperature: f64,
        pressure: f64,
        humidity: f64,
        rotation_rate: f64,
    ) -> Self {
        Self::with_timestamp(
            source_id,
            temperature,
            pressure,
            humidity,
            rotation_rate,
            Local::now(),
        )
    }

    /// Create a new frame with an explicit timestamp.
    pub fn with_timestamp(
        source_id: SourceId,
        temperature: f64,
        pressure: f64,
        humidity: f64,
        rotation_rate: f64,
        timestamp: DateTime<Local>,
    ) -> Self {
        Self {
            source_id,
            temperature,
            pressure,
            humidity,
            rotation_rate,
            timestamp,
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    /// Temperature in degrees Celsius
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Pressure in hPa
    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    /// Relative humidity in percent
    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    /// Rotation rate in RPM
    pub fn rotation_rate(&self) -> f64 {
        self.rotation_rate
    }

    /// When the collector received the frame.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Format the frame the way a sensor node sends it.
    pub fn to_wire(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.source_id,
            wire_number(self.temperature),
            wire_number(self.pressure),
            wire_number(self.humidity),
            wire_number(self.rotation_rate)
        )
    }

    /// The durable JSON record for this frame.
    pub fn to_record(&self) -> StoredFrame {
        StoredFrame::from(self)
    }
}

/// JSON record written to the queue and sent over the uplink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFrame {
    #[serde(rename = "ID")]
    pub id: SourceId,
    #[serde(rename = "T")]
    pub temperature: f64,
    #[serde(rename = "P")]
    pub pressure: f64,
    #[serde(rename = "H")]
    pub humidity: f64,
    #[serde(rename = "R")]
    pub rotation_rate: f64,
    #[serde(rename = "D")]
    pub received_at: DateTime<Local>,
}

impl From<&SensorFrame> for StoredFrame {
    fn from(frame: &SensorFrame) -> Self {
        Self {
            id: frame.source_id.clone(),
            temperature: frame.temperature,
            pressure: frame.pressure,
            humidity: frame.humidity,
            rotation_rate: frame.rotation_rate,
            received_at: frame.timestamp,
        }
    }
}

impl From<StoredFrame> for SensorFrame {
    fn from(record: StoredFrame) -> Self {
        SensorFrame::with_timestamp(
            record.id,
            record.temperature,
            record.pressure,
            record.humidity,
            record.rotation_rate,
            record.received_at,
        )
    }
}

impl StoredFrame {
    /// Serialize to a single line of JSON.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
