//! Sensor frames and the wire grammar that produces them.
//!
//! A frame arrives as a single comma separated string (`ID,T,P,H,R`) and is
//! turned into an immutable [`SensorFrame`] stamped with the collector's clock.
//! Frames are persisted and forwarded as [`StoredFrame`] JSON records.

pub mod data;
pub mod parser;

// Re-export commonly used items
pub use data::{NodeKind, SensorFrame, SourceId, StoredFrame, UNUSED_CHANNEL};
pub(crate) use data::wire_number;
pub use parser::{FrameParser, ParseError};
