//! Validation and decoding of raw wire frames.

use super::data::{SensorFrame, SourceId};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // ID,T,P,H,R with non-negative decimals, nothing before or after.
    static ref FRAME_PATTERN: Regex = Regex::new(
        r"^([A-Za-z0-9_]{2}),([0-9]+\.?[0-9]*),([0-9]+\.?[0-9]*),([0-9]+\.?[0-9]*),([0-9]+\.?[0-9]*)$"
    )
    .expect("frame pattern is valid");
}

/// Why a raw frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Payload does not match `ID,NUM,NUM,NUM,NUM`
    #[error("malformed frame: {raw:?}")]
    Malformed { raw: String },

    /// Payload exceeded the frame size limit
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },

    /// Payload is not valid UTF-8
    #[error("frame is not valid UTF-8: {lossy:?}")]
    NotUtf8 { lossy: String },
}

impl ParseError {
    fn malformed(raw: &str) -> Self {
        Self::Malformed {
            raw: raw.to_string(),
        }
    }
}

/// Decodes raw frames into [`SensorFrame`]s.
#[derive(Debug, Clone)]
pub struct FrameParser {
    max_frame_bytes: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameParser {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Parse a frame string, stamping it with the current time.
    pub fn parse(&self, raw: &str) -> Result<SensorFrame, ParseError> {
        let caps = FRAME_PATTERN
            .captures(raw)
            .ok_or_else(|| ParseError::malformed(raw))?;

        let source_id = SourceId::new(&caps[1]).ok_or_else(|| ParseError::malformed(raw))?;
        let mut values = [0.0f64; 4];
        for (slot, idx) in values.iter_mut().zip(2..=5) {
            let value: f64 = caps[idx]
                .parse()
                .map_err(|_| ParseError::malformed(raw))?;
            // Absurdly long digit strings overflow to infinity.
            if !value.is_finite() {
                return Err(ParseError::malformed(raw));
            }
            *slot = value;
        }

        let [temperature, pressure, humidity, rotation_rate] = values;
        Ok(SensorFrame::new(
            source_id,
            temperature,
            pressure,
            humidity,
            rotation_rate,
        ))
    }

    /// Parse a payload read off the socket.
    pub fn parse_bytes(&self, payload: &[u8]) -> Result<SensorFrame, ParseError> {
        if payload.len() > self.max_frame_bytes {
            return Err(ParseError::TooLarge {
                len: payload.len(),
                max: self.max_frame_bytes,
            });
        }

        let raw = std::str::from_utf8(payload).map_err(|_| ParseError::NotUtf8 {
            lossy: String::from_utf8_lossy(payload).into_owned(),
        })?;
        self.parse(raw)
    }
}
