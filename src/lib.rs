//! # Field Relay - Buffered Telemetry Collector
//!
//! A store-and-forward relay for Raspberry Pi field collectors. Sensor nodes
//! push short CSV frames over TCP; the collector persists them to a durable
//! on-disk queue and forwards the backlog over an intermittently powered
//! cellular modem on a fixed duty cycle.
//!
//! ## Features
//!
//! - **Frame parsing**: strict grammar for `ID,T,P,H,R` sensor frames
//! - **Durable queue**: fsync'd, line-oriented, survives power loss
//! - **Duty-cycled uplink**: modem powered only while draining the backlog
//! - **Debug jumper**: a physical jumper switches to immediate forwarding
//! - **Library + Binary**: use as a crate or standalone application
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use field_relay::{
//!     shutdown_channel, Collector, CommandSpec, DurableQueue, FixedSignal, HologramUplink,
//!     RelayConfig, UsbPower,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::default();
//!     let queue = Arc::new(DurableQueue::open(&config.queue_path).await?);
//!     let uplink = Arc::new(HologramUplink::new(
//!         CommandSpec::parse(&config.send_command)?,
//!         CommandSpec::parse(&config.connect_command)?,
//!     ));
//!     let power = Arc::new(UsbPower::new(config.usb_port.clone()));
//!
//!     let (_trigger, shutdown) = shutdown_channel();
//!     Collector::new(config, queue, uplink, power, Box::new(FixedSignal::normal()))
//!         .run(shutdown)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod error;
pub mod frame;
pub mod mode;
pub mod queue;
pub mod service;
pub mod shutdown;
pub mod source;
pub mod uplink;

// Re-export public API
pub use clock::{ClockSync, ModemLocation};
pub use error::{RelayError, Result};
pub use frame::{FrameParser, NodeKind, ParseError, SensorFrame, SourceId, StoredFrame};
pub use mode::{
    mode_channel, DefaultJumper, FixedSignal, Mode, ModeController, ModeHandle, ModeHook,
    ModePublisher, ModeSignal, SysfsJumper, UplinkPowerHook,
};
pub use queue::{DrainedBatch, DurableQueue, QueueEntry};
pub use service::{
    Collector, CycleOutcome, ForwardScheduler, IngestListener, IngestOutcome, RelayConfig,
    RunningCollector, SchedulerState, SchedulerTiming,
};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
pub use source::{send_frame, ChannelSet, Sample};
pub use uplink::{
    AlwaysOn, CommandOutput, CommandSpec, HologramUplink, PowerControl, UplinkClient, UsbPower,
};

#[cfg(feature = "gpio")]
pub use mode::RppalJumper;

/// The default ingest port
pub const DEFAULT_PORT: u16 = 2228;

/// Largest accepted frame payload in bytes
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1000;

/// Where the durable queue lives on a deployed collector
pub const DEFAULT_QUEUE_PATH: &str = "/home/pi/field_relay/Data.txt";
