//! The collector service: ingest, forwarding and mode polling.
//!
//! [`Collector::run`] binds the ingest port, optionally sets the clock from
//! the modem, then runs three independent loops until shutdown:
//!
//! - [`IngestListener`] accepts one frame per connection and routes it by mode
//! - [`ForwardScheduler`] drains the queue to the uplink on the duty cycle
//! - [`ModeController`] samples the debug jumper
//!
//! The loops only share the mode handle and the durable queue.

pub mod config;
pub mod listener;
pub mod scheduler;

// Re-export commonly used items
pub use config::RelayConfig;
pub use listener::{IngestListener, IngestOutcome};
pub use scheduler::{CycleOutcome, ForwardScheduler, SchedulerState, SchedulerTiming};

use crate::clock::ClockSync;
use crate::error::Result;
use crate::mode::{mode_channel, Mode, ModeController, ModeSignal, UplinkPowerHook};
use crate::queue::DurableQueue;
use crate::shutdown::Shutdown;
use crate::uplink::{PowerControl, UplinkClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Everything the collector needs, wired together.
pub struct Collector {
    config: RelayConfig,
    queue: Arc<DurableQueue>,
    uplink: Arc<dyn UplinkClient>,
    power: Arc<dyn PowerControl>,
    signal: Box<dyn ModeSignal>,
    clock: Option<ClockSync>,
}

impl Collector {
    pub fn new(
        config: RelayConfig,
        queue: Arc<DurableQueue>,
        uplink: Arc<dyn UplinkClient>,
        power: Arc<dyn PowerControl>,
        signal: Box<dyn ModeSignal>,
    ) -> Self {
        Self {
            config,
            queue,
            uplink,
            power,
            signal,
            clock: None,
        }
    }

    /// Set the system clock from the modem before the loops start.
    pub fn with_clock_sync(mut self, clock: ClockSync) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Bind the ingest port and run until `shutdown` fires.
    ///
    /// Only startup failures are returned; once the loops run, every error is
    /// handled inside the loop that hit it.
    pub async fn run(self, shutdown: Shutdown) -> Result<()> {
        self.start(shutdown).await?.wait().await;
        Ok(())
    }

    /// Bind and spawn the loops, returning a handle to the running service.
    pub async fn start(self, mut shutdown: Shutdown) -> Result<RunningCollector> {
        let Collector {
            config,
            queue,
            uplink,
            power,
            signal,
            clock,
        } = self;

        // Frames are buffered until the jumper has been read once.
        let (publisher, handle) = mode_channel(Mode::Normal);

        let listener =
            IngestListener::bind(&config, queue.clone(), uplink.clone(), handle.clone()).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, queue = %queue.path().display(), "Collector bound");

        if let Some(clock) = clock {
            match clock.run(&mut shutdown).await {
                Ok(Some(time)) => info!(%time, "System clock set from modem"),
                Ok(None) => info!("Clock sync interrupted by shutdown"),
                Err(e) => error!("Clock sync failed, keeping current time: {}", e),
            }
        }

        let controller = ModeController::new(signal, publisher, config.mode_poll).with_hook(
            Arc::new(UplinkPowerHook::new(
                power.clone(),
                uplink.clone(),
                config.modem_warmup,
            )),
        );
        let scheduler = ForwardScheduler::new(
            queue,
            uplink,
            power,
            handle,
            SchedulerTiming::from(&config),
        );

        let tasks = vec![
            tokio::spawn(listener.run(shutdown.clone())),
            tokio::spawn(scheduler.run(shutdown.clone())),
            tokio::spawn(controller.run(shutdown)),
        ];

        Ok(RunningCollector { local_addr, tasks })
    }
}

/// Handle to a started collector.
pub struct RunningCollector {
    local_addr: SocketAddr,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl RunningCollector {
    /// Address the ingest listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for every loop to finish.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Collector task ended abnormally: {}", e);
            }
        }
        info!("Collector stopped");
    }
}
