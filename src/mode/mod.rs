//! Operating mode selection.
//!
//! A jumper on the collector decides between [`Mode::Debug`] (forward every
//! frame as soon as it arrives) and [`Mode::Normal`] (buffer and forward on
//! the duty cycle). [`ModeController`] samples the jumper, publishes the
//! current mode through a single-writer watch channel, and runs the
//! registered [`ModeHook`]s once per transition.

pub mod gpio;

pub use gpio::{DefaultJumper, FixedSignal, SysfsJumper};

#[cfg(feature = "gpio")]
pub use gpio::RppalJumper;

use crate::error::Result;
use crate::shutdown::Shutdown;
use crate::uplink::{PowerControl, UplinkClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Operating mode of the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Frames are sent on arrival, nothing is buffered
    Debug,
    /// Frames are buffered and forwarded in batches
    Normal,
}

impl Mode {
    pub fn from_debug_flag(debug: bool) -> Self {
        if debug {
            Mode::Debug
        } else {
            Mode::Normal
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Debug => f.write_str("debug"),
            Mode::Normal => f.write_str("normal"),
        }
    }
}

/// Write side of the shared mode. There is exactly one.
#[derive(Debug)]
pub struct ModePublisher {
    tx: watch::Sender<Mode>,
}

/// Read side of the shared mode. Readers take a snapshot, never a lock.
#[derive(Debug, Clone)]
pub struct ModeHandle {
    rx: watch::Receiver<Mode>,
}

/// Create the shared mode cell.
pub fn mode_channel(initial: Mode) -> (ModePublisher, ModeHandle) {
    let (tx, rx) = watch::channel(initial);
    (ModePublisher { tx }, ModeHandle { rx })
}

impl ModePublisher {
    /// Store `mode`. Returns `true` if the value changed.
    pub fn publish(&self, mode: Mode) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == mode {
                false
            } else {
                *current = mode;
                true
            }
        })
    }

    pub fn handle(&self) -> ModeHandle {
        ModeHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl ModeHandle {
    /// Current mode snapshot.
    pub fn current(&self) -> Mode {
        *self.rx.borrow()
    }

    /// Wait for the next published change. Returns `None` once the publisher is gone.
    pub async fn changed(&mut self) -> Option<Mode> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// Source of the boolean "debug mode active" input.
pub trait ModeSignal: Send {
    /// Sample the signal. `Ok(true)` means debug mode is requested.
    fn read_debug(&mut self) -> Result<bool>;
}

/// Side effect run once each time a mode is entered.
#[async_trait]
pub trait ModeHook: Send + Sync {
    async fn on_enter(&self, mode: Mode);
}

/// Powers the modem up (and opens a session) for debug mode, and down for normal mode.
pub struct UplinkPowerHook {
    power: Arc<dyn PowerControl>,
    uplink: Arc<dyn UplinkClient>,
    warmup: Duration,
}

impl UplinkPowerHook {
    pub fn new(
        power: Arc<dyn PowerControl>,
        uplink: Arc<dyn UplinkClient>,
        warmup: Duration,
    ) -> Self {
        Self {
            power,
            uplink,
            warmup,
        }
    }
}

#[async_trait]
impl ModeHook for UplinkPowerHook {
    async fn on_enter(&self, mode: Mode) {
        match mode {
            Mode::Debug => {
                if !self.power.power_on().await {
                    warn!("Failed to power the modem for debug mode");
                }
                // Let the modem find a signal before asking for a session.
                tokio::time::sleep(self.warmup).await;
                if self.uplink.connect().await {
                    info!("Uplink session opened for debug mode");
                } else {
                    warn!("Uplink session could not be opened, debug sends may fail");
                }
            }
            Mode::Normal => {
                if !self.power.power_off().await {
                    warn!("Failed to power down the modem for normal mode");
                }
            }
        }
    }
}

/// Polls the mode signal and publishes edge-triggered transitions.
pub struct ModeController {
    signal: Box<dyn ModeSignal>,
    publisher: ModePublisher,
    hooks: Vec<Arc<dyn ModeHook>>,
    poll_interval: Duration,
    // `None` until the first successful read so entry side effects always fire once.
    last: Option<Mode>,
}

impl ModeController {
    pub fn new(
        signal: Box<dyn ModeSignal>,
        publisher: ModePublisher,
        poll_interval: Duration,
    ) -> Self {
        Self {
            signal,
            publisher,
            hooks: Vec::new(),
            poll_interval,
            last: None,
        }
    }

    /// Register a side effect to run on every transition.
    pub fn with_hook(mut self, hook: Arc<dyn ModeHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn handle(&self) -> ModeHandle {
        self.publisher.handle()
    }

    /// Mode observed by the last successful poll.
    pub fn last_observed(&self) -> Option<Mode> {
        self.last
    }

    /// Sample the signal once. Returns the new mode if it changed.
    ///
    /// A failed read keeps the previous mode.
    pub async fn poll_once(&mut self) -> Option<Mode> {
        let mode = match self.signal.read_debug() {
            Ok(debug) => Mode::from_debug_flag(debug),
            Err(e) => {
                warn!("Failed to read mode signal, keeping previous mode: {}", e);
                return None;
            }
        };

        if self.last == Some(mode) {
            return None;
        }

        self.last = Some(mode);
        self.publisher.publish(mode);
        info!(%mode, "Mode changed");

        for hook in &self.hooks {
            hook.on_enter(mode).await;
        }

        Some(mode)
    }

    /// Poll until shutdown. Shutdown also cuts short any hook still running.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!(interval = ?self.poll_interval, "Mode controller started");
        loop {
            if shutdown.is_triggered() {
                break;
            }
            tokio::select! {
                _ = self.poll_once() => {}
                _ = shutdown.wait() => {
                    info!("Shutdown interrupted a mode transition");
                    break;
                }
            }
            if !shutdown.sleep(self.poll_interval).await {
                break;
            }
        }
        info!("Mode controller stopped");
    }
}
