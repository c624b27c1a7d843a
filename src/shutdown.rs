//! Process-wide shutdown signal shared by the long-running loops.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Fires the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Cloneable view of the shutdown signal held by each loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    // Only set by `never()`, keeps the channel open.
    _anchor: Option<Arc<watch::Sender<bool>>>,
}

/// Create a connected trigger and listener pair.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx, _anchor: None })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _anchor: Some(Arc::new(tx)),
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Trigger dropped without firing: nobody can ask us to stop.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration`. Returns `false` if shutdown cut the sleep short.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        let slept = tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        };
        slept && !self.is_triggered()
    }
}
