//! Duty-cycled forwarding of the durable queue to the uplink.
//!
//! Each cycle walks `Idle -> Connecting -> Draining -> Clearing -> Idle`.
//! Connecting and every individual send are retried until they succeed, with
//! a fixed backoff; entries are sent strictly in queue order and the queue is
//! only cleared after the whole batch went out. A crash between the last send
//! and the clear means the batch is sent again on the next run: delivery is
//! at-least-once, never exactly-once.

use super::config::RelayConfig;
use crate::error::Result;
use crate::mode::{Mode, ModeHandle};
use crate::queue::DurableQueue;
use crate::shutdown::Shutdown;
use crate::uplink::{PowerControl, UplinkClient};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where the scheduler is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Connecting,
    Draining,
    Clearing,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Connecting => "connecting",
            SchedulerState::Draining => "draining",
            SchedulerState::Clearing => "clearing",
        };
        f.write_str(name)
    }
}

/// Result of one forwarding cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Debug mode is active, nothing was attempted
    SkippedDebug,
    /// The queue was empty, the uplink was not touched
    Empty,
    /// Every drained entry was sent and the batch cleared
    Forwarded { entries: usize },
    /// Shutdown arrived mid-cycle; the queue was left intact
    Interrupted,
}

/// Intervals driving the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerTiming {
    /// Sleep after a successful drain
    pub duty_cycle: Duration,
    /// Sleep after an empty or skipped cycle
    pub idle_poll: Duration,
    /// Wait between connect or send retries
    pub retry_backoff: Duration,
    /// Wait before the very first cycle
    pub startup_delay: Duration,
}

impl From<&RelayConfig> for SchedulerTiming {
    fn from(config: &RelayConfig) -> Self {
        Self {
            duty_cycle: config.duty_cycle,
            idle_poll: config.idle_poll,
            retry_backoff: config.retry_backoff,
            startup_delay: config.startup_delay,
        }
    }
}

/// Drains the queue to the uplink on a duty cycle, in normal mode only.
pub struct ForwardScheduler {
    queue: Arc<DurableQueue>,
    uplink: Arc<dyn UplinkClient>,
    power: Arc<dyn PowerControl>,
    mode: ModeHandle,
    timing: SchedulerTiming,
    state: SchedulerState,
    // Set once the debug-mode skip has been logged for the current debug session.
    skip_logged: bool,
}

impl ForwardScheduler {
    pub fn new(
        queue: Arc<DurableQueue>,
        uplink: Arc<dyn UplinkClient>,
        power: Arc<dyn PowerControl>,
        mode: ModeHandle,
        timing: SchedulerTiming,
    ) -> Self {
        Self {
            queue,
            uplink,
            power,
            mode,
            timing,
            state: SchedulerState::Idle,
            skip_logged: false,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    fn transition(&mut self, next: SchedulerState) {
        debug!(from = %self.state, to = %next, "Scheduler state change");
        self.state = next;
    }

    /// Run cycles until shutdown.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!(
            duty_cycle = ?self.timing.duty_cycle,
            retry_backoff = ?self.timing.retry_backoff,
            "Forward scheduler started"
        );

        if shutdown.sleep(self.timing.startup_delay).await {
            loop {
                let wait = match self.run_cycle(&mut shutdown).await {
                    Ok(CycleOutcome::Forwarded { .. }) => self.timing.duty_cycle,
                    Ok(CycleOutcome::Interrupted) => break,
                    Ok(CycleOutcome::Empty) | Ok(CycleOutcome::SkippedDebug) => {
                        self.timing.idle_poll
                    }
                    Err(e) => {
                        error!("Forwarding cycle failed: {}", e);
                        self.transition(SchedulerState::Idle);
                        self.timing.idle_poll
                    }
                };

                if !shutdown.sleep(wait).await {
                    break;
                }
            }
        }

        info!("Forward scheduler stopped");
    }

    /// Run one wake-up: gate on mode, then connect, drain and clear.
    pub async fn run_cycle(&mut self, shutdown: &mut Shutdown) -> Result<CycleOutcome> {
        if self.mode.current() == Mode::Debug {
            if !self.skip_logged {
                info!("Forwarding skipped, debug mode is active");
                self.skip_logged = true;
            }
            return Ok(CycleOutcome::SkippedDebug);
        }
        self.skip_logged = false;

        let batch = self.queue.drain_all().await?;
        if batch.is_empty() {
            debug!("Queue empty, nothing to forward");
            return Ok(CycleOutcome::Empty);
        }

        let cycle = uuid::Uuid::new_v4();
        info!(%cycle, entries = batch.len(), "Starting drain of queued frames");

        if !self.power.power_on().await {
            warn!(%cycle, "Modem power-up reported failure, trying to connect anyway");
        }

        self.transition(SchedulerState::Connecting);
        let mut attempt = 1u32;
        while !self.uplink.connect().await {
            warn!(%cycle, attempt, backoff = ?self.timing.retry_backoff, "Uplink connect failed, retrying");
            if !shutdown.sleep(self.timing.retry_backoff).await {
                return Ok(self.abandon(cycle).await);
            }
            attempt += 1;
        }
        info!(%cycle, attempts = attempt, "Uplink connected");

        self.transition(SchedulerState::Draining);
        for (index, entry) in batch.entries().iter().enumerate() {
            let mut attempt = 1u32;
            while !self.uplink.send(entry.as_str()).await {
                warn!(%cycle, entry = index, attempt, "Send failed, retrying");
                if !shutdown.sleep(self.timing.retry_backoff).await {
                    return Ok(self.abandon(cycle).await);
                }
                attempt += 1;
            }
            debug!(%cycle, entry = index, attempts = attempt, "Entry sent");

            // The current entry is done; stop before starting the next one.
            if shutdown.is_triggered() && index + 1 < batch.len() {
                return Ok(self.abandon(cycle).await);
            }
        }

        self.transition(SchedulerState::Clearing);
        if let Err(e) = self.queue.clear(&batch).await {
            // The batch stays queued and goes out again next cycle.
            error!(%cycle, "Failed to clear delivered entries: {}", e);
            if !self.power.power_off().await {
                warn!(%cycle, "Modem power-down reported failure");
            }
            self.transition(SchedulerState::Idle);
            return Err(e);
        }
        info!(%cycle, entries = batch.len(), "Drain complete, queue cleared");

        if !self.power.power_off().await {
            warn!(%cycle, "Modem power-down reported failure");
        }
        self.transition(SchedulerState::Idle);

        Ok(CycleOutcome::Forwarded {
            entries: batch.len(),
        })
    }

    async fn abandon(&mut self, cycle: uuid::Uuid) -> CycleOutcome {
        warn!(%cycle, state = %self.state, "Shutdown during drain, queue left intact");
        self.power.power_off().await;
        self.transition(SchedulerState::Idle);
        CycleOutcome::Interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{SensorFrame, SourceId};
    use crate::mode::mode_channel;
    use crate::shutdown::shutdown_channel;
    use crate::uplink::AlwaysOn;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Uplink that fails the first `connect_failures` connects and the sends listed in `fail_sends`.
    #[derive(Default)]
    struct ScriptedUplink {
        connect_failures: AtomicUsize,
        connects: AtomicUsize,
        send_attempts: AtomicUsize,
        fail_sends: Vec<usize>,
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UplinkClient for ScriptedUplink {
        async fn connect(&self) -> bool {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connect_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }

        async fn send(&self, payload: &str) -> bool {
            let attempt = self.send_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_sends.contains(&attempt) {
                return false;
            }
            self.delivered.lock().unwrap().push(payload.to_string());
            true
        }
    }

    /// Uplink that accepts every send, then hangs on the `stall_after`-th one.
    struct StallingUplink {
        stall_after: usize,
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UplinkClient for StallingUplink {
        async fn connect(&self) -> bool {
            true
        }

        async fn send(&self, payload: &str) -> bool {
            let count = {
                let mut delivered = self.delivered.lock().unwrap();
                delivered.push(payload.to_string());
                delivered.len()
            };
            if count == self.stall_after {
                std::future::pending::<()>().await;
            }
            true
        }
    }

    /// Uplink whose sends empty the queue file behind the scheduler's back.
    struct TruncatingUplink {
        path: std::path::PathBuf,
    }

    #[async_trait]
    impl UplinkClient for TruncatingUplink {
        async fn connect(&self) -> bool {
            true
        }

        async fn send(&self, _payload: &str) -> bool {
            std::fs::write(&self.path, "").unwrap();
            true
        }
    }

    #[derive(Default)]
    struct CountingPower {
        offs: AtomicUsize,
    }

    #[async_trait]
    impl PowerControl for CountingPower {
        async fn power_on(&self) -> bool {
            true
        }

        async fn power_off(&self) -> bool {
            self.offs.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn timing() -> SchedulerTiming {
        SchedulerTiming {
            duty_cycle: Duration::from_millis(50),
            idle_poll: Duration::from_millis(5),
            retry_backoff: Duration::from_millis(1),
            startup_delay: Duration::ZERO,
        }
    }

    async fn queue_with(dir: &tempfile::TempDir, rpms: &[f64]) -> Arc<DurableQueue> {
        let queue = Arc::new(DurableQueue::open(dir.path().join("Data.txt")).await.unwrap());
        for rpm in rpms {
            let frame = SensorFrame::new(SourceId::new("CE").unwrap(), 0.0, 0.0, 0.0, *rpm);
            queue.append(&frame).await.unwrap();
        }
        queue
    }

    fn scheduler(queue: Arc<DurableQueue>, uplink: Arc<ScriptedUplink>, mode: Mode) -> ForwardScheduler {
        let (publisher, handle) = mode_channel(mode);
        // The publisher is not needed once the mode is fixed.
        drop(publisher);
        ForwardScheduler::new(queue, uplink, Arc::new(AlwaysOn), handle, timing())
    }

    fn delivered_rpms(uplink: &ScriptedUplink) -> Vec<f64> {
        uplink
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|line| crate::frame::StoredFrame::from_line(line).unwrap().rotation_rate)
            .collect()
    }

    #[tokio::test]
    async fn test_empty_queue_never_connects() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &[]).await;
        let uplink = Arc::new(ScriptedUplink::default());
        let mut sched = scheduler(queue, uplink.clone(), Mode::Normal);

        let outcome = sched.run_cycle(&mut Shutdown::never()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Empty);
        assert_eq!(uplink.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_debug_mode_skips_forwarding() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &[1.0]).await;
        let uplink = Arc::new(ScriptedUplink::default());
        let mut sched = scheduler(queue.clone(), uplink.clone(), Mode::Debug);

        for _ in 0..3 {
            let outcome = sched.run_cycle(&mut Shutdown::never()).await.unwrap();
            assert_eq!(outcome, CycleOutcome::SkippedDebug);
        }
        assert!(sched.skip_logged);
        assert_eq!(uplink.connects.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forwards_in_order_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &[1.0, 2.0, 3.0]).await;
        let uplink = Arc::new(ScriptedUplink::default());
        let mut sched = scheduler(queue.clone(), uplink.clone(), Mode::Normal);

        let outcome = sched.run_cycle(&mut Shutdown::never()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Forwarded { entries: 3 });
        assert_eq!(delivered_rpms(&uplink), vec![1.0, 2.0, 3.0]);
        assert!(queue.is_empty().await.unwrap());
        assert_eq!(sched.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_connect_retried_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &[1.0]).await;
        let uplink = Arc::new(ScriptedUplink {
            connect_failures: AtomicUsize::new(3),
            ..Default::default()
        });
        let mut sched = scheduler(queue, uplink.clone(), Mode::Normal);

        let outcome = sched.run_cycle(&mut Shutdown::never()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Forwarded { entries: 1 });
        assert_eq!(uplink.connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_send_is_retried_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &[1.0, 2.0, 3.0]).await;
        // Entry 2 fails twice before going through.
        let uplink = Arc::new(ScriptedUplink {
            fail_sends: vec![1, 2],
            ..Default::default()
        });
        let mut sched = scheduler(queue.clone(), uplink.clone(), Mode::Normal);

        let outcome = sched.run_cycle(&mut Shutdown::never()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Forwarded { entries: 3 });
        assert_eq!(uplink.send_attempts.load(Ordering::SeqCst), 5);
        assert_eq!(delivered_rpms(&uplink), vec![1.0, 2.0, 3.0]);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_mid_drain_keeps_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &[1.0, 2.0, 3.0]).await;
        // Entry 2 never goes through.
        let uplink = Arc::new(ScriptedUplink {
            fail_sends: (1..10_000).collect(),
            ..Default::default()
        });
        let mut sched = scheduler(queue.clone(), uplink.clone(), Mode::Normal);
        let (trigger, mut shutdown) = shutdown_channel();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let outcome = sched.run_cycle(&mut shutdown).await.unwrap();
        stopper.await.unwrap();

        assert_eq!(outcome, CycleOutcome::Interrupted);
        assert_eq!(delivered_rpms(&uplink), vec![1.0]);
        // Nothing was cleared, including the entry that did go out.
        assert_eq!(queue.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_crash_before_clear_resends_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &[1.0, 2.0, 3.0]).await;
        let stalling = Arc::new(StallingUplink {
            stall_after: 3,
            delivered: Mutex::new(Vec::new()),
        });
        let (publisher, handle) = mode_channel(Mode::Normal);
        drop(publisher);
        let mut sched = ForwardScheduler::new(
            queue.clone(),
            stalling.clone(),
            Arc::new(AlwaysOn),
            handle,
            timing(),
        );

        let task = tokio::spawn(async move { sched.run_cycle(&mut Shutdown::never()).await });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while stalling.delivered.lock().unwrap().len() < 3 {
            assert!(tokio::time::Instant::now() < deadline, "batch never went out");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Power is cut after the last send, before the clear.
        task.abort();
        let _ = task.await;
        let first_run = stalling.delivered.lock().unwrap().clone();
        drop(queue);

        let reopened = Arc::new(DurableQueue::open(dir.path().join("Data.txt")).await.unwrap());
        assert_eq!(reopened.len().await.unwrap(), 3);
        let uplink = Arc::new(ScriptedUplink::default());
        let mut sched = scheduler(reopened.clone(), uplink.clone(), Mode::Normal);

        let outcome = sched.run_cycle(&mut Shutdown::never()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Forwarded { entries: 3 });
        assert_eq!(*uplink.delivered.lock().unwrap(), first_run);
        assert!(reopened.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_clear_still_powers_down() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &[1.0, 2.0]).await;
        let uplink = Arc::new(TruncatingUplink {
            path: queue.path().to_path_buf(),
        });
        let power = Arc::new(CountingPower::default());
        let (publisher, handle) = mode_channel(Mode::Normal);
        drop(publisher);
        let mut sched = ForwardScheduler::new(queue, uplink, power.clone(), handle, timing());

        assert!(sched.run_cycle(&mut Shutdown::never()).await.is_err());
        assert_eq!(power.offs.load(Ordering::SeqCst), 1);
        assert_eq!(sched.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &[4.0]).await;
        let uplink = Arc::new(ScriptedUplink::default());
        let sched = scheduler(queue.clone(), uplink.clone(), Mode::Normal);
        let (trigger, shutdown) = shutdown_channel();

        let task = tokio::spawn(sched.run(shutdown));
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(delivered_rpms(&uplink), vec![4.0]);
        assert!(queue.is_empty().await.unwrap());
    }
}
