//! End-to-end tests: frames pushed over TCP through a running collector.

use async_trait::async_trait;
use field_relay::{
    send_frame, shutdown_channel, Collector, DurableQueue, ModeSignal, PowerControl, RelayConfig,
    RunningCollector, ShutdownTrigger, StoredFrame, UplinkClient,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// Uplink that records what it delivered. Connects fail while `offline` is set.
#[derive(Default)]
struct RecordingUplink {
    offline: AtomicBool,
    connects: AtomicUsize,
    delivered: Mutex<Vec<String>>,
}

impl RecordingUplink {
    fn offline() -> Self {
        let uplink = Self::default();
        uplink.offline.store(true, Ordering::SeqCst);
        uplink
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl UplinkClient for RecordingUplink {
    async fn connect(&self) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        !self.offline.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: &str) -> bool {
        if self.offline.load(Ordering::SeqCst) {
            return false;
        }
        self.delivered.lock().unwrap().push(payload.to_string());
        true
    }
}

#[derive(Default)]
struct CountingPower {
    ons: AtomicUsize,
    offs: AtomicUsize,
}

#[async_trait]
impl PowerControl for CountingPower {
    async fn power_on(&self) -> bool {
        self.ons.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn power_off(&self) -> bool {
        self.offs.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Jumper whose position the test can move.
#[derive(Clone, Default)]
struct Jumper(Arc<AtomicBool>);

impl Jumper {
    fn set(&self, debug: bool) {
        self.0.store(debug, Ordering::SeqCst);
    }
}

impl ModeSignal for Jumper {
    fn read_debug(&mut self) -> field_relay::Result<bool> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

fn fast_config(queue_path: &Path) -> RelayConfig {
    RelayConfig::new("127.0.0.1", 0)
        .with_queue_path(queue_path)
        .with_startup_delay(Duration::ZERO)
        .with_duty_cycle(Duration::from_millis(20))
        .with_idle_poll(Duration::from_millis(20))
        .with_retry_backoff(Duration::from_millis(10))
        .with_mode_poll(Duration::from_millis(10))
        .with_modem_warmup(Duration::ZERO)
}

async fn start(
    config: RelayConfig,
    uplink: Arc<RecordingUplink>,
    power: Arc<CountingPower>,
    jumper: Jumper,
) -> (RunningCollector, ShutdownTrigger, Arc<DurableQueue>) {
    let queue = Arc::new(DurableQueue::open(&config.queue_path).await.unwrap());
    let (trigger, shutdown) = shutdown_channel();
    let running = Collector::new(config, queue.clone(), uplink, power, Box::new(jumper))
        .start(shutdown)
        .await
        .unwrap();
    (running, trigger, queue)
}

async fn push(running: &RunningCollector, payload: &str) {
    send_frame(&running.local_addr().to_string(), payload, WAIT)
        .await
        .unwrap();
}

/// Poll `check` until it holds or the deadline passes.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Wait until the queue holds exactly `expected` entries.
async fn queued(queue: &DurableQueue, expected: usize) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let len = queue.len().await.unwrap();
        if len == expected || tokio::time::Instant::now() >= deadline {
            return len == expected;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn source_ids(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| StoredFrame::from_line(line).unwrap().id.to_string())
        .collect()
}

/// Frames received in normal mode reach the uplink in arrival order and leave the queue
#[tokio::test]
async fn test_normal_mode_forwards_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let uplink = Arc::new(RecordingUplink::default());
    let power = Arc::new(CountingPower::default());
    let (running, trigger, queue) = start(
        fast_config(&dir.path().join("Data.txt")),
        uplink.clone(),
        power.clone(),
        Jumper::default(),
    )
    .await;

    for payload in ["EC,20.5,0,0,0", "CE,31,0,0,1400", "EN,4,1012,60,0"] {
        push(&running, payload).await;
    }

    assert!(eventually(|| uplink.delivered().len() == 3).await);
    assert_eq!(source_ids(&uplink.delivered()), vec!["EC", "CE", "EN"]);
    assert!(power.ons.load(Ordering::SeqCst) >= 1);

    trigger.trigger();
    tokio::time::timeout(WAIT, running.wait()).await.unwrap();
    assert!(queue.is_empty().await.unwrap());
}

/// Malformed frames never reach the queue or the uplink
#[tokio::test]
async fn test_malformed_frames_are_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let uplink = Arc::new(RecordingUplink::default());
    let config = fast_config(&dir.path().join("Data.txt"))
        .with_startup_delay(Duration::from_secs(3600));
    let (running, trigger, queue) = start(
        config,
        uplink.clone(),
        Arc::new(CountingPower::default()),
        Jumper::default(),
    )
    .await;

    push(&running, "EC;20;0;0;0").await;
    push(&running, "EC,-20,0,0,0").await;
    push(&running, "EC,20,0,0,0").await;

    assert!(queued(&queue, 1).await);
    assert!(uplink.delivered().is_empty());

    trigger.trigger();
    tokio::time::timeout(WAIT, running.wait()).await.unwrap();
}

/// The jumper switches ingestion from buffering to immediate sends
#[tokio::test]
async fn test_jumper_switches_to_direct_sends() {
    let dir = tempfile::tempdir().unwrap();
    let uplink = Arc::new(RecordingUplink::default());
    let power = Arc::new(CountingPower::default());
    let jumper = Jumper::default();
    // Keep the scheduler asleep so only direct sends can reach the uplink.
    let config = fast_config(&dir.path().join("Data.txt"))
        .with_startup_delay(Duration::from_secs(3600));
    let (running, trigger, queue) =
        start(config, uplink.clone(), power.clone(), jumper.clone()).await;

    // First poll enters normal mode and powers the modem down.
    assert!(eventually(|| power.offs.load(Ordering::SeqCst) >= 1).await);
    push(&running, "EC,18,0,0,0").await;
    assert!(queued(&queue, 1).await);
    assert!(uplink.delivered().is_empty());

    jumper.set(true);
    assert!(eventually(|| uplink.connects.load(Ordering::SeqCst) >= 1).await);
    assert_eq!(power.ons.load(Ordering::SeqCst), 1);

    push(&running, "CE,30,0,0,1500").await;
    assert!(eventually(|| uplink.delivered().len() == 1).await);
    assert_eq!(source_ids(&uplink.delivered()), vec!["CE"]);
    assert_eq!(queue.len().await.unwrap(), 1);

    trigger.trigger();
    tokio::time::timeout(WAIT, running.wait()).await.unwrap();
}

/// Frames queued while the uplink is unreachable survive a restart and go out afterwards
#[tokio::test]
async fn test_backlog_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Data.txt");

    let offline = Arc::new(RecordingUplink::offline());
    let (running, trigger, queue) = start(
        fast_config(&path),
        offline.clone(),
        Arc::new(CountingPower::default()),
        Jumper::default(),
    )
    .await;

    push(&running, "EN,3,1015,55,0").await;
    push(&running, "EC,22,0,0,0").await;
    assert!(queued(&queue, 2).await);
    // The scheduler is now stuck retrying the connect.
    assert!(eventually(|| offline.connects.load(Ordering::SeqCst) >= 2).await);

    trigger.trigger();
    tokio::time::timeout(WAIT, running.wait()).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 2);
    assert!(offline.delivered().is_empty());
    drop(queue);

    let online = Arc::new(RecordingUplink::default());
    let (running, trigger, queue) = start(
        fast_config(&path),
        online.clone(),
        Arc::new(CountingPower::default()),
        Jumper::default(),
    )
    .await;

    assert!(eventually(|| online.delivered().len() == 2).await);
    assert_eq!(source_ids(&online.delivered()), vec!["EN", "EC"]);

    trigger.trigger();
    tokio::time::timeout(WAIT, running.wait()).await.unwrap();
    assert!(queue.is_empty().await.unwrap());
}
