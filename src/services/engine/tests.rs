//! Tests for the Engine loop under paused time

use super::*;
use crate::domain::layout::StorageLayout;
use crate::domain::types::{DistanceCm, PendingReport};
use crate::io::commands::{Command, CommandReply};
use crate::io::sensor::{SensorError, SimulatedSensor};
use crate::io::storage::MemNvStorage;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{sleep, Duration};

// 2026-10-18 12:00:00 UTC
const NOW: i64 = 1_792_324_800;

/// Records every report; optionally fails them all
#[derive(Default)]
struct MockSink {
    sent: Mutex<Vec<PendingReport>>,
    fail: bool,
}

#[async_trait]
impl ReportSink for MockSink {
    async fn send(&self, report: &PendingReport) -> Result<(), ReportError> {
        self.sent.lock().push(report.clone());
        if self.fail {
            Err(ReportError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Fixed network time, or a failure
struct MockTime {
    epoch: Option<i64>,
    queries: Mutex<u32>,
}

impl MockTime {
    fn at(epoch: i64) -> Self {
        Self { epoch: Some(epoch), queries: Mutex::new(0) }
    }

    fn unreachable() -> Self {
        Self { epoch: None, queries: Mutex::new(0) }
    }
}

#[async_trait]
impl TimeSource for MockTime {
    async fn query(&self) -> Result<i64, SyncError> {
        *self.queries.lock() += 1;
        self.epoch.ok_or(SyncError::Timeout)
    }
}

/// Sensor that never answers within the read timeout
struct StuckSensor;

#[async_trait]
impl DistanceSensor for StuckSensor {
    async fn measure(&mut self) -> Result<DistanceCm, SensorError> {
        sleep(Duration::from_secs(3600)).await;
        Err(SensorError::NoEcho)
    }
}

/// One passage at the start, then an empty doorway for a long time
fn one_visitor() -> SimulatedSensor {
    let mut pattern = vec![200; 3];
    pattern.extend([140; 4]);
    pattern.extend(vec![250; 1000]);
    SimulatedSensor::from_pattern(pattern)
}

struct Harness<S: DistanceSensor> {
    engine: Engine<S, MemNvStorage>,
    sink: Arc<MockSink>,
    time: Arc<MockTime>,
    metrics: Arc<Metrics>,
}

fn harness<S: DistanceSensor>(sensor: S, storage: MemNvStorage, sink: MockSink, time: MockTime) -> Harness<S> {
    let sink = Arc::new(sink);
    let time = Arc::new(time);
    let metrics = Arc::new(Metrics::new());
    let engine = Engine::new(
        Config::default(),
        sensor,
        storage,
        sink.clone(),
        time.clone(),
        metrics.clone(),
    )
    .unwrap();
    Harness { engine, sink, time, metrics }
}

/// Run the engine for `duration` of virtual time, driving `script` alongside
async fn run_for<S, F>(
    engine: Engine<S, MemNvStorage>,
    duration: Duration,
    script: impl FnOnce(mpsc::Sender<CommandRequest>) -> F,
) -> Engine<S, MemNvStorage>
where
    S: DistanceSensor,
    F: std::future::Future<Output = ()>,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = async move {
        script(cmd_tx).await;
        sleep(duration).await;
        let _ = shutdown_tx.send(true);
    };
    let (engine, ()) = tokio::join!(engine.run(cmd_rx, shutdown_rx), driver);
    engine
}

async fn idle(_: mpsc::Sender<CommandRequest>) {}

async fn send_command(tx: &mpsc::Sender<CommandRequest>, command: Command) -> CommandReply {
    let (reply, rx) = oneshot::channel();
    tx.send(CommandRequest { command, reply }).await.unwrap();
    rx.await.unwrap()
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[tokio::test(start_paused = true)]
async fn test_single_passage_counted_and_persisted() {
    let h = harness(one_visitor(), MemNvStorage::new(64), MockSink::default(), MockTime::at(NOW));
    let metrics = h.metrics.clone();

    let engine = run_for(h.engine, secs(5), idle).await;

    assert_eq!(engine.visitor_count(), 1);
    assert_eq!(engine.zone_state(), ZoneState::Idle);
    assert_eq!(metrics.entries_total(), 1);
    assert_eq!(metrics.visitor_count(), 1);

    let storage = engine.into_storage();
    assert_eq!(&storage.image()[0..4], &1u32.to_le_bytes());
}

#[tokio::test(start_paused = true)]
async fn test_count_survives_restart() {
    let h = harness(one_visitor(), MemNvStorage::new(64), MockSink::default(), MockTime::at(NOW));
    let engine = run_for(h.engine, secs(5), idle).await;
    let storage = engine.into_storage();

    let h = harness(one_visitor(), storage, MockSink::default(), MockTime::at(NOW + 60));
    assert_eq!(h.engine.visitor_count(), 1);
    let engine = run_for(h.engine, secs(5), idle).await;
    assert_eq!(engine.visitor_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reports_carry_cumulative_count() {
    let h = harness(one_visitor(), MemNvStorage::new(64), MockSink::default(), MockTime::at(NOW));
    let sink = h.sink.clone();
    let metrics = h.metrics.clone();

    run_for(h.engine, Duration::from_millis(25_500), idle).await;

    let sent = sink.sent.lock();
    // Report ticks at 10 s and 20 s
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|r| r.visitor_count == 1));
    assert_eq!(sent[0].device_id, "ARDUINO_001");
    assert_eq!(sent[0].status, "active");
    assert_eq!(sent[1].epoch - sent[0].epoch, 10);
    assert!(sent[0].timestamp.ends_with("+03:00"));
    assert_eq!(metrics.report().reports_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reports_do_not_affect_count() {
    let sink = MockSink { fail: true, ..Default::default() };
    let h = harness(one_visitor(), MemNvStorage::new(64), sink, MockTime::at(NOW));
    let sink = h.sink.clone();
    let metrics = h.metrics.clone();

    let engine = run_for(h.engine, Duration::from_millis(25_500), idle).await;

    assert_eq!(engine.visitor_count(), 1);
    // One attempt per tick, never retried in between
    assert_eq!(sink.sent.lock().len(), 2);
    let summary = metrics.report();
    assert_eq!(summary.reports_failed, 2);
    assert_eq!(summary.reports_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_time_sync_applied_and_checkpointed() {
    let h = harness(one_visitor(), MemNvStorage::new(64), MockSink::default(), MockTime::at(NOW));
    let metrics = h.metrics.clone();

    let engine = run_for(h.engine, secs(61), idle).await;

    let epoch = engine.now_epoch();
    assert!((NOW + 60..=NOW + 62).contains(&epoch));
    assert_eq!(metrics.report().time_syncs_ok, 1);

    let storage = engine.into_storage();
    let mut store = PersistentStore::new(storage, StorageLayout::default()).unwrap();
    let restored = store.load_clock().unwrap();
    assert!((NOW + 60..=NOW + 62).contains(&restored));
}

#[tokio::test(start_paused = true)]
async fn test_sync_failure_is_not_fatal() {
    let h = harness(one_visitor(), MemNvStorage::new(64), MockSink::default(), MockTime::unreachable());
    let time = h.time.clone();
    let metrics = h.metrics.clone();

    let engine = run_for(h.engine, secs(5), idle).await;

    assert_eq!(engine.visitor_count(), 1);
    assert_eq!(*time.queries.lock(), 1);
    assert_eq!(metrics.report().time_syncs_failed, 1);
    // Fresh storage and no sync: the clock started from the epoch
    assert!(engine.now_epoch() < 10);
}

#[tokio::test(start_paused = true)]
async fn test_reset_command_rate_limited() {
    let h = harness(one_visitor(), MemNvStorage::new(64), MockSink::default(), MockTime::at(NOW));
    let metrics = h.metrics.clone();

    let replies = Arc::new(Mutex::new(Vec::new()));
    let captured = replies.clone();
    let engine = run_for(h.engine, secs(1), |tx| async move {
        sleep(secs(3)).await;
        for command in [Command::Reset, Command::Reset, Command::Status] {
            let reply = send_command(&tx, command).await;
            captured.lock().push(reply);
        }
    })
    .await;

    let replies = replies.lock();
    assert_eq!(replies[0], CommandReply::ResetAccepted { previous: 1 });
    assert!(matches!(
        replies[1],
        CommandReply::ResetRejected { remaining_secs } if remaining_secs > 43_000
    ));
    match &replies[2] {
        CommandReply::Status(status) => {
            assert_eq!(status.visitor_count, 0);
            assert!(status.synced);
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    assert_eq!(engine.visitor_count(), 0);
    let summary = metrics.report();
    assert_eq!(summary.resets_accepted, 1);
    assert_eq!(summary.resets_rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_sensor_does_not_stall_loop() {
    let h = harness(StuckSensor, MemNvStorage::new(64), MockSink::default(), MockTime::at(NOW));
    let sink = h.sink.clone();
    let metrics = h.metrics.clone();

    let engine = run_for(h.engine, Duration::from_millis(10_500), idle).await;

    assert_eq!(engine.visitor_count(), 0);
    assert!(metrics.report().invalid_samples_total > 0);
    // Reporting kept its cadence despite every read timing out
    assert_eq!(sink.sent.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_layout_rejected() {
    let result = Engine::new(
        Config::default(),
        one_visitor(),
        MemNvStorage::new(16),
        Arc::new(MockSink::default()),
        Arc::new(MockTime::at(NOW)),
        Arc::new(Metrics::new()),
    );
    assert!(result.is_err());
}
