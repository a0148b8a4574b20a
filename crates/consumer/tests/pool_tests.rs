//! Integration tests for the consumer pool against the in-memory broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use vitalsim_broker::{
    BrokerError, ConsumedRecord, InMemoryBroker, RecordPublisher, RecordSource,
};
use vitalsim_consumer::{ConsumerError, ConsumerPool, KpiSink, RecordSink, WorkerStatus};
use vitalsim_core::{ConsumerConfig, ReadingGenerator};

const TOPIC: &str = "health-data-records";
const GRACE: Duration = Duration::from_secs(5);

fn config(workers: usize) -> ConsumerConfig {
    ConsumerConfig {
        worker_count: workers,
        ..ConsumerConfig::default()
    }
}

fn start(broker: &InMemoryBroker, workers: usize, sink: Arc<dyn RecordSink>) -> ConsumerPool {
    let config = config(workers);
    ConsumerPool::start(&config, |_| Ok(broker.source(config.group_id.clone())), sink)
        .expect("pool should start")
}

/// Sink that remembers which worker saw which record.
#[derive(Default)]
struct Collect(Mutex<Vec<(usize, ConsumedRecord)>>);

impl Collect {
    fn seen(&self) -> Vec<(usize, ConsumedRecord)> {
        self.0.lock().unwrap().clone()
    }
}

impl RecordSink for Collect {
    fn accept(&self, worker_id: usize, record: &ConsumedRecord) {
        self.0.lock().unwrap().push((worker_id, record.clone()));
    }
}

/// Source whose subscribe always fails; counts closes.
struct RejectingSource {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl RecordSource for RejectingSource {
    async fn subscribe(&mut self, _topics: &[String]) -> Result<(), BrokerError> {
        Err(BrokerError::Subscribe("unknown topic".into()))
    }

    async fn poll(&mut self, _timeout: Duration) -> Result<Vec<ConsumedRecord>, BrokerError> {
        Err(BrokerError::NotSubscribed)
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Source whose polls fail until `failures` runs out, then return nothing.
struct FlakySource {
    failures: usize,
    polls: Arc<AtomicUsize>,
}

#[async_trait]
impl RecordSource for FlakySource {
    async fn subscribe(&mut self, _topics: &[String]) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumedRecord>, BrokerError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.failures > 0 {
            self.failures -= 1;
            return Err(BrokerError::Poll("broker transport failure".into()));
        }
        tokio::time::sleep(timeout).await;
        Ok(Vec::new())
    }

    async fn close(&mut self) {}
}

// ---------------------------------------------------------------------------
// Test: delivery
// ---------------------------------------------------------------------------

/// Three workers in one group: a single published record is delivered to
/// exactly one of them, with its key and value intact.
#[tokio::test(start_paused = true)]
async fn one_record_reaches_exactly_one_worker() {
    let broker = InMemoryBroker::default();
    let sink = Arc::new(Collect::default());
    let pool = start(&broker, 3, sink.clone());

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(broker.group_size("HealthDataConsumer"), 3);

    broker
        .publisher()
        .publish(TOPIC, "device_1", br#"{"spo2":90}"#)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    pool.shutdown();
    pool.join(GRACE).await;

    let seen = sink.seen();
    assert_eq!(seen.len(), 1);
    let (worker_id, record) = &seen[0];
    assert!(*worker_id < 3);
    assert_eq!(record.key.as_deref(), Some("device_1"));
    assert_eq!(record.value.as_deref(), Some(r#"{"spo2":90}"#));
}

/// Health readings fed through the pool end up in the KPI summary.
#[tokio::test(start_paused = true)]
async fn kpi_sink_aggregates_records_from_every_worker() {
    let broker = InMemoryBroker::default();
    let kpi = Arc::new(KpiSink::new());
    let pool = start(&broker, 3, kpi.clone());

    let publisher = broker.publisher();
    let generator = ReadingGenerator::new();
    for device in ["device_1", "device_1", "device_2"] {
        let value = generator.generate(device).to_json().unwrap();
        publisher.publish(TOPIC, device, &value).await.unwrap();
    }
    let junk = serde_json::to_vec(&serde_json::json!({ "device_id": "device_3" })).unwrap();
    publisher.publish(TOPIC, "device_3", &junk).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    pool.shutdown();
    pool.join(GRACE).await;

    let snapshot = kpi.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].device_id, "device_1");
    assert_eq!(snapshot[0].readings, 2);
    assert_eq!(snapshot[1].device_id, "device_2");
    assert_eq!(snapshot[1].readings, 1);
    assert_eq!(kpi.undecodable(), 1);
}

// ---------------------------------------------------------------------------
// Test: shutdown
// ---------------------------------------------------------------------------

/// Shutdown interrupts pending polls: every worker stops well inside one
/// poll timeout and closes its source exactly once.
#[tokio::test(start_paused = true)]
async fn workers_stop_promptly_on_shutdown() {
    let broker = InMemoryBroker::default();
    let pool = start(&broker, 3, Arc::new(Collect::default()));
    let handles = pool.handles().to_vec();

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(pool.statuses().iter().all(|s| *s == WorkerStatus::Running));

    let started = tokio::time::Instant::now();
    pool.shutdown();
    let report = pool.join(GRACE).await;

    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(report.stopped, 3);
    assert_eq!(report.forced, 0);
    assert!(handles.iter().all(|h| h.status() == WorkerStatus::Stopped));
    assert_eq!(broker.source_close_count(), 3);
    assert_eq!(broker.group_size("HealthDataConsumer"), 0);
}

/// Shutting one worker down twice neither fails nor closes its source twice,
/// and leaves the other workers running.
#[tokio::test(start_paused = true)]
async fn repeated_shutdown_closes_source_once() {
    let broker = InMemoryBroker::default();
    let pool = start(&broker, 3, Arc::new(Collect::default()));
    tokio::time::sleep(Duration::from_millis(1)).await;

    let first = &pool.handles()[0];
    first.shutdown();
    first.shutdown();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(first.status(), WorkerStatus::Stopped);
    assert_eq!(broker.source_close_count(), 1);
    assert_eq!(pool.handles()[1].status(), WorkerStatus::Running);
    assert_eq!(broker.group_size("HealthDataConsumer"), 2);

    pool.shutdown();
    pool.shutdown();
    let report = pool.join(GRACE).await;

    assert_eq!(report.stopped, 3);
    assert_eq!(broker.source_close_count(), 3);
}

// ---------------------------------------------------------------------------
// Test: failures
// ---------------------------------------------------------------------------

/// A factory error aborts startup before any worker is spawned.
#[tokio::test]
async fn factory_error_starts_no_workers() {
    let broker = InMemoryBroker::default();
    let config = config(3);

    let result = ConsumerPool::start(
        &config,
        |worker_id| {
            if worker_id == 1 {
                Err(BrokerError::Connect("no brokers available".into()))
            } else {
                Ok(broker.source(config.group_id.clone()))
            }
        },
        Arc::new(Collect::default()),
    );

    assert_matches!(
        result,
        Err(ConsumerError::CreateWorker { worker_id: 1, source: BrokerError::Connect(_) })
    );
    assert_eq!(broker.group_size("HealthDataConsumer"), 0);
}

/// A worker that cannot subscribe exits with an error but still closes its
/// source.
#[tokio::test]
async fn subscribe_failure_is_reported_and_source_closed() {
    let closes = Arc::new(AtomicUsize::new(0));
    let pool = ConsumerPool::start(
        &config(2),
        |_| {
            Ok(RejectingSource {
                closes: Arc::clone(&closes),
            })
        },
        Arc::new(Collect::default()),
    )
    .expect("sources are created lazily");

    let report = pool.join(GRACE).await;

    assert_eq!(report.failed, 2);
    assert_eq!(report.stopped, 0);
    assert_eq!(closes.load(Ordering::SeqCst), 2);
}

/// Transient poll errors are logged and the worker keeps polling.
#[tokio::test(start_paused = true)]
async fn poll_errors_do_not_stop_the_worker() {
    let polls = Arc::new(AtomicUsize::new(0));
    let pool = ConsumerPool::start(
        &config(1),
        |_| {
            Ok(FlakySource {
                failures: 2,
                polls: Arc::clone(&polls),
            })
        },
        Arc::new(Collect::default()),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(pool.statuses(), vec![WorkerStatus::Running]);
    assert!(polls.load(Ordering::SeqCst) >= 4);

    pool.shutdown();
    let report = pool.join(GRACE).await;
    assert_eq!(report.stopped, 1);
}
