//! In-process broker with partitioned topics and consumer groups.
//!
//! [`InMemoryBroker`] mirrors the broker behaviour the simulator relies on:
//!
//! - keyed records are placed by Murmur2 key hash, offsets grow by one per
//!   partition;
//! - consumer-group members split a topic's partitions round-robin (members
//!   ordered by join order), rebalanced whenever a member joins or leaves;
//! - each group keeps one position per partition, so a record is delivered
//!   to exactly one member of a group.
//!
//! Groups start reading from the beginning of each partition. The broker is
//! cheap to clone; all clones share the same state.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::BrokerError;
use crate::partitioner::partition_for_key;
use crate::{ConsumedRecord, DeliveryReport, RecordPublisher, RecordSource};

/// Partitions created for a topic on first use.
pub const DEFAULT_PARTITIONS: i32 = 3;

/// Maximum records handed out by a single poll.
pub const DEFAULT_MAX_POLL_RECORDS: usize = 500;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    value: Vec<u8>,
}

#[derive(Debug, Default)]
struct Group {
    members: BTreeSet<u64>,
    /// Next offset to deliver, per (topic, partition).
    positions: HashMap<(String, i32), i64>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    groups: HashMap<String, Group>,
    next_member_id: u64,
    failures_pending: usize,
    source_closes: usize,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    arrivals: Notify,
    partitions: i32,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        // The state is never left half-updated, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// InMemoryBroker
// ---------------------------------------------------------------------------

/// Handle to an in-process broker. Clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl InMemoryBroker {
    /// Create a broker whose topics have `partitions` partitions each.
    ///
    /// A non-positive count is clamped to one partition.
    pub fn new(partitions: i32) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                arrivals: Notify::new(),
                partitions: partitions.max(1),
            }),
        }
    }

    /// A publisher bound to this broker.
    pub fn publisher(&self) -> InMemoryPublisher {
        InMemoryPublisher {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }
    }

    /// A consumer-group member bound to this broker. It joins the group on
    /// [`subscribe`](RecordSource::subscribe).
    pub fn source(&self, group_id: impl Into<String>) -> InMemorySource {
        InMemorySource {
            shared: Arc::clone(&self.shared),
            group_id: group_id.into(),
            member_id: None,
            topics: Vec::new(),
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
            closed: false,
        }
    }

    pub fn partitions(&self) -> i32 {
        self.shared.partitions
    }

    /// Make the next `n` publishes fail with [`BrokerError::Publish`].
    pub fn fail_next_publishes(&self, n: usize) {
        self.shared.state().failures_pending += n;
    }

    /// Total records stored on `topic` across all partitions.
    pub fn record_count(&self, topic: &str) -> usize {
        self.shared
            .state()
            .topics
            .get(topic)
            .map_or(0, |parts| parts.iter().map(Vec::len).sum())
    }

    /// Keys stored on `topic`, in partition then offset order.
    pub fn keys(&self, topic: &str) -> Vec<Option<String>> {
        self.shared
            .state()
            .topics
            .get(topic)
            .map(|parts| {
                parts
                    .iter()
                    .flat_map(|records| records.iter().map(|r| r.key.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current number of members in `group_id`.
    pub fn group_size(&self, group_id: &str) -> usize {
        self.shared
            .state()
            .groups
            .get(group_id)
            .map_or(0, |g| g.members.len())
    }

    /// How many times any source bound to this broker has actually closed.
    pub fn source_close_count(&self) -> usize {
        self.shared.state().source_closes
    }
}

// ---------------------------------------------------------------------------
// InMemoryPublisher
// ---------------------------------------------------------------------------

/// Publishes into an [`InMemoryBroker`]. Acknowledges immediately.
#[derive(Debug)]
pub struct InMemoryPublisher {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl InMemoryPublisher {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl RecordPublisher for InMemoryPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<DeliveryReport, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let partitions = self.shared.partitions;
        let report = {
            let mut state = self.shared.state();
            if state.failures_pending > 0 {
                state.failures_pending -= 1;
                return Err(BrokerError::Publish(format!(
                    "broker rejected record for key {key}"
                )));
            }

            let partition = partition_for_key(key.as_bytes(), partitions);
            let log = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); partitions as usize]);
            let records = &mut log[partition as usize];
            records.push(StoredRecord {
                key: Some(key.to_string()),
                value: payload.to_vec(),
            });

            DeliveryReport {
                topic: topic.to_string(),
                partition,
                offset: records.len() as i64 - 1,
            }
        };

        self.shared.arrivals.notify_waiters();
        Ok(report)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("In-memory publisher closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InMemorySource
// ---------------------------------------------------------------------------

/// A consumer-group member reading from an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemorySource {
    shared: Arc<Shared>,
    group_id: String,
    member_id: Option<u64>,
    topics: Vec<String>,
    max_poll_records: usize,
    closed: bool,
}

impl InMemorySource {
    /// Cap the number of records a single poll may return.
    pub fn with_max_poll_records(mut self, max: usize) -> Self {
        self.max_poll_records = max.max(1);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Take every record currently available on this member's partitions
    /// and advance the group positions past them.
    fn take_available(&self, member_id: u64) -> Vec<ConsumedRecord> {
        let partitions = self.shared.partitions;
        let mut guard = self.shared.state();
        let state = &mut *guard;

        let Some(group) = state.groups.get_mut(&self.group_id) else {
            return Vec::new();
        };
        let Some(index) = group.members.iter().position(|m| *m == member_id) else {
            return Vec::new();
        };
        let member_count = group.members.len();

        let mut out = Vec::new();
        for topic in &self.topics {
            let Some(log) = state.topics.get(topic) else {
                continue;
            };
            for partition in (0..partitions).filter(|p| *p as usize % member_count == index) {
                let records = &log[partition as usize];
                let position = group
                    .positions
                    .entry((topic.clone(), partition))
                    .or_insert(0);

                while (*position as usize) < records.len() && out.len() < self.max_poll_records {
                    let stored = &records[*position as usize];
                    out.push(ConsumedRecord {
                        topic: topic.clone(),
                        partition,
                        offset: *position,
                        key: stored.key.clone(),
                        value: Some(String::from_utf8_lossy(&stored.value).into_owned()),
                    });
                    *position += 1;
                }
            }
        }
        out
    }
}

#[async_trait]
impl RecordSource for InMemorySource {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }

        let mut state = self.shared.state();
        let member_id = match self.member_id {
            Some(id) => id,
            None => {
                state.next_member_id += 1;
                let id = state.next_member_id;
                self.member_id = Some(id);
                id
            }
        };
        state
            .groups
            .entry(self.group_id.clone())
            .or_default()
            .members
            .insert(member_id);
        self.topics = topics.to_vec();

        tracing::debug!(group_id = %self.group_id, member_id, ?topics, "Joined consumer group");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumedRecord>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let member_id = self.member_id.ok_or(BrokerError::NotSubscribed)?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a publish between the
            // check and the wait is not missed.
            let arrived = self.shared.arrivals.notified();

            let records = self.take_available(member_id);
            if !records.is_empty() {
                return Ok(records);
            }

            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut state = self.shared.state();
        if let Some(member_id) = self.member_id.take() {
            if let Some(group) = state.groups.get_mut(&self.group_id) {
                group.members.remove(&member_id);
            }
        }
        state.source_closes += 1;
        tracing::debug!(group_id = %self.group_id, "Left consumer group");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const TOPIC: &str = "health-data-records";
    const POLL: Duration = Duration::from_millis(50);

    fn topics() -> Vec<String> {
        vec![TOPIC.to_string()]
    }

    #[tokio::test]
    async fn offsets_increase_per_partition() {
        let broker = InMemoryBroker::new(1);
        let publisher = broker.publisher();

        let first = publisher.publish(TOPIC, "device_1", b"a").await.unwrap();
        let second = publisher.publish(TOPIC, "device_2", b"b").await.unwrap();

        assert_eq!(first.partition, 0);
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(broker.record_count(TOPIC), 2);
    }

    #[tokio::test]
    async fn same_key_lands_on_same_partition() {
        let broker = InMemoryBroker::default();
        let publisher = broker.publisher();

        let a = publisher.publish(TOPIC, "device_5", b"1").await.unwrap();
        let b = publisher.publish(TOPIC, "device_5", b"2").await.unwrap();

        assert_eq!(a.partition, b.partition);
        assert_eq!(b.offset, a.offset + 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let broker = InMemoryBroker::default();
        let publisher = broker.publisher();
        broker.fail_next_publishes(1);

        assert_matches!(
            publisher.publish(TOPIC, "device_1", b"x").await,
            Err(BrokerError::Publish(_))
        );
        assert!(publisher.publish(TOPIC, "device_1", b"x").await.is_ok());
        assert_eq!(broker.record_count(TOPIC), 1);
    }

    #[tokio::test]
    async fn closed_publisher_rejects_sends() {
        let broker = InMemoryBroker::default();
        let publisher = broker.publisher();
        publisher.close().await.unwrap();
        publisher.close().await.unwrap();

        assert!(publisher.is_closed());
        assert_matches!(
            publisher.publish(TOPIC, "device_1", b"x").await,
            Err(BrokerError::Closed)
        );
    }

    #[tokio::test]
    async fn poll_before_subscribe_is_an_error() {
        let broker = InMemoryBroker::default();
        let mut source = broker.source("g");
        assert_matches!(source.poll(POLL).await, Err(BrokerError::NotSubscribed));
    }

    #[tokio::test]
    async fn single_member_receives_all_partitions() {
        let broker = InMemoryBroker::default();
        let publisher = broker.publisher();
        let mut source = broker.source("g");
        source.subscribe(&topics()).await.unwrap();

        for n in 1..=10 {
            let key = format!("device_{n}");
            publisher.publish(TOPIC, &key, key.as_bytes()).await.unwrap();
        }

        let records = source.poll(POLL).await.unwrap();
        assert_eq!(records.len(), 10);
        for record in &records {
            assert_eq!(record.key.as_deref(), record.value.as_deref());
        }

        assert!(source.poll(POLL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_members_split_records_without_duplicates() {
        let broker = InMemoryBroker::default();
        let publisher = broker.publisher();

        let mut members = Vec::new();
        for _ in 0..3 {
            let mut source = broker.source("g");
            source.subscribe(&topics()).await.unwrap();
            members.push(source);
        }
        assert_eq!(broker.group_size("g"), 3);

        for n in 1..=30 {
            publisher
                .publish(TOPIC, &format!("device_{n}"), b"{}")
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        for member in &mut members {
            let records = member.poll(POLL).await.unwrap();
            let partitions: BTreeSet<i32> = records.iter().map(|r| r.partition).collect();
            assert!(partitions.len() <= 1, "each member owns one of 3 partitions");
            seen.extend(records.into_iter().map(|r| (r.partition, r.offset)));
        }

        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 30);
    }

    #[tokio::test]
    async fn separate_groups_each_see_every_record() {
        let broker = InMemoryBroker::default();
        let publisher = broker.publisher();
        let mut a = broker.source("group-a");
        let mut b = broker.source("group-b");
        a.subscribe(&topics()).await.unwrap();
        b.subscribe(&topics()).await.unwrap();

        publisher.publish(TOPIC, "device_1", b"v").await.unwrap();

        assert_eq!(a.poll(POLL).await.unwrap().len(), 1);
        assert_eq!(b.poll(POLL).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn poll_wakes_on_publish() {
        let broker = InMemoryBroker::default();
        let publisher = broker.publisher();
        let mut source = broker.source("g");
        source.subscribe(&topics()).await.unwrap();

        let poller = tokio::spawn(async move { source.poll(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish(TOPIC, "device_1", b"v").await.unwrap();

        let records = poller.await.unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.as_deref(), Some("device_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_poll_returns_after_timeout() {
        let broker = InMemoryBroker::default();
        let mut source = broker.source("g");
        source.subscribe(&topics()).await.unwrap();

        let start = tokio::time::Instant::now();
        let records = source.poll(Duration::from_millis(100)).await.unwrap();
        assert!(records.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn leaving_member_hands_partitions_back() {
        let broker = InMemoryBroker::default();
        let publisher = broker.publisher();
        let mut stays = broker.source("g");
        let mut leaves = broker.source("g");
        stays.subscribe(&topics()).await.unwrap();
        leaves.subscribe(&topics()).await.unwrap();

        leaves.close().await;
        assert_eq!(broker.group_size("g"), 1);

        for n in 1..=10 {
            publisher
                .publish(TOPIC, &format!("device_{n}"), b"{}")
                .await
                .unwrap();
        }
        assert_eq!(stays.poll(POLL).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let broker = InMemoryBroker::default();
        let mut source = broker.source("g");
        source.subscribe(&topics()).await.unwrap();

        source.close().await;
        source.close().await;

        assert!(source.is_closed());
        assert_eq!(broker.source_close_count(), 1);
        assert_matches!(source.poll(POLL).await, Err(BrokerError::Closed));
    }

    #[tokio::test]
    async fn max_poll_records_caps_a_poll() {
        let broker = InMemoryBroker::new(1);
        let publisher = broker.publisher();
        let mut source = broker.source("g").with_max_poll_records(2);
        source.subscribe(&topics()).await.unwrap();

        for _ in 0..5 {
            publisher.publish(TOPIC, "device_1", b"{}").await.unwrap();
        }

        assert_eq!(source.poll(POLL).await.unwrap().len(), 2);
        assert_eq!(source.poll(POLL).await.unwrap().len(), 2);
        assert_eq!(source.poll(POLL).await.unwrap().len(), 1);
    }
}
