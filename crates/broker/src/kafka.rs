//! Kafka backend built on `rdkafka`.
//!
//! [`KafkaPublisher`] wraps a `FutureProducer` configured for full
//! replication acknowledgment; [`KafkaSource`] wraps a `StreamConsumer`
//! that joins the configured consumer group. Partition assignment, offset
//! commits and reconnects are left to librdkafka.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;

use vitalsim_core::{BrokerConfig, ConsumerConfig};

use crate::error::BrokerError;
use crate::{ConsumedRecord, DeliveryReport, RecordPublisher, RecordSource};

/// How long a record may wait in librdkafka's local queue when it is full.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the flush performed by [`KafkaPublisher::close`].
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum records collected by one [`KafkaSource::poll`].
const MAX_POLL_RECORDS: usize = 500;

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// librdkafka properties for the producer.
pub fn producer_client_config(config: &BrokerConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("acks", &config.acks)
        .set("linger.ms", config.linger_ms.to_string())
        .set("batch.size", config.batch_size.to_string())
        .set(
            "message.timeout.ms",
            config.message_timeout.as_millis().to_string(),
        );
    client
}

/// librdkafka properties for one consumer-group member.
pub fn consumer_client_config(config: &ConsumerConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.broker.bootstrap_servers)
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", &config.auto_offset_reset);
    client
}

// ---------------------------------------------------------------------------
// KafkaPublisher
// ---------------------------------------------------------------------------

/// Publishes records and waits for the broker's acknowledgment.
pub struct KafkaPublisher {
    producer: FutureProducer,
    closed: AtomicBool,
}

impl KafkaPublisher {
    /// Create the producer. Fails only on invalid configuration; broker
    /// reachability is discovered on the first send.
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = producer_client_config(config)
            .create()
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        tracing::info!(
            bootstrap_servers = %config.bootstrap_servers,
            acks = %config.acks,
            "Kafka producer created",
        );

        Ok(Self {
            producer,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RecordPublisher for KafkaPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<DeliveryReport, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }

        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, QUEUE_TIMEOUT).await {
            Ok((partition, offset)) => Ok(DeliveryReport {
                topic: topic.to_string(),
                partition,
                offset,
            }),
            Err((e, _message)) => Err(BrokerError::Publish(e.to_string())),
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // flush() blocks on librdkafka; keep it off the async workers.
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(CLOSE_FLUSH_TIMEOUT))
            .await
            .map_err(|e| BrokerError::Flush(e.to_string()))?
            .map_err(|e| BrokerError::Flush(e.to_string()))?;

        tracing::info!("Kafka producer flushed and closed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// KafkaSource
// ---------------------------------------------------------------------------

/// One consumer-group member backed by a `StreamConsumer`.
pub struct KafkaSource {
    /// `None` once closed.
    consumer: Option<StreamConsumer>,
    /// Records received by a poll that was dropped before returning.
    pending: Vec<ConsumedRecord>,
}

impl KafkaSource {
    pub fn new(config: &ConsumerConfig) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = consumer_client_config(config)
            .create()
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        Ok(Self {
            consumer: Some(consumer),
            pending: Vec::new(),
        })
    }
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        let consumer = self.consumer.as_ref().ok_or(BrokerError::Closed)?;
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| BrokerError::Subscribe(e.to_string()))
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumedRecord>, BrokerError> {
        let consumer = self.consumer.as_ref().ok_or(BrokerError::Closed)?;
        let deadline = tokio::time::Instant::now() + timeout;

        // Buffer into `self.pending` so a cancelled poll keeps what it got.
        while self.pending.len() < MAX_POLL_RECORDS {
            let wait_until = recv_deadline(
                self.pending.is_empty(),
                deadline,
                tokio::time::Instant::now(),
            );
            match tokio::time::timeout_at(wait_until, consumer.recv()).await {
                Ok(Ok(msg)) => self.pending.push(ConsumedRecord {
                    topic: msg.topic().to_string(),
                    partition: msg.partition(),
                    offset: msg.offset(),
                    key: msg.key().map(|k| String::from_utf8_lossy(k).into_owned()),
                    value: msg
                        .payload()
                        .map(|v| String::from_utf8_lossy(v).into_owned()),
                }),
                Ok(Err(e)) if self.pending.is_empty() => {
                    return Err(BrokerError::Poll(e.to_string()));
                }
                Ok(Err(e)) => {
                    // Keep the records already received.
                    tracing::warn!(error = %e, "Kafka consumer error");
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(std::mem::take(&mut self.pending))
    }

    fn take_buffered(&mut self) -> Vec<ConsumedRecord> {
        std::mem::take(&mut self.pending)
    }

    async fn close(&mut self) {
        if !self.pending.is_empty() {
            // Their offsets are already stored for auto-commit.
            tracing::warn!(
                dropped = self.pending.len(),
                first_offset = self.pending[0].offset,
                partition = self.pending[0].partition,
                "Closing Kafka consumer with undelivered buffered records",
            );
            self.pending.clear();
        }
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            tracing::debug!("Kafka consumer unsubscribed and closed");
        }
    }
}

/// Wait for the full poll timeout only until the first record arrives;
/// after that, take only what is already queued.
fn recv_deadline(
    nothing_yet: bool,
    deadline: tokio::time::Instant,
    now: tokio::time::Instant,
) -> tokio::time::Instant {
    if nothing_yet {
        deadline
    } else {
        now.min(deadline)
    }
}
