//! Broker client seam for the vital-signs simulator.
//!
//! The producer and consumer orchestration only talk to the two traits
//! defined here:
//!
//! - [`RecordPublisher`]: send one keyed record and wait for the broker's
//!   acknowledgment. Shared by every device task.
//! - [`RecordSource`]: a single consumer-group member. Owned by exactly one
//!   consumer worker.
//!
//! Two backends implement them: [`kafka`] (librdkafka via `rdkafka`, behind
//! the default `kafka` feature) and [`memory`], an in-process broker with
//! partitioned topics and consumer groups.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod partitioner;

pub use error::BrokerError;
pub use memory::{InMemoryBroker, InMemoryPublisher, InMemorySource};

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// Where the broker stored an acknowledged record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A record as observed by a consumer. Read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: Option<String>,
}

impl fmt::Display for ConsumedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{partition={}, offset={}, key={}, value={}}}",
            self.partition,
            self.offset,
            self.key.as_deref().unwrap_or("null"),
            self.value.as_deref().unwrap_or("null"),
        )
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Sends keyed records to a topic.
///
/// `publish` resolves only once the broker has acknowledged the record (or
/// the send failed), so callers observe each send synchronously.
#[async_trait]
pub trait RecordPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<DeliveryReport, BrokerError>;

    /// Flush buffered records and release the client. Idempotent.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// One member of a consumer group.
///
/// `poll` must be cancel-safe: dropping a pending poll future (for example
/// from a `tokio::select!` branch) must not lose records.
#[async_trait]
pub trait RecordSource: Send {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError>;

    /// Wait up to `timeout` and return zero or more records.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumedRecord>, BrokerError>;

    /// Records a dropped `poll` had already received but not returned.
    ///
    /// Called after a cancelled poll so they still reach the caller before
    /// `close`. Sources that never buffer across polls return nothing.
    fn take_buffered(&mut self) -> Vec<ConsumedRecord> {
        Vec::new()
    }

    /// Leave the group and drop the connection. Idempotent.
    async fn close(&mut self);
}
