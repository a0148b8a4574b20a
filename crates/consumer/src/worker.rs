//! Consumer worker state machine.
//!
//! A [`ConsumerWorker`] owns one [`RecordSource`] and polls it until its
//! cancellation token fires. The poll and the token race in a biased
//! `select!`, so a shutdown request interrupts a pending poll instead of
//! waiting for the poll timeout.
//!
//! ```text
//! Running --cancel--> Stopping --source closed--> Stopped
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vitalsim_broker::{BrokerError, ConsumedRecord, RecordSource};

use crate::sink::RecordSink;

/// Lifecycle of a worker. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    /// Cancellation observed; the source is being closed.
    Stopping,
    /// Source closed. Terminal.
    Stopped,
}

impl WorkerStatus {
    fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Stopping => 1,
            Self::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Result of a single [`ConsumerWorker::poll_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Zero or more records returned within the poll timeout.
    Records(Vec<ConsumedRecord>),
    /// The worker was asked to stop while polling. Not an error.
    Cancelled,
}

#[derive(Debug)]
struct StatusCell(AtomicU8);

impl StatusCell {
    fn new() -> Self {
        Self(AtomicU8::new(WorkerStatus::Running.as_u8()))
    }

    fn get(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Advance to `next`, never moving backwards.
    fn advance(&self, next: WorkerStatus) {
        self.0.fetch_max(next.as_u8(), Ordering::AcqRel);
    }
}

// ---------------------------------------------------------------------------
// WorkerHandle
// ---------------------------------------------------------------------------

/// Control side of a worker, usable after the worker has been spawned.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: usize,
    cancel: CancellationToken,
    status: Arc<StatusCell>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.get()
    }

    /// Ask the worker to stop. Safe to call any number of times.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(worker_id = self.id, "Shutdown requested");
        }
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// ConsumerWorker
// ---------------------------------------------------------------------------

pub struct ConsumerWorker<S> {
    id: usize,
    source: S,
    topics: Vec<String>,
    poll_timeout: Duration,
    sink: Arc<dyn RecordSink>,
    cancel: CancellationToken,
    status: Arc<StatusCell>,
}

impl<S: RecordSource> ConsumerWorker<S> {
    pub fn new(
        id: usize,
        source: S,
        topics: Vec<String>,
        poll_timeout: Duration,
        sink: Arc<dyn RecordSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            source,
            topics,
            poll_timeout,
            sink,
            cancel,
            status: Arc::new(StatusCell::new()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.get()
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            id: self.id,
            cancel: self.cancel.clone(),
            status: Arc::clone(&self.status),
        }
    }

    /// Wait for one batch of records, or for cancellation.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, BrokerError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.status.advance(WorkerStatus::Stopping);
                Ok(PollOutcome::Cancelled)
            }
            polled = self.source.poll(self.poll_timeout) => polled.map(PollOutcome::Records),
        }
    }

    /// Subscribe and poll until cancelled, handing every record to the sink.
    ///
    /// Records the source still buffers from an interrupted poll are handed
    /// to the sink before the source is closed exactly once on every exit
    /// path. A subscribe
    /// failure or a closed source ends the loop with an error; any other
    /// poll error is logged and polling continues.
    pub async fn run(mut self) -> Result<(), BrokerError> {
        let result = self.poll_loop().await;

        self.status.advance(WorkerStatus::Stopping);
        for record in &self.source.take_buffered() {
            self.sink.accept(self.id, record);
        }
        self.source.close().await;
        self.status.advance(WorkerStatus::Stopped);

        match &result {
            Ok(()) => tracing::info!(worker_id = self.id, "Consumer worker stopped"),
            Err(e) => tracing::error!(worker_id = self.id, error = %e, "Consumer worker failed"),
        }
        result
    }

    async fn poll_loop(&mut self) -> Result<(), BrokerError> {
        self.source.subscribe(&self.topics).await?;
        tracing::info!(worker_id = self.id, topics = ?self.topics, "Consumer worker subscribed");

        loop {
            match self.poll_once().await {
                Ok(PollOutcome::Cancelled) => return Ok(()),
                Ok(PollOutcome::Records(records)) => {
                    for record in &records {
                        self.sink.accept(self.id, record);
                    }
                }
                Err(e @ (BrokerError::Closed | BrokerError::NotSubscribed)) => return Err(e),
                Err(e) => {
                    tracing::warn!(worker_id = self.id, error = %e, "Poll failed");
                }
            }
        }
    }
}
