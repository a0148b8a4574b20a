//! Consumer pool manager.
//!
//! [`ConsumerPool`] builds every worker up front, then spawns them all on
//! the current runtime. Each worker gets a child of the pool's
//! cancellation token, so the pool can stop everyone at once while each
//! [`WorkerHandle`] can still stop its own worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use vitalsim_broker::{BrokerError, RecordSource};
use vitalsim_core::ConsumerConfig;

use crate::error::ConsumerError;
use crate::sink::RecordSink;
use crate::worker::{ConsumerWorker, WorkerHandle, WorkerStatus};

/// How long [`ConsumerPool::join`] waits for workers by default.
pub const DEFAULT_JOIN_GRACE: Duration = Duration::from_secs(5);

/// Outcome of [`ConsumerPool::join`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolShutdownReport {
    /// Workers that closed their source and exited cleanly.
    pub stopped: usize,
    /// Workers that exited with an error or panicked.
    pub failed: usize,
    /// Workers aborted after the grace period.
    pub forced: usize,
}

#[derive(Debug)]
pub struct ConsumerPool {
    handles: Vec<WorkerHandle>,
    tasks: JoinSet<Result<(), BrokerError>>,
    cancel: CancellationToken,
}

impl ConsumerPool {
    /// Create `config.worker_count` workers with ids `0..n`, one source each.
    ///
    /// No worker is spawned unless every source was created, so a failing
    /// factory leaves nothing running.
    pub fn start<S, F>(
        config: &ConsumerConfig,
        mut factory: F,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self, ConsumerError>
    where
        S: RecordSource + 'static,
        F: FnMut(usize) -> Result<S, BrokerError>,
    {
        let cancel = CancellationToken::new();
        let topics = vec![config.broker.topic.clone()];

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let source = factory(worker_id)
                .map_err(|source| ConsumerError::CreateWorker { worker_id, source })?;
            workers.push(ConsumerWorker::new(
                worker_id,
                source,
                topics.clone(),
                config.poll_timeout,
                Arc::clone(&sink),
                cancel.child_token(),
            ));
        }

        let handles: Vec<WorkerHandle> = workers.iter().map(ConsumerWorker::handle).collect();
        let mut tasks = JoinSet::new();
        for worker in workers {
            tasks.spawn(worker.run());
        }

        tracing::info!(
            workers = handles.len(),
            group_id = %config.group_id,
            topic = %config.broker.topic,
            "Consumer pool started",
        );

        Ok(Self {
            handles,
            tasks,
            cancel,
        })
    }

    pub fn handles(&self) -> &[WorkerHandle] {
        &self.handles
    }

    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.handles.iter().map(WorkerHandle::status).collect()
    }

    /// Signal every worker to stop. Idempotent; does not wait.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down consumers...");
        for handle in &self.handles {
            handle.shutdown();
        }
        self.cancel.cancel();
    }

    /// Wait for every worker to exit, aborting stragglers after `grace`.
    ///
    /// Call [`shutdown`](Self::shutdown) first, otherwise healthy workers
    /// keep polling until the grace period runs out.
    pub async fn join(mut self, grace: Duration) -> PoolShutdownReport {
        let mut report = PoolShutdownReport::default();

        let tasks = &mut self.tasks;
        let report_ref = &mut report;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(())) => report_ref.stopped += 1,
                    Ok(Err(_)) => report_ref.failed += 1,
                    Err(e) => {
                        tracing::error!(error = %e, "Consumer worker panicked");
                        report_ref.failed += 1;
                    }
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            report.forced = self.tasks.len();
            tracing::warn!(forced = report.forced, "Forcing consumer shutdown");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        tracing::info!(
            stopped = report.stopped,
            failed = report.failed,
            forced = report.forced,
            "Consumers shut down.",
        );
        report
    }
}
