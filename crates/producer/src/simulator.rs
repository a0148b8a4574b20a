//! Producer pool manager.
//!
//! [`DeviceSimulator`] owns one emission task per simulated device, the
//! shared publisher, and the cancellation token that stops them. Shutdown
//! runs in a fixed order: stop new ticks, close (flush) the publisher,
//! wait for in-flight ticks for a bounded grace period, then abort
//! whatever is still running.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use vitalsim_broker::RecordPublisher;
use vitalsim_core::{device_id, ProducerConfig, ReadingGenerator};

use crate::scheduler::{run_device, DeviceTask};

/// Outcome of [`DeviceSimulator::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether the publisher flushed and closed without error.
    pub publisher_closed: bool,
    /// Device tasks that had to be aborted after the grace period.
    pub forced: usize,
}

/// Runs the per-device emission tasks.
pub struct DeviceSimulator {
    device_ids: Vec<String>,
    publisher: Arc<dyn RecordPublisher>,
    tasks: JoinSet<()>,
    cancel: CancellationToken,
    shutdown_grace: Duration,
}

impl DeviceSimulator {
    /// Spawn one emission task per device (`device_1` .. `device_<n>`) on
    /// the current Tokio runtime. Each task fires immediately and then every
    /// `config.emit_interval`.
    pub fn start(
        config: &ProducerConfig,
        num_devices: usize,
        publisher: Arc<dyn RecordPublisher>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let generator = ReadingGenerator::new();
        let mut tasks = JoinSet::new();

        let device_ids: Vec<String> = (1..=num_devices).map(device_id).collect();

        for id in &device_ids {
            let task = DeviceTask {
                device_id: id.clone(),
                topic: config.broker.topic.clone(),
                interval: config.emit_interval,
                generator,
            };
            tasks.spawn(run_device(task, Arc::clone(&publisher), cancel.clone()));
        }

        tracing::info!(
            num_devices,
            topic = %config.broker.topic,
            interval_secs = config.emit_interval.as_secs(),
            "Device simulator started",
        );

        Self {
            device_ids,
            publisher,
            tasks,
            cancel,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Ids of the simulated devices, in scheduling order.
    pub fn device_ids(&self) -> &[String] {
        &self.device_ids
    }

    /// Number of device tasks still running.
    pub fn running_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Stop all devices and release the publisher.
    pub async fn shutdown(mut self) -> ShutdownReport {
        tracing::info!("Shutting down producer...");

        self.cancel.cancel();

        let publisher_closed = match self.publisher.close().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to close publisher");
                false
            }
        };

        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        let mut forced = 0;
        if !drained {
            forced = self.tasks.len();
            tracing::warn!(forced, "Forcing shutdown...");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        tracing::info!("Producer shut down.");
        ShutdownReport {
            publisher_closed,
            forced,
        }
    }
}
