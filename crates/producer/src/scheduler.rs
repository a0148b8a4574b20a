//! Per-device emission loop.
//!
//! Each simulated device runs [`run_device`] as its own task: on every tick
//! it generates a reading and publishes it, waiting for the broker's
//! acknowledgment before logging the outcome. A failed send is logged and
//! dropped; the next tick fires as scheduled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vitalsim_broker::{DeliveryReport, RecordPublisher};
use vitalsim_core::{HealthRecord, ReadingGenerator};

use crate::error::ProducerError;

/// Everything one device task needs besides the shared publisher.
#[derive(Debug, Clone)]
pub struct DeviceTask {
    pub device_id: String,
    pub topic: String,
    pub interval: Duration,
    pub generator: ReadingGenerator,
}

/// Run the emission loop for one device until `cancel` fires.
///
/// The first reading is emitted immediately, then once per `interval`.
/// If a send overruns the interval, missed ticks are fired back-to-back
/// so the long-run rate stays fixed.
pub async fn run_device(
    task: DeviceTask,
    publisher: Arc<dyn RecordPublisher>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(task.interval);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(device_id = %task.device_id, "Device task stopped");
                break;
            }
            _ = ticker.tick() => {
                emit_once(&task, publisher.as_ref()).await;
            }
        }
    }
}

/// Generate and publish one reading, logging the outcome.
pub async fn emit_once(task: &DeviceTask, publisher: &dyn RecordPublisher) {
    let reading = task.generator.generate(&task.device_id);

    match publish_reading(publisher, &task.topic, &reading).await {
        Ok((report, value)) => {
            tracing::info!(
                device_id = %reading.device_id,
                "Sent message: record(key={}, value={}) metadata(topic={}, partition={}, offset={})",
                reading.device_id,
                value,
                report.topic,
                report.partition,
                report.offset,
            );
        }
        Err(e) => {
            tracing::error!(
                device_id = %reading.device_id,
                error = %e,
                detail = ?e,
                "Failed to publish reading",
            );
        }
    }
}

/// Serialize `reading` and publish it keyed by its device id.
///
/// Returns the delivery report together with the JSON value that was sent.
pub async fn publish_reading(
    publisher: &dyn RecordPublisher,
    topic: &str,
    reading: &HealthRecord,
) -> Result<(DeliveryReport, String), ProducerError> {
    let value = serde_json::to_string(reading)?;
    let report = publisher
        .publish(topic, &reading.device_id, value.as_bytes())
        .await?;
    Ok((report, value))
}
