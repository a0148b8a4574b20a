//! Destinations for records received by consumer workers.
//!
//! Workers hand every record to a shared [`RecordSink`]. The binary wires
//! [`Fanout::console`]: always a [`PrintSink`] (one stdout line per record),
//! plus a [`KpiSink`] (per-device vitals summary logged at shutdown) when
//! `CONSUMER_KPI_SUMMARY` is enabled.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use vitalsim_broker::ConsumedRecord;
use vitalsim_core::{DeviceKpi, HealthRecord, VitalsAggregator};

/// Receives every record a worker polls. Called from many workers at once.
pub trait RecordSink: Send + Sync {
    fn accept(&self, worker_id: usize, record: &ConsumedRecord);
}

// ---------------------------------------------------------------------------
// PrintSink
// ---------------------------------------------------------------------------

/// Writes `<worker_id>: {partition=.., offset=.., key=.., value=..}` to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintSink;

impl RecordSink for PrintSink {
    fn accept(&self, worker_id: usize, record: &ConsumedRecord) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{worker_id}: {record}") {
            tracing::warn!(worker_id, error = %e, "Failed to write record to stdout");
        }
    }
}

// ---------------------------------------------------------------------------
// KpiSink
// ---------------------------------------------------------------------------

/// Decodes record values as [`HealthRecord`]s and aggregates per-device KPIs.
#[derive(Debug, Default)]
pub struct KpiSink {
    aggregator: Mutex<VitalsAggregator>,
    undecodable: AtomicU64,
}

impl KpiSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current KPIs for every device seen so far.
    pub fn snapshot(&self) -> Vec<DeviceKpi> {
        self.aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Records whose value was missing or not a valid health reading.
    pub fn undecodable(&self) -> u64 {
        self.undecodable.load(Ordering::Relaxed)
    }

    /// Log one summary line per device.
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            devices = snapshot.len(),
            undecodable = self.undecodable(),
            "Vitals summary",
        );
        for kpi in snapshot {
            tracing::info!(
                device_id = %kpi.device_id,
                readings = kpi.readings,
                avg_heart_rate = format_args!("{:.1}", kpi.avg_heart_rate),
                avg_spo2 = format_args!("{:.1}", kpi.avg_spo2),
                avg_temperature = format_args!("{:.2}", kpi.avg_temperature),
                minutes = kpi.heart_rate_per_minute.len(),
                "Device KPI",
            );
        }
    }
}

impl RecordSink for KpiSink {
    fn accept(&self, worker_id: usize, record: &ConsumedRecord) {
        let decoded = record
            .value
            .as_deref()
            .map(|value| HealthRecord::from_json(value.as_bytes()));

        match decoded {
            Some(Ok(reading)) => self
                .aggregator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(&reading),
            Some(Err(e)) => {
                self.undecodable.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    worker_id,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Record value is not a health reading",
                );
            }
            None => {
                self.undecodable.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fanout
// ---------------------------------------------------------------------------

/// Forwards each record to every inner sink, in order.
#[derive(Default, Clone)]
pub struct Fanout(pub Vec<Arc<dyn RecordSink>>);

impl Fanout {
    /// Stdout printing, followed by `kpi` when given.
    pub fn console(kpi: Option<Arc<KpiSink>>) -> Self {
        let mut sinks: Vec<Arc<dyn RecordSink>> = vec![Arc::new(PrintSink)];
        if let Some(kpi) = kpi {
            sinks.push(kpi);
        }
        Self(sinks)
    }
}

impl RecordSink for Fanout {
    fn accept(&self, worker_id: usize, record: &ConsumedRecord) {
        for sink in &self.0 {
            sink.accept(worker_id, record);
        }
    }
}
