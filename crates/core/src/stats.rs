//! Per-device KPI aggregation over consumed readings.
//!
//! [`VitalsAggregator`] keeps running sums only; individual readings are
//! never retained. Heart rate is additionally averaged per minute bucket
//! (the reading timestamp truncated to `YYYY-MM-DD HH:MM`); only the newest
//! [`MAX_MINUTE_BUCKETS`] buckets per device are kept.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::record::{HealthRecord, MINUTE_FORMAT, TIMESTAMP_FORMAT};

/// Minute buckets retained per device. Older buckets are dropped first.
pub const MAX_MINUTE_BUCKETS: usize = 60;

// ---------------------------------------------------------------------------
// Accumulators
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct Sums {
    count: u64,
    heart_rate: u64,
    spo2: u64,
    temperature: f64,
    /// Minute bucket -> (heart rate sum, count).
    heart_rate_by_minute: BTreeMap<String, (u64, u64)>,
}

/// Average heart rate within one minute bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinuteHeartRate {
    pub minute: String,
    pub avg_heart_rate: f64,
}

/// Summary statistics for a single device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceKpi {
    pub device_id: String,
    pub readings: u64,
    pub avg_heart_rate: f64,
    pub avg_spo2: f64,
    pub avg_temperature: f64,
    /// Ordered by minute. Readings with an unparseable timestamp are
    /// excluded from this series but still counted in the averages.
    pub heart_rate_per_minute: Vec<MinuteHeartRate>,
}

// ---------------------------------------------------------------------------
// VitalsAggregator
// ---------------------------------------------------------------------------

/// Accumulates [`HealthRecord`]s into per-device [`DeviceKpi`]s.
#[derive(Debug, Default)]
pub struct VitalsAggregator {
    devices: BTreeMap<String, Sums>,
}

impl VitalsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one reading into its device's running sums.
    pub fn record(&mut self, reading: &HealthRecord) {
        let sums = self.devices.entry(reading.device_id.clone()).or_default();
        sums.count += 1;
        sums.heart_rate += u64::from(reading.heart_rate);
        sums.spo2 += u64::from(reading.spo2);
        sums.temperature += reading.temperature;

        if let Some(minute) = minute_bucket(&reading.timestamp) {
            let bucket = sums.heart_rate_by_minute.entry(minute).or_insert((0, 0));
            bucket.0 += u64::from(reading.heart_rate);
            bucket.1 += 1;

            // Keys sort chronologically, so the first entry is the oldest.
            while sums.heart_rate_by_minute.len() > MAX_MINUTE_BUCKETS {
                sums.heart_rate_by_minute.pop_first();
            }
        }
    }

    /// Number of distinct devices seen so far.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// KPI for one device, or `None` if it has not reported yet.
    pub fn kpi(&self, device_id: &str) -> Option<DeviceKpi> {
        self.devices
            .get(device_id)
            .map(|sums| build_kpi(device_id, sums))
    }

    /// KPIs for every device, ordered by device id.
    pub fn snapshot(&self) -> Vec<DeviceKpi> {
        self.devices
            .iter()
            .map(|(id, sums)| build_kpi(id, sums))
            .collect()
    }
}

/// Truncate a wire timestamp to its minute, or `None` if it does not parse.
pub fn minute_bucket(timestamp: &str) -> Option<String> {
    chrono::NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|ts| ts.format(MINUTE_FORMAT).to_string())
}

fn build_kpi(device_id: &str, sums: &Sums) -> DeviceKpi {
    let n = sums.count.max(1) as f64;
    DeviceKpi {
        device_id: device_id.to_string(),
        readings: sums.count,
        avg_heart_rate: sums.heart_rate as f64 / n,
        avg_spo2: sums.spo2 as f64 / n,
        avg_temperature: sums.temperature / n,
        heart_rate_per_minute: sums
            .heart_rate_by_minute
            .iter()
            .map(|(minute, (total, count))| MinuteHeartRate {
                minute: minute.clone(),
                avg_heart_rate: *total as f64 / *count as f64,
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
