//! Synthetic vital-sign generation.
//!
//! Every field is drawn independently from a uniform distribution. There is
//! no seeding contract: callers may only rely on the value ranges, never on
//! exact values.

use chrono::Local;
use rand::Rng;

use crate::record::{
    HealthRecord, HEART_RATE_RANGE, SPO2_RANGE, TEMPERATURE_RANGE, TIMESTAMP_FORMAT,
};

/// Generates one [`HealthRecord`] per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadingGenerator;

impl ReadingGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate a reading for `device_id` using the thread-local RNG and the
    /// current local wall-clock time.
    pub fn generate(&self, device_id: &str) -> HealthRecord {
        let timestamp = current_timestamp();
        self.generate_with(&mut rand::rng(), device_id, timestamp)
    }

    /// Generate a reading from an explicit RNG and timestamp.
    pub fn generate_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        device_id: &str,
        timestamp: String,
    ) -> HealthRecord {
        HealthRecord {
            device_id: device_id.to_string(),
            heart_rate: rng.random_range(HEART_RATE_RANGE),
            temperature: rng.random_range(TEMPERATURE_RANGE),
            spo2: rng.random_range(SPO2_RANGE),
            timestamp,
        }
    }
}

/// Current local time formatted as `YYYY-MM-DD HH:MM:SS`.
pub fn current_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}
