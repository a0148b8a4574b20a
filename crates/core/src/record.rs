//! The health reading published by every simulated device.

use std::ops::{Range, RangeInclusive};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Timestamp layout used on the wire (local time, second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Minute-bucket layout derived from [`TIMESTAMP_FORMAT`].
pub const MINUTE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Synthetic heart rate range, beats per minute.
pub const HEART_RATE_RANGE: RangeInclusive<u32> = 150..=249;

/// Synthetic body temperature range, degrees Celsius (upper bound exclusive).
pub const TEMPERATURE_RANGE: Range<f64> = 37.0..38.0;

/// Synthetic blood oxygen saturation range, percent.
pub const SPO2_RANGE: RangeInclusive<u32> = 70..=99;

/// Prefix shared by every simulated device id.
const DEVICE_ID_PREFIX: &str = "device_";

/// Build the stable identifier for the `n`-th simulated device (1-based).
pub fn device_id(n: usize) -> String {
    format!("{DEVICE_ID_PREFIX}{n}")
}

// ---------------------------------------------------------------------------
// HealthRecord
// ---------------------------------------------------------------------------

/// One vital-sign reading from a simulated device.
///
/// Built fresh on each emission tick and never mutated afterwards. Serialized
/// as JSON with snake_case field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub device_id: String,
    pub heart_rate: u32,
    pub temperature: f64,
    pub spo2: u32,
    /// Local wall-clock time formatted with [`TIMESTAMP_FORMAT`].
    pub timestamp: String,
}

impl HealthRecord {
    /// Whether every vital sign lies inside its synthetic range and the
    /// timestamp parses with [`TIMESTAMP_FORMAT`].
    pub fn is_within_ranges(&self) -> bool {
        HEART_RATE_RANGE.contains(&self.heart_rate)
            && TEMPERATURE_RANGE.contains(&self.temperature)
            && SPO2_RANGE.contains(&self.spo2)
            && chrono::NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).is_ok()
    }

    /// Encode as the JSON payload sent to the broker.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a JSON payload received from the broker.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HealthRecord {
        HealthRecord {
            device_id: "device_1".into(),
            heart_rate: 180,
            temperature: 37.4,
            spo2: 92,
            timestamp: "2024-05-01 12:30:45".into(),
        }
    }

    #[test]
    fn device_ids_are_one_based() {
        assert_eq!(device_id(1), "device_1");
        assert_eq!(device_id(42), "device_42");
    }

    #[test]
    fn json_payload_uses_wire_field_names() {
        let bytes = sample().to_json().expect("serialization should succeed");
        let parsed: serde_json::Value =
            serde_json::from_slice(&bytes).expect("payload should be valid JSON");

        assert_eq!(parsed["device_id"], "device_1");
        assert_eq!(parsed["heart_rate"], 180);
        assert_eq!(parsed["temperature"], 37.4);
        assert_eq!(parsed["spo2"], 92);
        assert_eq!(parsed["timestamp"], "2024-05-01 12:30:45");
    }

    #[test]
    fn from_json_rejects_missing_fields() {
        let err = HealthRecord::from_json(br#"{"device_id":"device_1"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn range_check_accepts_boundaries() {
        let mut record = sample();
        record.heart_rate = 150;
        record.spo2 = 99;
        record.temperature = 37.0;
        assert!(record.is_within_ranges());

        record.heart_rate = 249;
        record.spo2 = 70;
        assert!(record.is_within_ranges());
    }

    #[test]
    fn range_check_rejects_out_of_range_values() {
        let mut record = sample();
        record.temperature = 38.0;
        assert!(!record.is_within_ranges(), "upper temperature bound is exclusive");

        let mut record = sample();
        record.heart_rate = 250;
        assert!(!record.is_within_ranges());

        let mut record = sample();
        record.spo2 = 69;
        assert!(!record.is_within_ranges());

        let mut record = sample();
        record.timestamp = "2024-05-01T12:30:45Z".into();
        assert!(!record.is_within_ranges());
    }
}
