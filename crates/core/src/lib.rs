//! Shared domain types for the vital-signs simulator.
//!
//! - [`record`]: the [`HealthRecord`](record::HealthRecord) wire entity and
//!   device naming.
//! - [`reading`]: synthetic reading generation.
//! - [`config`]: immutable broker / producer / consumer configuration.
//! - [`stats`]: per-device KPI aggregation over consumed readings.
//! - [`shutdown`]: SIGINT / SIGTERM trigger for graceful shutdown.

pub mod config;
pub mod error;
pub mod reading;
pub mod record;
pub mod shutdown;
pub mod stats;

pub use config::{BrokerConfig, ConsumerConfig, ProducerConfig};
pub use error::ConfigError;
pub use reading::ReadingGenerator;
pub use record::{device_id, HealthRecord};
pub use stats::{DeviceKpi, VitalsAggregator};
