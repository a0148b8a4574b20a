//! Immutable runtime configuration.
//!
//! Each component receives the config it needs through its constructor;
//! nothing is read from process-wide mutable state after startup. Binaries
//! call `from_env()` once (after `dotenvy::dotenv()`), and every variable
//! falls back to a default suitable for the local three-broker cluster.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:29092,localhost:29093,localhost:29094";
pub const DEFAULT_TOPIC: &str = "health-data-records";
pub const DEFAULT_ACKS: &str = "all";
pub const DEFAULT_LINGER_MS: u64 = 5;
pub const DEFAULT_BATCH_SIZE: u64 = 16_384;
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_EMIT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 2;

pub const DEFAULT_GROUP_ID: &str = "HealthDataConsumer";
pub const DEFAULT_CONSUMER_WORKERS: usize = 3;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_AUTO_OFFSET_RESET: &str = "latest";
pub const DEFAULT_KPI_SUMMARY: bool = false;

// ---------------------------------------------------------------------------
// BrokerConfig
// ---------------------------------------------------------------------------

/// Connection settings shared by the producer and the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Comma-separated `host:port` list.
    pub bootstrap_servers: String,
    pub topic: String,
    /// Producer acknowledgment level. Always `all`: a publish resolves only
    /// once every in-sync replica has the record.
    pub acks: String,
    pub linger_ms: u64,
    pub batch_size: u64,
    /// Upper bound on how long a produce request may stay undelivered.
    pub message_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.into(),
            topic: DEFAULT_TOPIC.into(),
            acks: DEFAULT_ACKS.into(),
            linger_ms: DEFAULT_LINGER_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            message_timeout: Duration::from_millis(DEFAULT_MESSAGE_TIMEOUT_MS),
        }
    }
}

impl BrokerConfig {
    /// Load broker settings from environment variables with defaults.
    ///
    /// | Env Var                    | Default                                          |
    /// |----------------------------|--------------------------------------------------|
    /// | `KAFKA_BOOTSTRAP_SERVERS`  | `localhost:29092,localhost:29093,localhost:29094` |
    /// | `KAFKA_TOPIC`              | `health-data-records`                            |
    /// | `KAFKA_ACKS`               | `all` (`-1` accepted; anything weaker rejected)  |
    /// | `KAFKA_LINGER_MS`          | `5`                                              |
    /// | `KAFKA_BATCH_SIZE`         | `16384`                                          |
    /// | `KAFKA_MESSAGE_TIMEOUT_MS` | `30000`                                          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(env_lookup)
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            bootstrap_servers: string_var(
                &lookup,
                "KAFKA_BOOTSTRAP_SERVERS",
                DEFAULT_BOOTSTRAP_SERVERS,
            )?,
            topic: string_var(&lookup, "KAFKA_TOPIC", DEFAULT_TOPIC)?,
            acks: acks_var(&lookup)?,
            linger_ms: parsed_var(&lookup, "KAFKA_LINGER_MS", "u64", DEFAULT_LINGER_MS)?,
            batch_size: parsed_var(&lookup, "KAFKA_BATCH_SIZE", "u64", DEFAULT_BATCH_SIZE)?,
            message_timeout: Duration::from_millis(positive_var(
                &lookup,
                "KAFKA_MESSAGE_TIMEOUT_MS",
                DEFAULT_MESSAGE_TIMEOUT_MS,
            )?),
        })
    }
}

// ---------------------------------------------------------------------------
// ProducerConfig
// ---------------------------------------------------------------------------

/// Settings for the device simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    pub broker: BrokerConfig,
    /// Period between two readings of the same device.
    pub emit_interval: Duration,
    /// How long shutdown waits for in-flight ticks before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            emit_interval: Duration::from_secs(DEFAULT_EMIT_INTERVAL_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl ProducerConfig {
    /// Load producer settings from environment variables with defaults.
    ///
    /// | Env Var                        | Default |
    /// |--------------------------------|---------|
    /// | `EMIT_INTERVAL_SECS`           | `10`    |
    /// | `PRODUCER_SHUTDOWN_GRACE_SECS` | `2`     |
    ///
    /// plus everything read by [`BrokerConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(env_lookup)
    }

    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            broker: BrokerConfig::from_source(&lookup)?,
            emit_interval: Duration::from_secs(positive_var(
                &lookup,
                "EMIT_INTERVAL_SECS",
                DEFAULT_EMIT_INTERVAL_SECS,
            )?),
            shutdown_grace: Duration::from_secs(parsed_var(
                &lookup,
                "PRODUCER_SHUTDOWN_GRACE_SECS",
                "u64",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )?),
        })
    }
}

// ---------------------------------------------------------------------------
// ConsumerConfig
// ---------------------------------------------------------------------------

/// Settings for the consumer pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub broker: BrokerConfig,
    /// Consumer-group id shared by every worker in the pool.
    pub group_id: String,
    pub worker_count: usize,
    /// Upper bound on a single blocking poll.
    pub poll_timeout: Duration,
    /// Where a group without committed offsets starts (`latest` / `earliest`).
    pub auto_offset_reset: String,
    /// Aggregate per-device KPIs and log them at shutdown.
    pub kpi_summary: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            group_id: DEFAULT_GROUP_ID.into(),
            worker_count: DEFAULT_CONSUMER_WORKERS,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            auto_offset_reset: DEFAULT_AUTO_OFFSET_RESET.into(),
            kpi_summary: DEFAULT_KPI_SUMMARY,
        }
    }
}

impl ConsumerConfig {
    /// Load consumer settings from environment variables with defaults.
    ///
    /// | Env Var                    | Default              |
    /// |----------------------------|----------------------|
    /// | `CONSUMER_GROUP_ID`        | `HealthDataConsumer` |
    /// | `CONSUMER_WORKERS`         | `3`                  |
    /// | `CONSUMER_POLL_TIMEOUT_MS` | `100`                |
    /// | `KAFKA_AUTO_OFFSET_RESET`  | `latest`             |
    /// | `CONSUMER_KPI_SUMMARY`     | `false`              |
    ///
    /// plus everything read by [`BrokerConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(env_lookup)
    }

    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            broker: BrokerConfig::from_source(&lookup)?,
            group_id: string_var(&lookup, "CONSUMER_GROUP_ID", DEFAULT_GROUP_ID)?,
            worker_count: positive_var(&lookup, "CONSUMER_WORKERS", DEFAULT_CONSUMER_WORKERS)?,
            poll_timeout: Duration::from_millis(positive_var(
                &lookup,
                "CONSUMER_POLL_TIMEOUT_MS",
                DEFAULT_POLL_TIMEOUT_MS,
            )?),
            auto_offset_reset: string_var(
                &lookup,
                "KAFKA_AUTO_OFFSET_RESET",
                DEFAULT_AUTO_OFFSET_RESET,
            )?,
            kpi_summary: parsed_var(
                &lookup,
                "CONSUMER_KPI_SUMMARY",
                "bool (true / false)",
                DEFAULT_KPI_SUMMARY,
            )?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

fn string_var<F>(lookup: &F, var: &'static str, default: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default.to_string()),
        Some(value) if value.trim().is_empty() => Err(ConfigError::Empty { var }),
        Some(value) => Ok(value.trim().to_string()),
    }
}

/// Only full-replication acknowledgment is allowed.
fn acks_var<F>(lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = string_var(lookup, "KAFKA_ACKS", DEFAULT_ACKS)?;
    match value.to_ascii_lowercase().as_str() {
        "all" | "-1" => Ok(DEFAULT_ACKS.to_string()),
        _ => Err(ConfigError::InvalidValue {
            var: "KAFKA_ACKS",
            expected: "acknowledgment level `all` (or `-1`)",
            value,
        }),
    }
}

fn parsed_var<F, T>(
    lookup: &F,
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                var,
                expected,
                value,
            }),
    }
}

fn positive_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialEq,
{
    let value = parsed_var(lookup, var, "positive integer", default)?;
    if value == T::default() {
        return Err(ConfigError::Zero { var });
    }
    Ok(value)
}
