use vitalsim_broker::BrokerError;
use vitalsim_core::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Missing device count argument (usage: vitalsim-producer <num_devices>)")]
    MissingDeviceCount,

    #[error("Device count must be a positive integer, got {0:?}")]
    InvalidDeviceCount(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to serialize reading: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
