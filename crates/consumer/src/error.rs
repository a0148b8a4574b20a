use vitalsim_broker::BrokerError;
use vitalsim_core::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to create consumer {worker_id}: {source}")]
    CreateWorker {
        worker_id: usize,
        #[source]
        source: BrokerError,
    },
}
