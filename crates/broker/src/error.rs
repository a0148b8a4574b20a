/// Errors surfaced by broker clients.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The client could not be created (bad config, unresolvable brokers).
    #[error("Failed to create broker client: {0}")]
    Connect(String),

    /// The broker rejected the record or it could not be delivered in time.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Flushing buffered records on close failed or timed out.
    #[error("Flush failed: {0}")]
    Flush(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Poll failed: {0}")]
    Poll(String),

    #[error("Poll called before subscribe")]
    NotSubscribed,

    #[error("Client is closed")]
    Closed,
}
