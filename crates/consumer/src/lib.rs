//! `vitalsim-consumer` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod error;
pub mod pool;
pub mod sink;
pub mod worker;

pub use error::ConsumerError;
pub use pool::{ConsumerPool, PoolShutdownReport};
pub use sink::{Fanout, KpiSink, PrintSink, RecordSink};
pub use worker::{ConsumerWorker, PollOutcome, WorkerHandle, WorkerStatus};
