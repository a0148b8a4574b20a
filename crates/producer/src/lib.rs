//! `vitalsim-producer` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod cli;
pub mod error;
pub mod scheduler;
pub mod simulator;

pub use error::ProducerError;
pub use simulator::{DeviceSimulator, ShutdownReport};
