//! Command-line parsing for the device simulator.
//!
//! The only argument is the positional device count. Anything else is a
//! fatal startup error reported before a broker client is created.

use crate::error::ProducerError;

/// Parse the device count from the process arguments (program name
/// already skipped). Extra arguments are ignored.
pub fn parse_device_count<I>(args: I) -> Result<usize, ProducerError>
where
    I: IntoIterator<Item = String>,
{
    let raw = args
        .into_iter()
        .next()
        .ok_or(ProducerError::MissingDeviceCount)?;

    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(ProducerError::InvalidDeviceCount(raw)),
        Ok(n) => Ok(n),
    }
}
