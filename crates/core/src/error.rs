/// Errors raised while loading configuration from the environment.
///
/// Configuration problems are startup errors: binaries log them and exit.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got {value:?}")]
    InvalidValue {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{var} must not be empty")]
    Empty { var: &'static str },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}
