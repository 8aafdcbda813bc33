//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid contract address: {0}")]
    InvalidAddress(String),

    #[error("invalid total supply: {0}")]
    InvalidTotalSupply(String),

    #[error("invalid {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
