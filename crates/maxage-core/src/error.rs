//! Error types for maxage.

use thiserror::Error;

/// Errors raised while estimating how long a response may be cached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimationError {
    /// Strategy parameters are invalid (bad `rho`, `K = 0`, non-numeric static value).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The selected estimation mode has no algorithm behind it.
    #[error("Estimation strategy '{0}' is not implemented")]
    UnimplementedStrategy(String),

    /// A per-key history lock was poisoned by a panicking writer.
    #[error("History lock poisoned for key '{0}'")]
    LockPoisoned(String),
}

/// Core error type for maxage operations.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings could not be read from file or environment
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Estimation errors
    #[error("Estimation error: {0}")]
    Estimation(#[from] EstimationError),

    /// Address parsing errors
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for maxage operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
