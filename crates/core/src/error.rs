//! Error types for the application layer.

use thiserror::Error;

/// Main error type for the swapframe application layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using the application's Error type.
pub type Result<T> = std::result::Result<T, Error>;
