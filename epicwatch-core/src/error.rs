//! Error types for epicwatch-core

use thiserror::Error;

/// Main error type for the epicwatch-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Event stream could not be opened or broke mid-read
    #[error("transport error: {0}")]
    Transport(String),

    /// Full-state fetch failed
    #[error("resync failed: {0}")]
    Resync(String),
}

/// Result type alias for epicwatch-core
pub type Result<T> = std::result::Result<T, Error>;
