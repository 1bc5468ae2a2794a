/// Runtime error types
///
/// Programming errors and I/O failures surfaced by the runtime. Failures
/// *inside* the byte pump never appear here; those are confined to the
/// offending selectable and reported as `disconnected` events.
use std::io;
use thiserror::Error;

/// Main error type for runtime operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error while setting up sockets or polling.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// An address string did not match the URL grammar.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A connection was requested without any address to connect to.
    #[error("one of url, urls or address is required")]
    MissingAddress,
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
