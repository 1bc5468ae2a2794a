/// Engine error types
///
/// Errors surfaced by the protocol engine: framing violations, header
/// mismatches and malformed messages. Socket-level errors never appear here;
/// they belong to the runtime that owns the sockets.
use thiserror::Error;

/// Errors produced by the protocol engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The peer's protocol header did not match ours.
    #[error("bad protocol header")]
    Header,

    /// A frame could not be parsed.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// A well-formed frame arrived that the connection state cannot accept.
    #[error("protocol violation: {0}")]
    Violation(&'static str),

    /// A frame body exceeded the maximum permitted size.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A message envelope could not be decoded.
    #[error("malformed message: {0}")]
    MessageFormat(&'static str),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
