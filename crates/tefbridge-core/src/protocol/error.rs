//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the terminal
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TefError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not connected to terminal")]
    NotConnected,

    #[error("a transaction is already in flight")]
    Busy,

    #[error("transaction timeout")]
    Timeout,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("frame too short: {actual} bytes")]
    ShortFrame { actual: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("LRC mismatch: expected {expected:#04x}, received {received:#04x}")]
    ChecksumMismatch { expected: u8, received: u8 },

    #[error("transaction declined ({code}): {message}")]
    Declined { code: String, message: String },

    #[error("connection closed")]
    Closed,
}
