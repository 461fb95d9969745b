//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding frames and bodies.
///
/// All variants are structural: they describe a malformed frame or body, never
/// a transport failure. Callers on the inbound path log and drop the offending
/// frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame exceeds [`crate::Frame::MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual size in bytes
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Command line is not a known STOMP command.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// Header line without a `:` separator.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// Header contains an escape sequence STOMP 1.2 does not define.
    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),

    /// Command or header bytes are not valid UTF-8.
    #[error("frame head is not valid UTF-8")]
    InvalidUtf8,

    /// Frame ended before the header block or NUL terminator.
    #[error("frame is truncated: {0}")]
    Truncated(&'static str),

    /// `content-length` header is not a decimal integer.
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    /// Non-EOL bytes follow the NUL terminator.
    #[error("{0} unexpected bytes after frame terminator")]
    TrailingData(usize),

    /// Body could not be converted to or from JSON.
    #[error("json body: {0}")]
    Json(String),

    /// Destination string does not map to a known topic.
    #[error("unknown destination: {0:?}")]
    UnknownDestination(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
