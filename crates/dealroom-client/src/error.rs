//! Client error types.

use dealroom_core::ConnectionError;
use dealroom_proto::ProtocolError;
use thiserror::Error;

/// Errors returned by [`Client::handle`](crate::Client::handle).
///
/// None of these are fatal to the client; the caller logs them and keeps
/// feeding events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Connection state machine rejected the event
    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),

    /// Outbound frame could not be built
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    /// Operation needs an active conversation
    #[error("no active conversation")]
    NoActiveConversation,
}

impl ClientError {
    /// Returns true if retrying the same event later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(error) => error.is_transient(),
            Self::Protocol(_) | Self::NoActiveConversation => false,
        }
    }
}
