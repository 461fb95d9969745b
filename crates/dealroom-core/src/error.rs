//! Error types for the conversation core.
//!
//! Connection errors cover handshake and lifecycle problems; session errors
//! cover message-list operations that reference state the session does not
//! have. Neither is fatal: the client converts both into log records and
//! state degradation.

use std::time::Duration;

use dealroom_proto::{Command, MessageId, ProtocolError};
use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors from the connection state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation not valid in the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Frame kind not valid in the current state
    #[error("unexpected frame: received {command} in state {state:?}")]
    UnexpectedFrame {
        /// Current state when frame was received
        state: ConnectionState,
        /// Command of the unexpected frame
        command: Command,
    },

    /// Server answered the handshake with ERROR
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// Handshake did not complete within timeout
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Nothing received for twice the negotiated incoming heartbeat
    #[error("heartbeat lost after {elapsed:?}")]
    HeartbeatLost {
        /// Silence observed
        elapsed: Duration,
    },

    /// Publish attempted without a live connection
    #[error("not connected")]
    NotConnected,

    /// Frame could not be built or parsed
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ConnectionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Timeouts, lost heartbeats and server rejections are retried by the
    /// backoff policy. Local misuse and codec failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. }
                | Self::HeartbeatLost { .. }
                | Self::Rejected(_)
                | Self::NotConnected
        )
    }
}

/// Errors from a conversation session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No optimistic entry with this temporary id
    #[error("no pending message {0}")]
    UnknownPending(MessageId),

    /// Message belongs to a different conversation
    #[error("message {message} belongs to another conversation")]
    WrongConversation {
        /// Offending message
        message: MessageId,
    },
}
