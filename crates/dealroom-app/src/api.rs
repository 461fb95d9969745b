//! Request/response API seam.
//!
//! The runtime performs every persistence call through [`ConversationApi`]
//! so tests can substitute an in-memory fake for the HTTP implementation.

use std::future::Future;

use dealroom_proto::{Conversation, ConversationId, Message, SendMessagePayload};
use thiserror::Error;

/// Errors from the request/response API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// No credential is available for the request.
    #[error("not signed in")]
    Unauthenticated,

    /// Server answered with a non-success status.
    #[error("server returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Request never produced a response.
    #[error("request failed: {0}")]
    Transport(String),

    /// Response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Persistence operations the conversation layer consumes.
///
/// Implementations are cheap to clone; the runtime clones one per in-flight
/// call so calls never block the event loop.
pub trait ConversationApi: Clone + Send + Sync + 'static {
    /// Conversations of the signed-in user.
    fn list_conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<Conversation>, ApiError>> + Send;

    /// Persisted messages of a conversation, oldest first.
    fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// Persist a message and return the server record.
    fn send_message(
        &self,
        conversation_id: &ConversationId,
        payload: &SendMessagePayload,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    /// Mark every message of a conversation read for the signed-in user.
    fn mark_read(
        &self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Total unread messages across conversations.
    fn unread_count(&self) -> impl Future<Output = Result<u32, ApiError>> + Send;
}
