//! Inbound real-time events.

use serde::{Deserialize, Serialize};

use crate::{ConversationId, Message, ReadReceipt, TypingIndicator};

/// Event kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A message was posted.
    NewMessage,
    /// A participant started or stopped typing.
    Typing,
    /// A participant read a conversation.
    ReadReceipt,
}

/// Closed set of inbound events.
///
/// Session-scoped topics carry the tagged envelope form
/// (`{"type": "NEW_MESSAGE", "payload": {...}}`); conversation-scoped topics
/// carry the bare payload and the kind is implied by the topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundEvent {
    /// A message was posted.
    NewMessage(Message),
    /// A participant started or stopped typing.
    Typing(TypingIndicator),
    /// A participant read a conversation.
    ReadReceipt(ReadReceipt),
}

impl InboundEvent {
    /// Kind tag.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::Typing(_) => EventKind::Typing,
            Self::ReadReceipt(_) => EventKind::ReadReceipt,
        }
    }

    /// Conversation the event belongs to.
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::NewMessage(message) => &message.conversation_id,
            Self::Typing(indicator) => &indicator.conversation_id,
            Self::ReadReceipt(receipt) => &receipt.conversation_id,
        }
    }
}
