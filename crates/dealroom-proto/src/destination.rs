//! Logical topics and publish destinations.
//!
//! Subscriptions come in two classes. Session-scoped topics
//! ([`Topic::DirectMessages`], [`Topic::Notifications`]) live for the whole
//! connection; conversation-scoped topics exist only while their conversation
//! is active, always as the triple returned by [`Topic::conversation_topics`].

use std::fmt;

use crate::{ConversationId, ProtocolError, Result};

const DIRECT_MESSAGES: &str = "/user/queue/messages";
const NOTIFICATIONS: &str = "/user/queue/notifications";
const CONVERSATION_PREFIX: &str = "/topic/conversation.";
const TYPING_SUFFIX: &str = ".typing";
const READ_SUFFIX: &str = ".read";

/// Subscription topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Per-user direct message delivery.
    DirectMessages,
    /// Per-user notification delivery.
    Notifications,
    /// New messages in one conversation.
    ConversationMessages(ConversationId),
    /// Typing signals in one conversation.
    ConversationTyping(ConversationId),
    /// Read receipts in one conversation.
    ConversationReadReceipts(ConversationId),
}

impl Topic {
    /// The three topics subscribed while `conversation_id` is active.
    pub fn conversation_topics(conversation_id: &ConversationId) -> [Self; 3] {
        [
            Self::ConversationMessages(conversation_id.clone()),
            Self::ConversationTyping(conversation_id.clone()),
            Self::ConversationReadReceipts(conversation_id.clone()),
        ]
    }

    /// Concrete destination string.
    pub fn destination(&self) -> String {
        match self {
            Self::DirectMessages => DIRECT_MESSAGES.to_string(),
            Self::Notifications => NOTIFICATIONS.to_string(),
            Self::ConversationMessages(id) => format!("{CONVERSATION_PREFIX}{id}"),
            Self::ConversationTyping(id) => format!("{CONVERSATION_PREFIX}{id}{TYPING_SUFFIX}"),
            Self::ConversationReadReceipts(id) => format!("{CONVERSATION_PREFIX}{id}{READ_SUFFIX}"),
        }
    }

    /// Parse a destination string.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownDestination` if `destination` matches no topic
    pub fn parse(destination: &str) -> Result<Self> {
        let unknown = || ProtocolError::UnknownDestination(destination.to_string());

        match destination {
            DIRECT_MESSAGES => return Ok(Self::DirectMessages),
            NOTIFICATIONS => return Ok(Self::Notifications),
            _ => {},
        }

        let rest = destination.strip_prefix(CONVERSATION_PREFIX).ok_or_else(unknown)?;
        let conversation = |raw: &str| {
            if raw.is_empty() || raw.contains('.') {
                Err(unknown())
            } else {
                Ok(ConversationId::from(raw))
            }
        };

        if let Some(id) = rest.strip_suffix(TYPING_SUFFIX) {
            conversation(id).map(Self::ConversationTyping)
        } else if let Some(id) = rest.strip_suffix(READ_SUFFIX) {
            conversation(id).map(Self::ConversationReadReceipts)
        } else {
            conversation(rest).map(Self::ConversationMessages)
        }
    }

    /// Owning conversation for conversation-scoped topics.
    pub fn conversation(&self) -> Option<&ConversationId> {
        match self {
            Self::DirectMessages | Self::Notifications => None,
            Self::ConversationMessages(id)
            | Self::ConversationTyping(id)
            | Self::ConversationReadReceipts(id) => Some(id),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.destination())
    }
}

/// Publish destination for client-originated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outbound {
    /// Relay a chat message.
    ChatMessage,
    /// Typing signal.
    Typing,
    /// Read receipt for a conversation.
    MarkRead,
}

impl Outbound {
    /// Concrete destination string.
    pub fn destination(self) -> &'static str {
        match self {
            Self::ChatMessage => "/app/chat.send",
            Self::Typing => "/app/chat.typing",
            Self::MarkRead => "/app/chat.read",
        }
    }
}
