//! JSON bodies shared by frames and the request/response API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConversationId, MessageId, UserId};

/// Delivery status of a message.
///
/// Ordered `Sent < Delivered < Read`. A status only ever moves forward; use
/// [`MessageStatus::advance`] rather than assigning.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// Accepted by the sender side.
    #[default]
    Sent,
    /// Delivered to the recipient.
    Delivered,
    /// Read by the recipient.
    Read,
}

impl MessageStatus {
    /// The later of `self` and `observed`.
    #[must_use]
    pub fn advance(self, observed: Self) -> Self {
        self.max(observed)
    }
}

/// Kind of message content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// Image attachment reference.
    Image,
    /// File attachment reference.
    File,
    /// Sponsorship offer or counter-offer.
    Offer,
    /// System-generated notice.
    System,
    /// Kind this client does not know.
    #[serde(other)]
    Other,
}

/// A chat message.
///
/// Immutable once server-confirmed, except for `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-issued or temporary id.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender_id: UserId,
    /// Message body.
    pub content: String,
    /// Content kind.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Delivery status.
    #[serde(default)]
    pub status: MessageStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    /// Open negotiation.
    #[default]
    Active,
    /// Hidden from the default list.
    Archived,
    /// Negotiation finished.
    Closed,
    /// Status this client does not know.
    #[serde(other)]
    Other,
}

/// Directory entry for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id.
    pub id: ConversationId,
    /// The other participant.
    pub participant_id: UserId,
    /// Display name of the other participant.
    pub participant_name: String,
    /// Preview of the latest message. `None` for an empty conversation.
    #[serde(default)]
    pub last_message_preview: Option<String>,
    /// Time of the latest message. `None` for an empty conversation.
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Messages from the other participant not yet marked read.
    #[serde(default)]
    pub unread_count: u32,
    /// Lifecycle status.
    #[serde(default)]
    pub status: ConversationStatus,
}

/// Typing signal for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    /// Conversation being typed in.
    pub conversation_id: ConversationId,
    /// Who is typing.
    pub user_id: UserId,
    /// `true` while typing, `false` once stopped.
    pub typing: bool,
}

/// Read receipt published when a participant reads a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    /// Conversation that was read.
    pub conversation_id: ConversationId,
    /// Who read it.
    pub reader_id: UserId,
    /// When it was read.
    pub read_at: DateTime<Utc>,
}

/// Body of a send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    /// Message body.
    pub content: String,
    /// Content kind.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

impl SendMessagePayload {
    /// Plain text payload.
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), kind: MessageKind::Text }
    }
}

/// Outbound typing signal body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    /// Conversation being typed in.
    pub conversation_id: ConversationId,
    /// `true` while typing.
    pub typing: bool,
}

/// Outbound mark-read body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    /// Conversation that was read.
    pub conversation_id: ConversationId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_regresses() {
        assert_eq!(MessageStatus::Read.advance(MessageStatus::Sent), MessageStatus::Read);
        assert_eq!(MessageStatus::Sent.advance(MessageStatus::Delivered), MessageStatus::Delivered);
    }

    #[test]
    fn message_decodes_server_shape() {
        let json = r#"{
            "id": 101,
            "conversationId": 7,
            "senderId": 3,
            "content": "Rate card attached",
            "type": "OFFER",
            "status": "DELIVERED",
            "createdAt": "2024-03-01T09:30:00Z"
        }"#;

        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.id, MessageId::from(101_u64));
        assert_eq!(message.conversation_id.as_str(), "7");
        assert_eq!(message.kind, MessageKind::Offer);
        assert_eq!(message.status, MessageStatus::Delivered);
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let json = r#"{
            "id": "a",
            "conversationId": "c",
            "senderId": "u",
            "content": "hi",
            "createdAt": "2024-03-01T09:30:00Z"
        }"#;

        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.status, MessageStatus::Sent);
    }

    #[test]
    fn unknown_kinds_are_tolerated() {
        let kind: MessageKind = serde_json::from_str("\"VOICE_NOTE\"").unwrap();
        assert_eq!(kind, MessageKind::Other);
    }

    #[test]
    fn conversation_decodes_without_preview() {
        let json = r#"{"id": 1, "participantId": 2, "participantName": "Acme"}"#;
        let conversation: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conversation.unread_count, 0);
        assert!(conversation.last_message_preview.is_none());
        assert_eq!(conversation.status, ConversationStatus::Active);
    }
}
