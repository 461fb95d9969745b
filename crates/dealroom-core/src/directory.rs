//! Conversation list with preview and unread accounting.

use std::collections::{HashMap, VecDeque};

use dealroom_proto::{Conversation, ConversationId, Message, MessageId, UserId};

/// Message ids remembered per conversation for duplicate suppression.
const APPLIED_WINDOW: usize = 64;

/// List-level aggregate kept in sync by NEW_MESSAGE events.
///
/// Ordered by most recent activity first. Unread counts only grow for
/// messages whose sender is not the local user; an explicit mark-read resets
/// them.
#[derive(Debug, Clone)]
pub struct ConversationDirectory {
    local_user: UserId,
    conversations: Vec<Conversation>,
    /// Recently applied message ids per conversation, so a message delivered
    /// on several topics counts once.
    applied: HashMap<ConversationId, VecDeque<MessageId>>,
    loaded: bool,
    reported_unread: Option<u32>,
}

impl ConversationDirectory {
    /// Empty directory viewed by `local_user`.
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            conversations: Vec::new(),
            applied: HashMap::new(),
            loaded: false,
            reported_unread: None,
        }
    }

    /// Replace the whole list, most recent activity first.
    pub fn replace(&mut self, mut conversations: Vec<Conversation>) {
        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        self.applied.retain(|id, _| conversations.iter().any(|c| &c.id == id));
        self.conversations = conversations;
        self.loaded = true;
    }

    /// Record the server's total unread figure.
    pub fn set_unread_total(&mut self, total: u32) {
        self.reported_unread = Some(total);
    }

    /// Total unread messages.
    ///
    /// The server figure until the list has been loaded, the sum of the
    /// entries afterwards.
    pub fn unread_total(&self) -> u32 {
        if self.loaded {
            self.conversations.iter().map(|c| c.unread_count).sum()
        } else {
            self.reported_unread.unwrap_or(0)
        }
    }

    /// Apply a NEW_MESSAGE event. Returns whether the directory changed.
    ///
    /// Bumps the unread count for messages from other participants. Preview
    /// and time only follow a message at least as new as the current one,
    /// which also moves the conversation to the front. Ids seen recently and
    /// messages for unknown conversations are ignored.
    pub fn apply_new_message(&mut self, message: &Message) -> bool {
        let Some(index) = self.index_of(&message.conversation_id) else {
            tracing::debug!(
                conversation_id = %message.conversation_id,
                "message for unknown conversation ignored by directory"
            );
            return false;
        };

        let applied = self.applied.entry(message.conversation_id.clone()).or_default();
        if applied.contains(&message.id) {
            return false;
        }
        if applied.len() == APPLIED_WINDOW {
            applied.pop_front();
        }
        applied.push_back(message.id.clone());

        let conversation = &mut self.conversations[index];
        let newest = conversation.last_message_at.is_none_or(|latest| message.created_at >= latest);
        if newest {
            conversation.last_message_preview = Some(message.content.clone());
            conversation.last_message_at = Some(message.created_at);
        }
        if message.sender_id != self.local_user {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }

        if newest {
            let conversation = self.conversations.remove(index);
            self.conversations.insert(0, conversation);
        }

        true
    }

    /// Reset the unread count of one conversation. Returns whether it
    /// changed.
    pub fn mark_read(&mut self, conversation_id: &ConversationId) -> bool {
        match self.index_of(conversation_id) {
            Some(index) if self.conversations[index].unread_count > 0 => {
                self.conversations[index].unread_count = 0;
                true
            },
            _ => false,
        }
    }

    /// Entry for `conversation_id`.
    pub fn get(&self, conversation_id: &ConversationId) -> Option<&Conversation> {
        self.index_of(conversation_id).map(|index| &self.conversations[index])
    }

    /// Entries, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter()
    }

    /// Number of conversations.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn index_of(&self, conversation_id: &ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| &c.id == conversation_id)
    }
}
