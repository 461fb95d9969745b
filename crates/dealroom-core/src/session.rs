//! Per-conversation chat state.
//!
//! A [`ChatSession`] holds the ordered message list of the active
//! conversation and reconciles three sources of messages: the persisted
//! history, optimistic local sends and real-time deliveries. Ids are compared
//! in their normalized string form, so a server id that arrives as a JSON
//! number matches the same id seen as a string.
//!
//! # Optimistic lifecycle
//!
//! ```text
//! send()          confirm_send()                fail_send()
//!   │                   │                            │
//!   ↓                   ↓                            ↓
//! tmp-… (SENT) ──> replaced in place by the   entry kept unchanged,
//!                  server record               still SENT
//! ```

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use dealroom_proto::{
    ConversationId, Message, MessageId, MessageStatus, ReadReceipt, SendMessagePayload, UserId,
};

use crate::error::SessionError;

/// Progress of the one-per-activation history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    /// Not requested yet
    NotLoaded,
    /// Request in flight
    Loading,
    /// History merged into the list
    Loaded,
    /// Request failed; not retried for this activation
    Failed,
}

/// Message list and reconciliation for one active conversation.
///
/// # Invariants
///
/// - No two entries share an id
/// - Every entry belongs to this conversation
/// - An entry's status never moves backwards
#[derive(Debug, Clone)]
pub struct ChatSession {
    conversation_id: ConversationId,
    local_user: UserId,
    messages: Vec<Message>,
    history: HistoryState,
}

impl ChatSession {
    /// Empty session for `conversation_id`, viewed by `local_user`.
    pub fn new(conversation_id: ConversationId, local_user: UserId) -> Self {
        Self { conversation_id, local_user, messages: Vec::new(), history: HistoryState::NotLoaded }
    }

    /// Conversation this session belongs to.
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// History fetch progress.
    pub fn history_state(&self) -> HistoryState {
        self.history
    }

    /// Claim the history fetch. `true` exactly once per session.
    pub fn begin_history_load(&mut self) -> bool {
        if self.history != HistoryState::NotLoaded {
            return false;
        }
        self.history = HistoryState::Loading;
        true
    }

    /// Merge the fetched history.
    ///
    /// History goes first in server order; entries already in the list that
    /// the history does not contain (optimistic sends, deliveries that raced
    /// the fetch) follow in their existing order.
    pub fn history_loaded(&mut self, history: Vec<Message>) {
        let local = std::mem::take(&mut self.messages);
        self.merge_incoming(history);

        for message in local {
            match self.position(&message.id) {
                Some(index) => self.advance(index, message.status),
                None => self.messages.push(message),
            }
        }

        self.history = HistoryState::Loaded;
        tracing::debug!(
            conversation_id = %self.conversation_id,
            count = self.messages.len(),
            "history loaded"
        );
    }

    /// Record a failed fetch. The list keeps whatever it already holds.
    pub fn history_failed(&mut self) {
        self.history = HistoryState::Failed;
    }

    /// Append an optimistic message with a temporary id.
    ///
    /// `nonce` must be unique per session; `created_at` is the local wall
    /// clock.
    pub fn send(
        &mut self,
        payload: SendMessagePayload,
        nonce: u64,
        created_at: DateTime<Utc>,
    ) -> Message {
        let message = Message {
            id: MessageId::temporary(nonce),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.local_user.clone(),
            content: payload.content,
            kind: payload.kind,
            status: MessageStatus::Sent,
            created_at,
        };

        self.messages.push(message.clone());
        message
    }

    /// Replace the optimistic entry `temp_id` with the server record, in
    /// place.
    ///
    /// If the real-time echo of the same message already arrived, that
    /// duplicate is removed and its status folded into the replacement.
    ///
    /// # Errors
    ///
    /// - `SessionError::UnknownPending` if `temp_id` is not in the list
    /// - `SessionError::WrongConversation` if `confirmed` belongs elsewhere
    pub fn confirm_send(
        &mut self,
        temp_id: &MessageId,
        mut confirmed: Message,
    ) -> Result<(), SessionError> {
        if confirmed.conversation_id != self.conversation_id {
            return Err(SessionError::WrongConversation { message: confirmed.id });
        }

        let Some(mut index) = self.position(temp_id) else {
            return Err(SessionError::UnknownPending(temp_id.clone()));
        };

        if let Some(echo) = self.position(&confirmed.id).filter(|&echo| echo != index) {
            let duplicate = self.messages.remove(echo);
            confirmed.status = confirmed.status.advance(duplicate.status);
            if echo < index {
                index -= 1;
            }
        }

        let pending = &mut self.messages[index];
        confirmed.status = confirmed.status.advance(pending.status);
        *pending = confirmed;
        Ok(())
    }

    /// Record a failed persistence. The entry stays as it is.
    ///
    /// # Errors
    ///
    /// - `SessionError::UnknownPending` if `temp_id` is not in the list
    pub fn fail_send(&self, temp_id: &MessageId) -> Result<(), SessionError> {
        match self.position(temp_id) {
            Some(_) => Ok(()),
            None => Err(SessionError::UnknownPending(temp_id.clone())),
        }
    }

    /// Append messages not already present, preserving arrival order.
    ///
    /// A known id only advances that entry's status. Returns how many entries
    /// were appended.
    pub fn merge_incoming(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        let mut appended = 0;

        for message in messages {
            if message.conversation_id != self.conversation_id {
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    message_id = %message.id,
                    "message for another conversation ignored"
                );
                continue;
            }

            match self.position(&message.id) {
                Some(index) => self.advance(index, message.status),
                None => {
                    self.messages.push(message);
                    appended += 1;
                },
            }
        }

        appended
    }

    /// Apply a remote read receipt.
    ///
    /// Advances the local user's messages created at or before `read_at` to
    /// READ. Receipts from the local user are ignored. Returns how many
    /// entries changed.
    pub fn apply_read_receipt(&mut self, receipt: &ReadReceipt) -> usize {
        if receipt.conversation_id != self.conversation_id || receipt.reader_id == self.local_user {
            return 0;
        }

        let mut changed = 0;
        for message in &mut self.messages {
            if message.sender_id == self.local_user
                && message.created_at <= receipt.read_at
                && message.status < MessageStatus::Read
            {
                message.status = MessageStatus::Read;
                changed += 1;
            }
        }
        changed
    }

    /// Optimistic entries still awaiting confirmation.
    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|message| message.id.is_temporary())
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|message| message.id.as_str() == id.as_str())
    }

    fn advance(&mut self, index: usize, observed: MessageStatus) {
        let entry = &mut self.messages[index];
        entry.status = entry.status.advance(observed);
    }
}

/// Messages sharing one local calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayGroup {
    /// Calendar day in the viewer's offset
    pub day: NaiveDate,
    /// Messages of that day, in list order
    pub messages: Vec<Message>,
}

/// Bucket messages by the calendar day of `created_at` at `offset`.
///
/// Consecutive messages on the same day share a group; list order is kept.
pub fn group_by_day(messages: &[Message], offset: FixedOffset) -> Vec<DayGroup> {
    let mut groups: Vec<DayGroup> = Vec::new();

    for message in messages {
        let day = message.created_at.with_timezone(&offset).date_naive();
        match groups.last_mut() {
            Some(group) if group.day == day => group.messages.push(message.clone()),
            _ => groups.push(DayGroup { day, messages: vec![message.clone()] }),
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use dealroom_proto::MessageKind;

    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
    }

    fn message(id: u64, sender: u64, created_at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::from(id),
            conversation_id: ConversationId::from(7_u64),
            sender_id: UserId::from(sender),
            content: format!("message {id}"),
            kind: MessageKind::Text,
            status: MessageStatus::Sent,
            created_at,
        }
    }

    fn session() -> ChatSession {
        ChatSession::new(ConversationId::from(7_u64), UserId::from(1_u64))
    }

    fn ids(session: &ChatSession) -> Vec<&str> {
        session.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn history_is_claimed_once() {
        let mut session = session();
        assert!(session.begin_history_load());
        assert!(!session.begin_history_load());

        session.history_failed();
        assert!(!session.begin_history_load());
        assert_eq!(session.history_state(), HistoryState::Failed);
    }

    #[test]
    fn optimistic_send_is_replaced_in_place() {
        let mut session = session();
        session.merge_incoming([message(10, 2, at(9, 0))]);

        let pending = session.send(SendMessagePayload::text("offer"), 1, at(9, 1));
        session.merge_incoming([message(11, 2, at(9, 2))]);
        assert_eq!(session.messages().len(), 3);
        assert!(pending.id.is_temporary());

        let mut confirmed = message(12, 1, at(9, 1));
        confirmed.content = "offer".into();
        session.confirm_send(&pending.id, confirmed).unwrap();

        assert_eq!(ids(&session), vec!["10", "12", "11"]);
        assert_eq!(session.pending().count(), 0);
    }

    #[test]
    fn confirmation_absorbs_an_earlier_echo() {
        let mut session = session();
        let pending = session.send(SendMessagePayload::text("hello"), 1, at(9, 0));

        let mut echo = message(12, 1, at(9, 0));
        echo.status = MessageStatus::Delivered;
        session.merge_incoming([echo]);
        assert_eq!(session.messages().len(), 2);

        session.confirm_send(&pending.id, message(12, 1, at(9, 0))).unwrap();
        assert_eq!(ids(&session), vec!["12"]);
        assert_eq!(session.messages()[0].status, MessageStatus::Delivered);
    }

    #[test]
    fn failed_send_keeps_entry_unchanged() {
        let mut session = session();
        let pending = session.send(SendMessagePayload::text("hello"), 1, at(9, 0));

        session.fail_send(&pending.id).unwrap();
        assert_eq!(session.messages(), &[pending]);
        assert_eq!(
            session.fail_send(&MessageId::temporary(99)),
            Err(SessionError::UnknownPending(MessageId::temporary(99)))
        );
    }

    #[test]
    fn merge_dedupes_by_normalized_id() {
        let mut session = session();
        assert_eq!(session.merge_incoming([message(5, 2, at(9, 0))]), 1);

        let mut same = message(5, 2, at(9, 0));
        same.id = MessageId::from("5");
        same.status = MessageStatus::Read;
        same.content = "edited".into();
        assert_eq!(session.merge_incoming([same]), 0);

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].status, MessageStatus::Read);
        assert_eq!(session.messages()[0].content, "message 5");

        let mut older = message(5, 2, at(9, 0));
        older.status = MessageStatus::Delivered;
        session.merge_incoming([older]);
        assert_eq!(session.messages()[0].status, MessageStatus::Read);
    }

    #[test]
    fn history_precedes_local_entries() {
        let mut session = session();
        session.begin_history_load();
        let pending = session.send(SendMessagePayload::text("early"), 1, at(9, 5));
        session.merge_incoming([message(3, 2, at(9, 3))]);

        session.history_loaded(vec![
            message(1, 2, at(9, 0)),
            message(2, 1, at(9, 1)),
            message(3, 2, at(9, 3)),
        ]);

        assert_eq!(ids(&session), vec!["1", "2", "3", pending.id.as_str()]);
        assert_eq!(session.history_state(), HistoryState::Loaded);
    }

    #[test]
    fn read_receipt_marks_own_messages_up_to_read_at() {
        let mut session = session();
        session.merge_incoming([
            message(1, 1, at(9, 0)),
            message(2, 2, at(9, 1)),
            message(3, 1, at(9, 5)),
        ]);

        let receipt = ReadReceipt {
            conversation_id: ConversationId::from(7_u64),
            reader_id: UserId::from(2_u64),
            read_at: at(9, 2),
        };
        assert_eq!(session.apply_read_receipt(&receipt), 1);

        let statuses: Vec<MessageStatus> = session.messages().iter().map(|m| m.status).collect();
        assert_eq!(statuses, vec![MessageStatus::Read, MessageStatus::Sent, MessageStatus::Sent]);

        let own = ReadReceipt { reader_id: UserId::from(1_u64), ..receipt };
        assert_eq!(session.apply_read_receipt(&own), 0);
    }

    #[test]
    fn foreign_messages_are_ignored() {
        let mut session = session();
        let mut foreign = message(1, 2, at(9, 0));
        foreign.conversation_id = ConversationId::from(8_u64);

        assert_eq!(session.merge_incoming([foreign.clone()]), 0);
        let pending = session.send(SendMessagePayload::text("x"), 1, at(9, 0));
        assert!(matches!(
            session.confirm_send(&pending.id, foreign),
            Err(SessionError::WrongConversation { .. })
        ));
    }

    #[test]
    fn grouping_uses_viewer_offset() {
        let messages =
            vec![message(1, 2, at(22, 30)), message(2, 2, at(23, 30)), message(3, 2, at(23, 45))];

        let utc = group_by_day(&messages, FixedOffset::east_opt(0).unwrap());
        assert_eq!(utc.len(), 1);

        // 23:30 UTC is already the next day at UTC+1.
        let cet = group_by_day(&messages, FixedOffset::east_opt(3600).unwrap());
        assert_eq!(cet.len(), 2);
        assert_eq!(cet[0].day, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(cet[1].day, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(cet[1].messages.len(), 2);
    }
}
