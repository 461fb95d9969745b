//! Ephemeral typing state.
//!
//! [`TypingTracker`] turns inbound TYPING events into a per-conversation
//! "the other participant is typing" flag. Each entry owns its own expiry
//! deadline, so removing or replacing an entry cancels its timer with it and
//! no stale deadline can fire against a newer entry.
//!
//! [`TypingDebounce`] is the outbound counterpart used by input surfaces. The
//! tracker itself never debounces.

use std::{
    collections::HashMap,
    ops::{Add, Sub},
    time::{Duration, Instant},
};

use dealroom_proto::{ConversationId, TypingIndicator, UserId};

/// Lifetime of a `typing=true` indicator without a refresh.
pub const TYPING_EXPIRY: Duration = Duration::from_millis(3000);

/// Silence after the last keystroke before `typing=false` is emitted.
pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Visible change to typing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    /// Someone started typing
    Started {
        /// Conversation
        conversation_id: ConversationId,
        /// Who
        user_id: UserId,
    },
    /// Indicator removed, explicitly or by expiry
    Stopped {
        /// Conversation
        conversation_id: ConversationId,
        /// Who
        user_id: UserId,
    },
}

#[derive(Debug, Clone)]
struct TypingEntry<I> {
    user_id: UserId,
    expires_at: I,
}

/// Per-conversation typing indicators with auto-expiry.
///
/// # Invariants
///
/// - Never holds an entry for the local user
/// - At most one entry (and one deadline) per conversation
#[derive(Debug, Clone)]
pub struct TypingTracker<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    local_user: UserId,
    expiry: Duration,
    entries: HashMap<ConversationId, TypingEntry<I>>,
}

impl<I> TypingTracker<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    /// Tracker for `local_user` with the default expiry.
    pub fn new(local_user: UserId) -> Self {
        Self::with_expiry(local_user, TYPING_EXPIRY)
    }

    /// Tracker with a custom expiry.
    pub fn with_expiry(local_user: UserId, expiry: Duration) -> Self {
        Self { local_user, expiry, entries: HashMap::new() }
    }

    /// Apply an inbound TYPING event.
    ///
    /// `typing=true` inserts or replaces the conversation's entry and
    /// restarts its deadline; `typing=false` removes it immediately. Events
    /// from the local user are ignored.
    pub fn apply(&mut self, indicator: &TypingIndicator, now: I) -> Option<PresenceChange> {
        if indicator.user_id == self.local_user {
            return None;
        }

        let conversation_id = indicator.conversation_id.clone();

        if indicator.typing {
            let entry =
                TypingEntry { user_id: indicator.user_id.clone(), expires_at: now + self.expiry };
            let previous = self.entries.insert(conversation_id.clone(), entry);

            match previous {
                Some(previous) if previous.user_id == indicator.user_id => None,
                _ => Some(PresenceChange::Started {
                    conversation_id,
                    user_id: indicator.user_id.clone(),
                }),
            }
        } else {
            self.entries
                .remove(&conversation_id)
                .map(|entry| PresenceChange::Stopped { conversation_id, user_id: entry.user_id })
        }
    }

    /// Expire entries whose deadline has passed.
    pub fn tick(&mut self, now: I) -> Vec<PresenceChange> {
        let expired: Vec<ConversationId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(conversation_id, _)| conversation_id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|conversation_id| {
                let entry = self.entries.remove(&conversation_id)?;
                tracing::trace!(%conversation_id, user_id = %entry.user_id, "typing expired");
                Some(PresenceChange::Stopped { conversation_id, user_id: entry.user_id })
            })
            .collect()
    }

    /// Who is typing in `conversation_id`, if anyone.
    pub fn typing_in(&self, conversation_id: &ConversationId) -> Option<&UserId> {
        self.entries.get(conversation_id).map(|entry| &entry.user_id)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<I> {
        self.entries.values().map(|entry| entry.expires_at).min()
    }

    /// Drop every indicator (teardown).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Outbound typing debounce for one input surface.
///
/// Emits `true` on the first keystroke of a burst and `false` once the
/// window has passed without another keystroke.
#[derive(Debug, Clone)]
pub struct TypingDebounce<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    window: Duration,
    last_keystroke: Option<I>,
}

impl<I> Default for TypingDebounce<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    fn default() -> Self {
        Self::new(TYPING_DEBOUNCE)
    }
}

impl<I> TypingDebounce<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    /// Debounce with the given stop window.
    pub fn new(window: Duration) -> Self {
        Self { window, last_keystroke: None }
    }

    /// Record a keystroke. `Some(true)` if a typing signal should be sent.
    pub fn keystroke(&mut self, now: I) -> Option<bool> {
        let started = self.last_keystroke.is_none();
        self.last_keystroke = Some(now);
        started.then_some(true)
    }

    /// `Some(false)` once the window has elapsed since the last keystroke.
    pub fn tick(&mut self, now: I) -> Option<bool> {
        match self.last_keystroke {
            Some(last) if now >= last + self.window => {
                self.last_keystroke = None;
                Some(false)
            },
            _ => None,
        }
    }

    /// Stop immediately, e.g. after sending. `Some(false)` if typing.
    pub fn flush(&mut self) -> Option<bool> {
        self.last_keystroke.take().map(|_| false)
    }

    /// Whether a burst is in progress.
    pub fn is_typing(&self) -> bool {
        self.last_keystroke.is_some()
    }
}
