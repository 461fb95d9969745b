//! Client events and actions.

use std::time::Duration;

use dealroom_core::PresenceChange;
use dealroom_proto::{Conversation, ConversationId, Frame, Message, MessageId, SendMessagePayload};

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Reporting transport lifecycle and inbound frames
/// - Driving time forward via ticks
/// - Returning results of request/response calls the client asked for
/// - Forwarding user intents (activate, send, type, mark read)
///
/// Generic over `I` (Instant type) to support both production and virtual
/// time.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// Sign-in completed or the app wants connectivity.
    ///
    /// Reads the current credential; with none this is a no-op.
    Connect,

    /// Tear everything down (sign-out or credential change).
    Disconnect,

    /// Transport requested by `OpenTransport` is open.
    TransportOpened,

    /// Transport closed without being asked to.
    TransportClosed {
        /// Why, for logs.
        reason: String,
    },

    /// Frame received from the server.
    FrameReceived(Frame),

    /// Heartbeat EOL received from the server.
    HeartbeatReceived,

    /// Time tick for timers (backoff, heartbeats, typing expiry).
    Tick {
        /// Current time from the environment.
        now: I,
    },

    /// Make a conversation the active one.
    ActivateConversation {
        /// Conversation to open.
        conversation_id: ConversationId,
    },

    /// Close the active conversation.
    DeactivateConversation,

    /// Send a message to the active conversation.
    SendMessage {
        /// Message body.
        payload: SendMessagePayload,
    },

    /// Publish a typing signal as is, without debouncing.
    SendTyping {
        /// Conversation typed in.
        conversation_id: ConversationId,
        /// Typing or stopped.
        typing: bool,
    },

    /// The input surface of the active conversation changed.
    ///
    /// Debounced into typing signals.
    Keystroke,

    /// Mark a conversation read.
    MarkRead {
        /// Conversation read.
        conversation_id: ConversationId,
    },

    /// Refresh the directory and unread total.
    LoadConversations,

    /// Result of `FetchConversations`.
    ConversationsLoaded(Result<Vec<Conversation>, String>),

    /// Result of `FetchUnreadTotal`.
    UnreadTotalLoaded(Result<u32, String>),

    /// Result of `FetchHistory`.
    HistoryLoaded {
        /// Conversation the history was requested for.
        conversation_id: ConversationId,
        /// Persisted messages, oldest first.
        result: Result<Vec<Message>, String>,
    },

    /// Result of `PersistMessage`.
    MessagePersisted {
        /// Conversation the message was sent to.
        conversation_id: ConversationId,
        /// Temporary id of the optimistic entry.
        temp_id: MessageId,
        /// Server record.
        result: Result<Message, String>,
    },
}

/// UI-facing changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotification {
    /// Connectivity flag changed.
    ConnectivityChanged(bool),

    /// A retry was scheduled after an unexpected closure.
    ReconnectScheduled {
        /// Retry number since the last successful handshake.
        attempt: u32,
        /// Delay before the retry.
        delay: Duration,
    },

    /// The active conversation's message list changed.
    MessagesChanged {
        /// Conversation whose list changed.
        conversation_id: ConversationId,
    },

    /// Directory entries or unread totals changed.
    DirectoryChanged,

    /// Someone started or stopped typing.
    TypingChanged(PresenceChange),

    /// Persisting a message failed.
    ///
    /// The optimistic entry stays in the list with status SENT; nothing is
    /// retried automatically.
    SendFailed {
        /// Conversation the message was sent to.
        conversation_id: ConversationId,
        /// Temporary id of the stuck entry.
        temp_id: MessageId,
        /// Error reported by the API.
        reason: String,
    },

    /// History fetch failed; not retried for this activation.
    HistoryFailed {
        /// Conversation whose history failed.
        conversation_id: ConversationId,
        /// Error reported by the API.
        reason: String,
    },
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Open a transport and report `TransportOpened` or `TransportClosed`.
    OpenTransport,

    /// Close the current transport. No `TransportClosed` is expected back.
    CloseTransport {
        /// Reason for closing.
        reason: String,
    },

    /// Send a frame to the server.
    Send(Frame),

    /// Send a heartbeat EOL.
    SendHeartbeat,

    /// Call `listConversations` and report `ConversationsLoaded`.
    FetchConversations,

    /// Call `unreadCount` and report `UnreadTotalLoaded`.
    FetchUnreadTotal,

    /// Call `listMessages` and report `HistoryLoaded`.
    FetchHistory {
        /// Conversation to fetch.
        conversation_id: ConversationId,
    },

    /// Call `sendMessage` and report `MessagePersisted`.
    PersistMessage {
        /// Target conversation.
        conversation_id: ConversationId,
        /// Temporary id to echo back.
        temp_id: MessageId,
        /// Message body.
        payload: SendMessagePayload,
    },

    /// Call `markRead`. Best effort; no result is expected back.
    PersistMarkRead {
        /// Conversation read.
        conversation_id: ConversationId,
    },

    /// Tell the UI something changed.
    Notify(ClientNotification),
}
