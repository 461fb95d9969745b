//! Dealroom core state machines.
//!
//! Every component of the conversation layer is a pure state machine: methods
//! take the current time as input and return actions or changes for a driver
//! to execute. Nothing here performs I/O, spawns tasks or reads a clock, which
//! keeps every timing rule (backoff, heartbeat loss, typing expiry) testable
//! with virtual time.
//!
//! # Components
//!
//! - [`ConnectionManager`]: transport lifecycle, handshake, heartbeats and
//!   capped exponential backoff reconnection
//! - [`SubscriptionRouter`]: topic bookkeeping with session and conversation
//!   scopes, re-subscription after reconnect
//! - [`FrameDispatcher`]: decodes routed frames into [`InboundEvent`]s
//! - [`TypingTracker`]: ephemeral typing indicators with auto-expiry
//! - [`ChatSession`]: per-conversation message list with optimistic sends
//! - [`ConversationDirectory`]: conversation list with preview and unread
//!   accounting
//!
//! [`InboundEvent`]: dealroom_proto::InboundEvent

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod connection;
pub mod credential;
pub mod directory;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod presence;
pub mod session;
pub mod subscription;

pub use backoff::{Backoff, BackoffPolicy};
pub use connection::{
    ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState, Heartbeat,
    HeartbeatConfig,
};
pub use credential::{Credential, CredentialSource, StaticCredential};
pub use directory::ConversationDirectory;
pub use dispatch::FrameDispatcher;
pub use env::Environment;
pub use error::{ConnectionError, SessionError};
pub use presence::{PresenceChange, TypingDebounce, TypingTracker};
pub use session::{ChatSession, DayGroup, HistoryState, group_by_day};
pub use subscription::{Route, Scope, Subscription, SubscriptionId, SubscriptionRouter};
