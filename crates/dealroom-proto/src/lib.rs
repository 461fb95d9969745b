//! Dealroom wire protocol.
//!
//! Pure data types and codecs shared by every layer of the conversation
//! client. Nothing in this crate performs I/O.
//!
//! # Layers
//!
//! - [`Frame`]: STOMP 1.2 text frame (command, headers, body) with an
//!   encoder/decoder. Heartbeats are surfaced as [`Packet::Heartbeat`].
//! - [`Topic`] / [`Outbound`]: logical subscription topics and publish
//!   destinations, mapped onto concrete destination strings.
//! - [`Message`], [`Conversation`], [`TypingIndicator`], [`ReadReceipt`]: JSON
//!   bodies carried by frames and by the request/response API.
//! - [`InboundEvent`]: the closed set of real-time event kinds.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod destination;
pub mod errors;
mod event;
mod frame;
mod ids;
mod model;

pub use destination::{Outbound, Topic};
pub use errors::{ProtocolError, Result};
pub use event::{EventKind, InboundEvent};
pub use frame::{Command, Frame, Packet};
pub use ids::{ConversationId, MessageId, UserId};
pub use model::{
    Conversation, ConversationStatus, MarkReadPayload, Message, MessageKind, MessageStatus,
    ReadReceipt, SendMessagePayload, TypingIndicator, TypingSignal,
};
