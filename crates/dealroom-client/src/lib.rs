//! Client
//!
//! Action-based conversation client. Owns one instance of every core state
//! machine for a single signed-in user and routes events between them.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO and action-based patterns as
//! [`dealroom_core`]. It receives events ([`ClientEvent`]), processes them
//! through pure state machine logic, and returns actions ([`ClientAction`])
//! for the caller to execute: transport writes, request/response API calls
//! and UI notifications.
//!
//! One `Client` is one logical user session. Construct it at sign-in and drop
//! it at sign-out; nothing is process-global.
//!
//! # Components
//!
//! - [`Client`]: top-level state machine
//! - [`ClientEvent`]: events fed into the client
//! - [`ClientAction`]: actions produced by the client
//! - [`ClientNotification`]: UI-facing changes carried by
//!   [`ClientAction::Notify`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;

pub use client::{Client, ClientConfig, ClientIdentity};
pub use dealroom_core::{Credential, CredentialSource, Environment, StaticCredential};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent, ClientNotification};
