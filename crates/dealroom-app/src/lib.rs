//! Application runtime for Dealroom
//!
//! Drives the Sans-IO [`dealroom_client::Client`] over real I/O: opens
//! transports, moves packets, performs request/response calls and publishes
//! connectivity and UI notifications.
//!
//! # Components
//!
//! - [`Runtime`]: single-task event loop owning one client session
//! - [`RuntimeHandle`]: cloneable handle for user intents and state reads
//! - [`Connector`] / [`Link`]: transport seam
//! - [`ConversationApi`]: request/response seam
//! - [`SystemEnv`]: production environment
//!
//! With the `transport` feature, [`WsConnector`] and [`HttpApi`] provide the
//! WebSocket and HTTP implementations.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod api;
mod config;
mod connector;
#[cfg(feature = "transport")]
mod http;
mod runtime;
mod system_env;
#[cfg(feature = "transport")]
mod websocket;

pub use api::{ApiError, ConversationApi};
pub use config::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_TICK_INTERVAL, RuntimeConfig};
pub use connector::{Connector, Link, TransportError};
#[cfg(feature = "transport")]
pub use http::HttpApi;
pub use runtime::{Runtime, RuntimeError, RuntimeHandle, Snapshot};
pub use system_env::SystemEnv;
#[cfg(feature = "transport")]
pub use websocket::WsConnector;
