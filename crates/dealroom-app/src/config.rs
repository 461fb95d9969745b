//! Runtime configuration.

use std::time::Duration;

use dealroom_client::ClientConfig;

/// Default period of the timer driving backoff, heartbeats and typing expiry.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Default capacity of the command and completion channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// WebSocket endpoint carrying STOMP frames.
    pub ws_url: String,
    /// Base URL of the request/response API, without a trailing slash.
    pub api_base_url: String,
    /// Timer period. Bounds how late a timer-driven action can fire.
    pub tick_interval: Duration,
    /// Capacity of internal channels.
    pub channel_capacity: usize,
    /// Connection, heartbeat, backoff and typing settings.
    pub client: ClientConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8080/ws".to_string(),
            api_base_url: "http://localhost:8080/api".to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            client: ClientConfig::default(),
        }
    }
}
