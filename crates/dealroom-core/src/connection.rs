//! Connection lifecycle state machine.
//!
//! Owns the single logical transport connection: authenticated STOMP
//! handshake, heartbeat negotiation and capped exponential backoff
//! reconnection. Uses the action pattern: methods take time as input and
//! return actions for the driver to execute, so the machine itself performs
//! no I/O.
//!
//! # State Machine
//!
//! ```text
//!                 connect()            transport_opened()
//! ┌──────────────┐ ──────> ┌────────────┐ ── CONNECT ──> server
//! │ Disconnected │         │ Connecting │
//! └──────────────┘ <────── └────────────┘ <── CONNECTED ──┐
//!    ↑     │ ↑   failure / timeout               │         │
//!    │     │ │   (reconnect scheduled)           ↓         │
//!    │     │ └──────────────────────────── ┌───────────┐   │
//!    │     └── tick() at reconnect_at ───> │ Connected │ ──┘
//!    └──────────── disconnect() ────────── └───────────┘
//! ```
//!
//! # Credential rotation
//!
//! The credential captured by [`ConnectionManager::connect`] is reused for
//! every automatic retry. Picking up a new one requires an explicit
//! [`ConnectionManager::disconnect`] followed by `connect`.

use std::{
    ops::{Add, Sub},
    time::{Duration, Instant},
};

use dealroom_proto::{Command, Frame, ProtocolError};

use crate::{
    backoff::{Backoff, BackoffPolicy},
    credential::Credential,
    error::ConnectionError,
};

/// STOMP protocol version offered in the handshake.
pub const STOMP_VERSION: &str = "1.2";

/// Time allowed between requesting a transport and receiving CONNECTED.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Heartbeat interval offered in both directions.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10_000);

/// Missed incoming heartbeats tolerated before the link is declared dead.
const HEARTBEAT_GRACE_FACTOR: u32 = 2;

/// Actions returned by the connection state machine.
///
/// The driver (test harness or runtime) executes these:
/// - `OpenTransport`: open a new transport and report `transport_opened`
/// - `SendFrame` / `SendHeartbeat`: write to the open transport
/// - `CloseTransport`: close it without reporting `transport_closed` back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a new transport
    OpenTransport,

    /// Send this frame to the server
    SendFrame(Frame),

    /// Send a heartbeat EOL
    SendHeartbeat,

    /// Close the current transport
    CloseTransport {
        /// Reason for closing the transport
        reason: String,
    },

    /// Handshake completed; re-establish subscriptions
    Established,

    /// Connectivity flag for consumers changed
    ConnectivityChanged(bool),

    /// A retry was scheduled after an unexpected closure
    ReconnectScheduled {
        /// 1-based retry count since the last successful handshake
        attempt: u32,
        /// Delay before the retry
        delay: Duration,
    },

    /// Subscription delivery to route
    Deliver(Frame),
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport; a retry may be scheduled
    Disconnected,
    /// Transport requested or open, waiting for CONNECTED
    Connecting,
    /// Handshake complete
    Connected,
}

/// Heartbeat intervals the client offers (`heart-beat:<cx>,<cy>`).
///
/// Zero disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often the client can send (`cx`)
    pub outgoing: Duration,
    /// How often the client wants to receive (`cy`)
    pub incoming: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { outgoing: DEFAULT_HEARTBEAT_INTERVAL, incoming: DEFAULT_HEARTBEAT_INTERVAL }
    }
}

impl HeartbeatConfig {
    /// Value for the CONNECT `heart-beat` header.
    pub fn header_value(&self) -> String {
        format!("{},{}", millis(self.outgoing), millis(self.incoming))
    }
}

/// Negotiated heartbeat intervals. `None` disables that direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
    /// Interval at which the client must emit a heartbeat
    pub outgoing: Option<Duration>,
    /// Interval at which the server promises to emit one
    pub incoming: Option<Duration>,
}

impl Heartbeat {
    /// Combine the client offer with the server's CONNECTED `heart-beat`.
    ///
    /// A missing server header means `0,0`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MalformedHeader` if the header is not `<sx>,<sy>`
    pub fn negotiate(local: &HeartbeatConfig, remote: Option<&str>) -> Result<Self, ProtocolError> {
        let (sx, sy) = match remote {
            None => (0, 0),
            Some(value) => {
                let malformed = || ProtocolError::MalformedHeader(format!("heart-beat:{value}"));
                let (sx, sy) = value.split_once(',').ok_or_else(malformed)?;
                let sx: u64 = sx.trim().parse().map_err(|_| malformed())?;
                let sy: u64 = sy.trim().parse().map_err(|_| malformed())?;
                (sx, sy)
            },
        };

        Ok(Self {
            outgoing: combine(millis(local.outgoing), sy),
            incoming: combine(millis(local.incoming), sx),
        })
    }
}

fn combine(ours: u64, theirs: u64) -> Option<Duration> {
    if ours == 0 || theirs == 0 { None } else { Some(Duration::from_millis(ours.max(theirs))) }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Virtual host sent in CONNECT
    pub host: String,
    /// Heartbeat offer
    pub heartbeat: HeartbeatConfig,
    /// Reconnect policy
    pub backoff: BackoffPolicy,
    /// Timeout for completing the handshake
    pub handshake_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "/".to_string(),
            heartbeat: HeartbeatConfig::default(),
            backoff: BackoffPolicy::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Connection lifecycle state machine.
///
/// Pure: no I/O and no clock. Generic over `Instant` so tests can drive it
/// with virtual time.
///
/// # Invariants
///
/// - At most one transport is requested or open at a time
/// - A retry is scheduled only while a credential is held
/// - Backoff resets on every CONNECTED and on explicit disconnect
#[derive(Debug, Clone)]
pub struct ConnectionManager<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    state: ConnectionState,
    config: ConnectionConfig,
    backoff: Backoff,
    /// Credential captured by the last explicit `connect`
    credential: Option<Credential>,
    transport_open: bool,
    connecting_since: Option<I>,
    reconnect_at: Option<I>,
    heartbeat: Heartbeat,
    last_sent: Option<I>,
    last_received: Option<I>,
}

impl<I> ConnectionManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    /// Create a manager in [`ConnectionState::Disconnected`].
    pub fn new(config: ConnectionConfig) -> Self {
        let backoff = Backoff::new(config.backoff);
        Self {
            state: ConnectionState::Disconnected,
            config,
            backoff,
            credential: None,
            transport_open: false,
            connecting_since: None,
            reconnect_at: None,
            heartbeat: Heartbeat::default(),
            last_sent: None,
            last_received: None,
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the handshake has completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Negotiated heartbeat of the current connection.
    #[must_use]
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    /// When the next automatic retry fires. `None` if none is scheduled.
    #[must_use]
    pub fn reconnect_at(&self) -> Option<I> {
        self.reconnect_at
    }

    /// Retries scheduled since the last successful handshake.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    /// Start a connection with the given credential.
    ///
    /// No credential is a silent no-op. While a credential is already held
    /// (connected, connecting, or waiting to retry) the call is also a no-op:
    /// the original credential keeps being used until `disconnect`.
    pub fn connect(&mut self, credential: Option<Credential>, now: I) -> Vec<ConnectionAction> {
        let Some(credential) = credential else {
            tracing::debug!("no credential available, connection suppressed");
            return Vec::new();
        };

        if self.credential.is_some() {
            tracing::debug!(state = ?self.state, "connect ignored, session already active");
            return Vec::new();
        }

        self.credential = Some(credential);
        self.start_attempt(now)
    }

    /// Transport is open; send the CONNECT frame.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if no attempt is in progress or the
    ///   transport was already reported open
    ///
    /// # Security
    ///
    /// The credential travels only in the `Authorization` header of CONNECT.
    pub fn transport_opened(&mut self, now: I) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let credential = match (&self.state, self.transport_open, &self.credential) {
            (ConnectionState::Connecting, false, Some(credential)) => credential,
            _ => {
                return Err(ConnectionError::InvalidState {
                    state: self.state,
                    operation: "transport_opened",
                });
            },
        };

        let connect = Frame::new(Command::Connect)
            .with_header("accept-version", STOMP_VERSION)
            .with_header("host", self.config.host.as_str())
            .with_header("heart-beat", self.config.heartbeat.header_value())
            .with_header("Authorization", credential.authorization());

        self.transport_open = true;
        self.last_sent = Some(now);
        self.last_received = Some(now);

        Ok(vec![ConnectionAction::SendFrame(connect)])
    }

    /// Process an inbound frame.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::UnexpectedFrame` if the command is invalid for the
    ///   current state
    /// - `ConnectionError::Protocol` if CONNECTED carries a malformed
    ///   `heart-beat`
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.last_received = Some(now);

        match (self.state, frame.command) {
            (ConnectionState::Connecting, Command::Connected) => {
                let heartbeat =
                    Heartbeat::negotiate(&self.config.heartbeat, frame.header("heart-beat"))?;

                self.state = ConnectionState::Connected;
                self.heartbeat = heartbeat;
                self.connecting_since = None;
                self.backoff.reset();

                tracing::info!(
                    version = frame.header("version").unwrap_or(STOMP_VERSION),
                    outgoing = ?heartbeat.outgoing,
                    incoming = ?heartbeat.incoming,
                    "connected"
                );

                Ok(vec![ConnectionAction::Established, ConnectionAction::ConnectivityChanged(true)])
            },

            (ConnectionState::Connecting | ConnectionState::Connected, Command::Error) => {
                let message = frame
                    .header("message")
                    .map(str::to_string)
                    .unwrap_or_else(|| String::from_utf8_lossy(&frame.body).into_owned());
                let error = ConnectionError::Rejected(message);

                tracing::warn!(%error, "server error frame");
                Ok(self.fail(now, error.to_string(), true))
            },

            (ConnectionState::Connected, Command::Message) => {
                Ok(vec![ConnectionAction::Deliver(frame.clone())])
            },

            (ConnectionState::Connected, Command::Receipt) => Ok(Vec::new()),

            (state, command) => Err(ConnectionError::UnexpectedFrame { state, command }),
        }
    }

    /// Record an inbound heartbeat.
    pub fn heartbeat_received(&mut self, now: I) {
        tracing::trace!("heartbeat received");
        self.last_received = Some(now);
    }

    /// Transport closed without being asked to.
    ///
    /// Schedules a retry. Ignored when already disconnected, which covers the
    /// close that follows a `CloseTransport` action.
    pub fn transport_closed(&mut self, now: I, reason: &str) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }

        tracing::warn!(reason, state = ?self.state, "transport closed unexpectedly");
        self.fail(now, reason.to_string(), false)
    }

    /// Tear down the connection and forget the credential. Idempotent.
    ///
    /// Sends DISCONNECT when connected, cancels any scheduled retry and
    /// resets backoff.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if self.state == ConnectionState::Connected {
            actions.push(ConnectionAction::SendFrame(Frame::new(Command::Disconnect)));
        }

        if self.state != ConnectionState::Disconnected {
            actions.push(ConnectionAction::CloseTransport { reason: "client disconnect".into() });
        }

        if self.state == ConnectionState::Connected {
            actions.push(ConnectionAction::ConnectivityChanged(false));
        }

        if self.credential.is_some() {
            tracing::info!("disconnected");
        }

        self.state = ConnectionState::Disconnected;
        self.credential = None;
        self.reset_link();
        self.reconnect_at = None;
        self.backoff.reset();

        actions
    }

    /// Periodic maintenance: retries, handshake timeout and heartbeats.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Disconnected => match self.reconnect_at {
                Some(at) if now >= at && self.credential.is_some() => {
                    tracing::info!(attempt = self.backoff.attempt(), "reconnecting");
                    self.start_attempt(now)
                },
                _ => Vec::new(),
            },

            ConnectionState::Connecting => match self.connecting_since {
                Some(since) if now - since > self.config.handshake_timeout => {
                    let error = ConnectionError::HandshakeTimeout { elapsed: now - since };
                    tracing::warn!(%error, "handshake did not complete");
                    self.fail(now, error.to_string(), true)
                },
                _ => Vec::new(),
            },

            ConnectionState::Connected => {
                if let (Some(incoming), Some(last)) = (self.heartbeat.incoming, self.last_received)
                {
                    let elapsed = now - last;
                    if elapsed > incoming * HEARTBEAT_GRACE_FACTOR {
                        let error = ConnectionError::HeartbeatLost { elapsed };
                        tracing::warn!(%error, "server went silent");
                        return self.fail(now, error.to_string(), true);
                    }
                }

                let due = match (self.heartbeat.outgoing, self.last_sent) {
                    (Some(interval), Some(last)) => now - last >= interval,
                    (Some(_), None) => true,
                    (None, _) => false,
                };

                if due {
                    tracing::trace!("sending heartbeat");
                    self.last_sent = Some(now);
                    vec![ConnectionAction::SendHeartbeat]
                } else {
                    Vec::new()
                }
            },
        }
    }

    /// Wrap an outbound frame for sending.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::NotConnected` unless the handshake has completed
    pub fn publish(&mut self, frame: Frame, now: I) -> Result<ConnectionAction, ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }

        self.last_sent = Some(now);
        Ok(ConnectionAction::SendFrame(frame))
    }

    fn start_attempt(&mut self, now: I) -> Vec<ConnectionAction> {
        self.state = ConnectionState::Connecting;
        self.reset_link();
        self.connecting_since = Some(now);
        self.reconnect_at = None;

        vec![ConnectionAction::OpenTransport]
    }

    fn fail(&mut self, now: I, reason: String, close: bool) -> Vec<ConnectionAction> {
        let was_connected = self.state == ConnectionState::Connected;
        let mut actions = Vec::new();

        if close {
            actions.push(ConnectionAction::CloseTransport { reason });
        }
        if was_connected {
            actions.push(ConnectionAction::ConnectivityChanged(false));
        }

        self.state = ConnectionState::Disconnected;
        self.reset_link();

        if self.credential.is_some() {
            let delay = self.backoff.next_delay();
            let attempt = self.backoff.attempt();
            self.reconnect_at = Some(now + delay);

            tracing::info!(attempt, delay_ms = millis(delay), "reconnect scheduled");
            actions.push(ConnectionAction::ReconnectScheduled { attempt, delay });
        }

        actions
    }

    fn reset_link(&mut self) {
        self.transport_open = false;
        self.connecting_since = None;
        self.heartbeat = Heartbeat::default();
        self.last_sent = None;
        self.last_received = None;
    }
}
