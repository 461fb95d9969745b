//! Async runtime for the conversation client.
//!
//! The runtime drives one [`Client`] from a single task, coordinating:
//! - requests from [`RuntimeHandle`]s (user intents)
//! - packets from the current [`Link`]
//! - completions of spawned transport and API calls
//! - a periodic tick for timers
//!
//! Every client mutation happens on the runtime task, so the state machines
//! never need locks. Only transport opening and API calls suspend; they run
//! as separate tasks and report back through the completion channel.

use std::{future::Future, sync::Arc, time::Duration};

use dealroom_client::{
    Client, ClientAction, ClientError, ClientEvent, ClientIdentity, ClientNotification,
    CredentialSource, Environment,
};
use dealroom_proto::{
    Conversation, ConversationId, Message, MessageId, Packet, SendMessagePayload, UserId,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    time::MissedTickBehavior,
};

use crate::{
    api::ConversationApi,
    config::RuntimeConfig,
    connector::{Connector, Link, TransportError},
};

/// Runtime errors surfaced to handle callers.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime task has exited.
    #[error("runtime stopped")]
    Stopped,

    /// The client rejected the request.
    #[error("client error: {0}")]
    Client(#[from] ClientError),
}

/// Point-in-time view of the client state for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Whether the handshake has completed.
    pub connected: bool,
    /// Active conversation, if any.
    pub active_conversation: Option<ConversationId>,
    /// Messages of the active conversation.
    pub messages: Vec<Message>,
    /// Directory entries, most recent first.
    pub conversations: Vec<Conversation>,
    /// Total unread messages.
    pub unread_total: u32,
    /// Remote participant typing in the active conversation.
    pub typing: Option<UserId>,
}

enum Request {
    Connect,
    Disconnect,
    Activate(ConversationId),
    Deactivate,
    Send { payload: SendMessagePayload, reply: oneshot::Sender<Result<(), ClientError>> },
    Keystroke,
    Typing { conversation_id: ConversationId, typing: bool },
    MarkRead(ConversationId),
    LoadConversations,
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
}

/// Results of work done off the runtime task.
enum Completion {
    Transport { generation: u64, result: Result<Link, TransportError> },
    Conversations(Result<Vec<Conversation>, String>),
    UnreadTotal(Result<u32, String>),
    History { conversation_id: ConversationId, result: Result<Vec<Message>, String> },
    Persisted {
        conversation_id: ConversationId,
        temp_id: MessageId,
        result: Result<Message, String>,
    },
}

/// Cloneable handle to a running [`Runtime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    requests: mpsc::Sender<Request>,
    connectivity: watch::Receiver<bool>,
    notifications: broadcast::Sender<ClientNotification>,
}

impl RuntimeHandle {
    /// Start connecting with the current credential.
    pub async fn connect(&self) -> Result<(), RuntimeError> {
        self.request(Request::Connect).await
    }

    /// Tear the session down and forget the credential.
    pub async fn disconnect(&self) -> Result<(), RuntimeError> {
        self.request(Request::Disconnect).await
    }

    /// Make `conversation_id` the active conversation.
    pub async fn activate(&self, conversation_id: ConversationId) -> Result<(), RuntimeError> {
        self.request(Request::Activate(conversation_id)).await
    }

    /// Close the active conversation.
    pub async fn deactivate(&self) -> Result<(), RuntimeError> {
        self.request(Request::Deactivate).await
    }

    /// Send a message to the active conversation.
    ///
    /// Returns once the optimistic entry exists; persistence completes in
    /// the background.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Client` with `NoActiveConversation` if nothing is
    ///   active
    /// - `RuntimeError::Stopped` if the runtime has exited
    pub async fn send(&self, payload: SendMessagePayload) -> Result<(), RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.request(Request::Send { payload, reply }).await?;
        response.await.map_err(|_| RuntimeError::Stopped)?.map_err(RuntimeError::from)
    }

    /// Report input activity in the active conversation.
    pub async fn keystroke(&self) -> Result<(), RuntimeError> {
        self.request(Request::Keystroke).await
    }

    /// Publish a typing signal without debouncing.
    pub async fn typing(
        &self,
        conversation_id: ConversationId,
        typing: bool,
    ) -> Result<(), RuntimeError> {
        self.request(Request::Typing { conversation_id, typing }).await
    }

    /// Mark a conversation read.
    pub async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), RuntimeError> {
        self.request(Request::MarkRead(conversation_id)).await
    }

    /// Refresh the directory and the unread total.
    pub async fn load_conversations(&self) -> Result<(), RuntimeError> {
        self.request(Request::LoadConversations).await
    }

    /// Current client state.
    pub async fn snapshot(&self) -> Result<Snapshot, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.request(Request::Snapshot(reply)).await?;
        response.await.map_err(|_| RuntimeError::Stopped)
    }

    /// Disconnect and stop the runtime task.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(Request::Shutdown).await
    }

    /// Connectivity flag, updated on every change.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connectivity.clone()
    }

    /// Whether the client is currently connected.
    pub fn is_connected(&self) -> bool {
        *self.connectivity.borrow()
    }

    /// Subscribe to UI notifications emitted from now on.
    pub fn notifications(&self) -> broadcast::Receiver<ClientNotification> {
        self.notifications.subscribe()
    }

    async fn request(&self, request: Request) -> Result<(), RuntimeError> {
        self.requests.send(request).await.map_err(|_| RuntimeError::Stopped)
    }
}

/// Event loop owning one client session.
///
/// # Type Parameters
///
/// - `E`: Environment for time and randomness
/// - `C`: Transport connector
/// - `A`: Request/response API
pub struct Runtime<E, C, A>
where
    E: Environment,
    C: Connector,
    A: ConversationApi,
{
    env: E,
    client: Client<E>,
    connector: C,
    api: A,
    tick_interval: Duration,

    requests: mpsc::Receiver<Request>,
    completions_tx: mpsc::Sender<Completion>,
    completions: mpsc::Receiver<Completion>,

    /// Current transport, if open.
    link: Option<Link>,
    /// Bumped on every open and close so late connect results are discarded.
    generation: u64,

    connectivity: watch::Sender<bool>,
    notifications: broadcast::Sender<ClientNotification>,
}

impl<E, C, A> Runtime<E, C, A>
where
    E: Environment,
    C: Connector,
    A: ConversationApi,
{
    /// Create a runtime and a handle to drive it.
    ///
    /// Nothing happens until [`Runtime::run`] is polled and the handle asks
    /// to connect.
    pub fn new(
        env: E,
        identity: ClientIdentity,
        credentials: Arc<dyn CredentialSource>,
        connector: C,
        api: A,
        config: RuntimeConfig,
    ) -> (Self, RuntimeHandle) {
        let capacity = config.channel_capacity.max(1);
        let (requests_tx, requests) = mpsc::channel(capacity);
        let (completions_tx, completions) = mpsc::channel(capacity);
        let (connectivity, connectivity_rx) = watch::channel(false);
        let (notifications, _) = broadcast::channel(capacity);

        let client = Client::new(env.clone(), identity, credentials, config.client);

        let handle = RuntimeHandle {
            requests: requests_tx,
            connectivity: connectivity_rx,
            notifications: notifications.clone(),
        };

        let runtime = Self {
            env,
            client,
            connector,
            api,
            tick_interval: config.tick_interval,
            requests,
            completions_tx,
            completions,
            link: None,
            generation: 0,
            connectivity,
            notifications,
        };

        (runtime, handle)
    }

    /// Run until shutdown is requested or every handle is dropped.
    ///
    /// Disconnects cleanly on exit.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    match request {
                        Some(Request::Shutdown) | None => break,
                        Some(request) => self.handle_request(request).await,
                    }
                },

                Some(completion) = self.completions.recv() => {
                    self.handle_completion(completion).await;
                },

                packet = next_packet(self.link.as_mut()) => {
                    self.handle_packet(packet).await;
                },

                _ = ticker.tick() => {
                    let now = self.env.now();
                    self.dispatch(ClientEvent::Tick { now }).await;
                },
            }
        }

        self.dispatch(ClientEvent::Disconnect).await;
        if let Some(link) = self.link.take() {
            link.close();
        }
        tracing::debug!("runtime stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        let event = match request {
            Request::Connect => ClientEvent::Connect,
            Request::Disconnect => ClientEvent::Disconnect,
            Request::Activate(conversation_id) => {
                ClientEvent::ActivateConversation { conversation_id }
            },
            Request::Deactivate => ClientEvent::DeactivateConversation,
            Request::Keystroke => ClientEvent::Keystroke,
            Request::Typing { conversation_id, typing } => {
                ClientEvent::SendTyping { conversation_id, typing }
            },
            Request::MarkRead(conversation_id) => ClientEvent::MarkRead { conversation_id },
            Request::LoadConversations => ClientEvent::LoadConversations,
            Request::Send { payload, reply } => {
                let outcome = match self.client.handle(ClientEvent::SendMessage { payload }) {
                    Ok(actions) => {
                        self.execute(actions).await;
                        Ok(())
                    },
                    Err(error) => Err(error),
                };
                let _ = reply.send(outcome);
                return;
            },
            Request::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                return;
            },
            // Intercepted by the loop
            Request::Shutdown => return,
        };

        self.dispatch(event).await;
    }

    async fn handle_completion(&mut self, completion: Completion) {
        let event = match completion {
            Completion::Transport { generation, result } => {
                if generation != self.generation {
                    tracing::debug!(
                        generation,
                        current = self.generation,
                        "stale transport discarded"
                    );
                    if let Ok(link) = result {
                        link.close();
                    }
                    return;
                }

                match result {
                    Ok(link) => {
                        self.link = Some(link);
                        ClientEvent::TransportOpened
                    },
                    Err(error) => {
                        tracing::warn!(%error, "transport failed to open");
                        ClientEvent::TransportClosed { reason: error.to_string() }
                    },
                }
            },
            Completion::Conversations(result) => ClientEvent::ConversationsLoaded(result),
            Completion::UnreadTotal(result) => ClientEvent::UnreadTotalLoaded(result),
            Completion::History { conversation_id, result } => {
                ClientEvent::HistoryLoaded { conversation_id, result }
            },
            Completion::Persisted { conversation_id, temp_id, result } => {
                ClientEvent::MessagePersisted { conversation_id, temp_id, result }
            },
        };

        self.dispatch(event).await;
    }

    async fn handle_packet(&mut self, packet: Option<Packet>) {
        let event = match packet {
            Some(Packet::Frame(frame)) => ClientEvent::FrameReceived(frame),
            Some(Packet::Heartbeat) => ClientEvent::HeartbeatReceived,
            None => {
                if let Some(link) = self.link.take() {
                    link.close();
                }
                ClientEvent::TransportClosed { reason: "transport closed by peer".into() }
            },
        };

        self.dispatch(event).await;
    }

    async fn dispatch(&mut self, event: ClientEvent<E::Instant>) {
        match self.client.handle(event) {
            Ok(actions) => self.execute(actions).await,
            Err(error) if error.is_transient() => tracing::debug!(%error, "event not applied"),
            Err(error) => tracing::warn!(%error, "event rejected"),
        }
    }

    async fn execute(&mut self, actions: Vec<ClientAction>) {
        for action in actions {
            match action {
                ClientAction::OpenTransport => self.open_transport(),
                ClientAction::CloseTransport { reason } => self.close_transport(&reason),
                ClientAction::Send(frame) => self.transmit(Packet::Frame(frame)).await,
                ClientAction::SendHeartbeat => self.transmit(Packet::Heartbeat).await,

                ClientAction::FetchConversations => {
                    let api = self.api.clone();
                    self.spawn(async move {
                        Completion::Conversations(
                            api.list_conversations().await.map_err(|e| e.to_string()),
                        )
                    });
                },
                ClientAction::FetchUnreadTotal => {
                    let api = self.api.clone();
                    self.spawn(async move {
                        Completion::UnreadTotal(api.unread_count().await.map_err(|e| e.to_string()))
                    });
                },
                ClientAction::FetchHistory { conversation_id } => {
                    let api = self.api.clone();
                    self.spawn(async move {
                        let result =
                            api.list_messages(&conversation_id).await.map_err(|e| e.to_string());
                        Completion::History { conversation_id, result }
                    });
                },
                ClientAction::PersistMessage { conversation_id, temp_id, payload } => {
                    let api = self.api.clone();
                    self.spawn(async move {
                        let result = api
                            .send_message(&conversation_id, &payload)
                            .await
                            .map_err(|e| e.to_string());
                        Completion::Persisted { conversation_id, temp_id, result }
                    });
                },
                ClientAction::PersistMarkRead { conversation_id } => {
                    let api = self.api.clone();
                    tokio::spawn(async move {
                        if let Err(error) = api.mark_read(&conversation_id).await {
                            tracing::debug!(%conversation_id, %error, "mark-read failed");
                        }
                    });
                },

                ClientAction::Notify(notification) => self.notify(notification),
            }
        }
    }

    fn open_transport(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.generation += 1;

        let generation = self.generation;
        let connector = self.connector.clone();
        tracing::debug!(generation, "opening transport");
        self.spawn(async move {
            Completion::Transport { generation, result: connector.connect().await }
        });
    }

    fn close_transport(&mut self, reason: &str) {
        self.generation += 1;
        if let Some(link) = self.link.take() {
            tracing::debug!(reason, "closing transport");
            link.close();
        }
    }

    async fn transmit(&mut self, packet: Packet) {
        let Some(to_server) = self.link.as_ref().map(|link| link.to_server.clone()) else {
            tracing::debug!("no transport, packet dropped");
            return;
        };

        if to_server.send(packet).await.is_err() {
            tracing::debug!("transport writer gone, packet dropped");
        }
    }

    fn notify(&self, notification: ClientNotification) {
        if let ClientNotification::ConnectivityChanged(connected) = notification {
            self.connectivity.send_replace(connected);
        }
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }

    fn spawn<F>(&self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let completion = work.await;
            let _ = completions.send(completion).await;
        });
    }

    fn snapshot(&self) -> Snapshot {
        let active = self.client.active_conversation().cloned();
        let directory = self.client.directory();

        Snapshot {
            connected: self.client.is_connected(),
            typing: active.as_ref().and_then(|id| self.client.typing_in(id)).cloned(),
            active_conversation: active,
            messages: self.client.messages().to_vec(),
            conversations: directory.iter().cloned().collect(),
            unread_total: directory.unread_total(),
        }
    }
}

#[cfg(feature = "transport")]
impl Runtime<crate::SystemEnv, crate::WsConnector, crate::HttpApi> {
    /// Runtime over the WebSocket endpoint and HTTP API named in `config`.
    pub fn over_network(
        identity: ClientIdentity,
        credentials: Arc<dyn CredentialSource>,
        config: RuntimeConfig,
    ) -> (Self, RuntimeHandle) {
        let connector = crate::WsConnector::new(config.ws_url.clone());
        let api = crate::HttpApi::new(config.api_base_url.clone(), Arc::clone(&credentials));
        Self::new(crate::SystemEnv::new(), identity, credentials, connector, api, config)
    }
}

async fn next_packet(link: Option<&mut Link>) -> Option<Packet> {
    match link {
        Some(link) => link.from_server.recv().await,
        None => std::future::pending().await,
    }
}
