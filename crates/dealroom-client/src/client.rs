//! Client state machine.
//!
//! The `Client` owns the connection manager, subscription router, frame
//! dispatcher, typing tracker, active chat session and conversation
//! directory of one signed-in user. Inbound frames flow through the
//! dispatcher into a single `match` over [`InboundEvent`]; outbound intents
//! become frames published through the connection manager plus
//! request/response calls for persistence.

use std::{sync::Arc, time::Duration};

use dealroom_core::{
    ChatSession, ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState,
    ConversationDirectory, CredentialSource, Environment, FrameDispatcher, Route,
    SubscriptionRouter, TypingDebounce, TypingTracker, presence,
};
use dealroom_proto::{
    Command, Conversation, ConversationId, Frame, InboundEvent, MarkReadPayload, Message,
    MessageId, Outbound, SendMessagePayload, Topic, TypingSignal, UserId,
};

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent, ClientNotification},
};

/// Client identity.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// Server-side id of the signed-in user.
    pub user_id: UserId,
}

impl ClientIdentity {
    /// Identity for `user_id`.
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self { user_id: user_id.into() }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection, heartbeat and backoff settings.
    pub connection: ConnectionConfig,
    /// Lifetime of a remote typing indicator.
    pub typing_expiry: Duration,
    /// Silence before an outbound `typing=false`.
    pub typing_debounce: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            typing_expiry: presence::TYPING_EXPIRY,
            typing_debounce: presence::TYPING_DEBOUNCE,
        }
    }
}

/// Conversation client for one user session.
pub struct Client<E: Environment> {
    /// Environment for time and randomness.
    env: E,

    /// Signed-in user.
    identity: ClientIdentity,

    /// Read on every explicit connect.
    credentials: Arc<dyn CredentialSource>,

    connection: ConnectionManager<E::Instant>,
    router: SubscriptionRouter,
    dispatcher: FrameDispatcher,
    typing: TypingTracker<E::Instant>,
    debounce: TypingDebounce<E::Instant>,

    /// Session of the active conversation.
    session: Option<ChatSession>,

    directory: ConversationDirectory,
}

impl<E: Environment> Client<E> {
    /// Create a disconnected client.
    pub fn new(
        env: E,
        identity: ClientIdentity,
        credentials: Arc<dyn CredentialSource>,
        config: ClientConfig,
    ) -> Self {
        let user_id = identity.user_id.clone();
        Self {
            env,
            credentials,
            connection: ConnectionManager::new(config.connection),
            router: SubscriptionRouter::new(),
            dispatcher: FrameDispatcher::new(),
            typing: TypingTracker::with_expiry(user_id.clone(), config.typing_expiry),
            debounce: TypingDebounce::new(config.typing_debounce),
            session: None,
            directory: ConversationDirectory::new(user_id),
            identity,
        }
    }

    /// Signed-in user.
    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    /// Connection lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Active conversation, if any.
    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.router.active_conversation()
    }

    /// Messages of the active conversation.
    pub fn messages(&self) -> &[Message] {
        self.session.as_ref().map(ChatSession::messages).unwrap_or_default()
    }

    /// Active chat session.
    pub fn session(&self) -> Option<&ChatSession> {
        self.session.as_ref()
    }

    /// Conversation directory.
    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    /// Who is typing in `conversation_id`.
    pub fn typing_in(&self, conversation_id: &ConversationId) -> Option<&UserId> {
        self.typing.typing_in(conversation_id)
    }

    /// Subscription bookkeeping.
    pub fn router(&self) -> &SubscriptionRouter {
        &self.router
    }

    /// Frame dispatch counters.
    pub fn dispatcher(&self) -> &FrameDispatcher {
        &self.dispatcher
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// - `ClientError::Connection` if the transport reported something
    ///   invalid for the connection state
    /// - `ClientError::Protocol` if an outbound frame could not be built
    /// - `ClientError::NoActiveConversation` for sends without an active
    ///   conversation
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let now = match &event {
            ClientEvent::Tick { now } => *now,
            _ => self.env.now(),
        };

        match event {
            ClientEvent::Connect => self.handle_connect(now),
            ClientEvent::Disconnect => self.handle_disconnect(now),
            ClientEvent::TransportOpened => {
                let actions = self.connection.transport_opened(now)?;
                self.apply_connection(actions, now)
            },
            ClientEvent::TransportClosed { reason } => {
                let actions = self.connection.transport_closed(now, &reason);
                self.apply_connection(actions, now)
            },
            ClientEvent::FrameReceived(frame) => {
                let actions = self.connection.handle_frame(&frame, now)?;
                self.apply_connection(actions, now)
            },
            ClientEvent::HeartbeatReceived => {
                self.connection.heartbeat_received(now);
                Ok(Vec::new())
            },
            ClientEvent::Tick { now } => self.handle_tick(now),
            ClientEvent::ActivateConversation { conversation_id } => {
                self.handle_activate(conversation_id, now)
            },
            ClientEvent::DeactivateConversation => self.handle_deactivate(now),
            ClientEvent::SendMessage { payload } => self.handle_send_message(payload, now),
            ClientEvent::SendTyping { conversation_id, typing } => {
                Ok(self.publish_typing(conversation_id, typing, now)?.into_iter().collect())
            },
            ClientEvent::Keystroke => self.handle_keystroke(now),
            ClientEvent::MarkRead { conversation_id } => self.mark_read(conversation_id, now),
            ClientEvent::LoadConversations => {
                Ok(vec![ClientAction::FetchConversations, ClientAction::FetchUnreadTotal])
            },
            ClientEvent::ConversationsLoaded(result) => Ok(self.handle_conversations(result)),
            ClientEvent::UnreadTotalLoaded(result) => Ok(self.handle_unread_total(result)),
            ClientEvent::HistoryLoaded { conversation_id, result } => {
                self.handle_history(conversation_id, result, now)
            },
            ClientEvent::MessagePersisted { conversation_id, temp_id, result } => {
                self.handle_persisted(conversation_id, temp_id, result, now)
            },
        }
    }

    fn handle_connect(&mut self, now: E::Instant) -> Result<Vec<ClientAction>, ClientError> {
        // Session topics are registered once per session; repeats are no-ops.
        self.router.subscribe_session(Topic::DirectMessages, Route::Envelope);
        self.router.subscribe_session(Topic::Notifications, Route::Envelope);

        let actions = self.connection.connect(self.credentials.current(), now);
        self.apply_connection(actions, now)
    }

    fn handle_disconnect(&mut self, now: E::Instant) -> Result<Vec<ClientAction>, ClientError> {
        let actions = self.connection.disconnect();
        let mut out = self.apply_connection(actions, now)?;

        self.router.clear();
        self.typing.clear();
        self.debounce.flush();

        if let Some(session) = self.session.take() {
            out.push(ClientAction::Notify(ClientNotification::MessagesChanged {
                conversation_id: session.conversation_id().clone(),
            }));
        }

        Ok(out)
    }

    fn handle_tick(&mut self, now: E::Instant) -> Result<Vec<ClientAction>, ClientError> {
        let actions = self.connection.tick(now);
        let mut out = self.apply_connection(actions, now)?;

        out.extend(
            self.typing
                .tick(now)
                .into_iter()
                .map(|change| ClientAction::Notify(ClientNotification::TypingChanged(change))),
        );

        if let Some(typing) = self.debounce.tick(now) {
            if let Some(conversation_id) = self.router.active_conversation().cloned() {
                out.extend(self.publish_typing(conversation_id, typing, now)?);
            }
        }

        Ok(out)
    }

    fn handle_activate(
        &mut self,
        conversation_id: ConversationId,
        now: E::Instant,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if self.router.active_conversation() == Some(&conversation_id) {
            return Ok(Vec::new());
        }

        let mut out = self.stop_typing(now)?;
        self.typing.clear();

        for frame in self.router.activate_conversation(conversation_id.clone()) {
            out.extend(self.publish(frame, now));
        }

        let mut session = ChatSession::new(conversation_id.clone(), self.identity.user_id.clone());
        if session.begin_history_load() {
            out.push(ClientAction::FetchHistory { conversation_id: conversation_id.clone() });
        }
        self.session = Some(session);

        tracing::debug!(%conversation_id, "conversation activated");
        out.push(ClientAction::Notify(ClientNotification::MessagesChanged { conversation_id }));
        Ok(out)
    }

    fn handle_deactivate(&mut self, now: E::Instant) -> Result<Vec<ClientAction>, ClientError> {
        let mut out = self.stop_typing(now)?;
        self.typing.clear();

        for frame in self.router.deactivate_conversation() {
            out.extend(self.publish(frame, now));
        }
        self.session = None;

        Ok(out)
    }

    fn handle_send_message(
        &mut self,
        payload: SendMessagePayload,
        now: E::Instant,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let nonce = self.env.random_u64();
        let created_at = self.env.wall_clock();

        let Some(session) = self.session.as_mut() else {
            return Err(ClientError::NoActiveConversation);
        };

        let message = session.send(payload.clone(), nonce, created_at);
        let conversation_id = message.conversation_id.clone();
        tracing::debug!(%conversation_id, temp_id = %message.id, "optimistic send");

        let mut out = vec![
            ClientAction::Notify(ClientNotification::MessagesChanged {
                conversation_id: conversation_id.clone(),
            }),
            ClientAction::PersistMessage { conversation_id, temp_id: message.id, payload },
        ];
        out.extend(self.stop_typing(now)?);
        Ok(out)
    }

    fn handle_keystroke(&mut self, now: E::Instant) -> Result<Vec<ClientAction>, ClientError> {
        let Some(conversation_id) = self.router.active_conversation().cloned() else {
            return Ok(Vec::new());
        };

        match self.debounce.keystroke(now) {
            Some(typing) => {
                Ok(self.publish_typing(conversation_id, typing, now)?.into_iter().collect())
            },
            None => Ok(Vec::new()),
        }
    }

    fn handle_conversations(
        &mut self,
        result: Result<Vec<Conversation>, String>,
    ) -> Vec<ClientAction> {
        match result {
            Ok(conversations) => {
                tracing::debug!(count = conversations.len(), "directory loaded");
                self.directory.replace(conversations);
                vec![ClientAction::Notify(ClientNotification::DirectoryChanged)]
            },
            Err(reason) => {
                tracing::warn!(%reason, "listing conversations failed");
                Vec::new()
            },
        }
    }

    fn handle_unread_total(&mut self, result: Result<u32, String>) -> Vec<ClientAction> {
        match result {
            Ok(total) => {
                self.directory.set_unread_total(total);
                vec![ClientAction::Notify(ClientNotification::DirectoryChanged)]
            },
            Err(reason) => {
                tracing::warn!(%reason, "unread count failed");
                Vec::new()
            },
        }
    }

    fn handle_history(
        &mut self,
        conversation_id: ConversationId,
        result: Result<Vec<Message>, String>,
        now: E::Instant,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let Some(session) =
            self.session.as_mut().filter(|session| session.conversation_id() == &conversation_id)
        else {
            tracing::debug!(%conversation_id, "history for inactive conversation discarded");
            return Ok(Vec::new());
        };

        match result {
            Ok(history) => {
                session.history_loaded(history);
                let mut out = vec![ClientAction::Notify(ClientNotification::MessagesChanged {
                    conversation_id: conversation_id.clone(),
                })];
                out.extend(self.mark_read(conversation_id, now)?);
                Ok(out)
            },
            Err(reason) => {
                tracing::warn!(%conversation_id, %reason, "history fetch failed");
                session.history_failed();
                Ok(vec![ClientAction::Notify(ClientNotification::HistoryFailed {
                    conversation_id,
                    reason,
                })])
            },
        }
    }

    fn handle_persisted(
        &mut self,
        conversation_id: ConversationId,
        temp_id: MessageId,
        result: Result<Message, String>,
        now: E::Instant,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let session =
            self.session.as_mut().filter(|session| session.conversation_id() == &conversation_id);

        let confirmed = match result {
            Ok(confirmed) => confirmed,
            Err(reason) => {
                tracing::warn!(%conversation_id, %temp_id, %reason, "send failed");
                if let Some(Err(error)) = session.map(|session| session.fail_send(&temp_id)) {
                    tracing::debug!(%error, "failed send has no pending entry");
                }
                return Ok(vec![ClientAction::Notify(ClientNotification::SendFailed {
                    conversation_id,
                    temp_id,
                    reason,
                })]);
            },
        };

        let mut out = Vec::new();

        if let Some(session) = session {
            match session.confirm_send(&temp_id, confirmed.clone()) {
                Ok(()) => out.push(ClientAction::Notify(ClientNotification::MessagesChanged {
                    conversation_id: conversation_id.clone(),
                })),
                Err(error) => tracing::warn!(%error, "confirmation matched no pending entry"),
            }
        }

        if self.directory.apply_new_message(&confirmed) {
            out.push(ClientAction::Notify(ClientNotification::DirectoryChanged));
        }

        let relay = outbound(Outbound::ChatMessage).with_json(&confirmed)?;
        out.extend(self.publish(relay, now));

        Ok(out)
    }

    /// Persist and publish a read marker, and reset the local unread count.
    fn mark_read(
        &mut self,
        conversation_id: ConversationId,
        now: E::Instant,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let frame = outbound(Outbound::MarkRead)
            .with_json(&MarkReadPayload { conversation_id: conversation_id.clone() })?;

        let mut out =
            vec![ClientAction::PersistMarkRead { conversation_id: conversation_id.clone() }];
        out.extend(self.publish(frame, now));

        if self.directory.mark_read(&conversation_id) {
            out.push(ClientAction::Notify(ClientNotification::DirectoryChanged));
        }

        Ok(out)
    }

    fn apply_connection(
        &mut self,
        actions: Vec<ConnectionAction>,
        now: E::Instant,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let mut out = Vec::new();

        for action in actions {
            match action {
                ConnectionAction::OpenTransport => out.push(ClientAction::OpenTransport),
                ConnectionAction::SendFrame(frame) => out.push(ClientAction::Send(frame)),
                ConnectionAction::SendHeartbeat => out.push(ClientAction::SendHeartbeat),
                ConnectionAction::CloseTransport { reason } => {
                    self.router.on_disconnected();
                    out.push(ClientAction::CloseTransport { reason });
                },
                ConnectionAction::Established => {
                    for frame in self.router.on_connected() {
                        out.extend(self.publish(frame, now));
                    }
                },
                ConnectionAction::ConnectivityChanged(connected) => {
                    if !connected {
                        self.router.on_disconnected();
                    }
                    out.push(ClientAction::Notify(ClientNotification::ConnectivityChanged(
                        connected,
                    )));
                },
                ConnectionAction::ReconnectScheduled { attempt, delay } => {
                    self.router.on_disconnected();
                    out.push(ClientAction::Notify(ClientNotification::ReconnectScheduled {
                        attempt,
                        delay,
                    }));
                },
                ConnectionAction::Deliver(frame) => {
                    if let Some(event) = self.dispatcher.dispatch(&self.router, &frame) {
                        out.extend(self.handle_inbound(event, now)?);
                    }
                },
            }
        }

        Ok(out)
    }

    fn handle_inbound(
        &mut self,
        event: InboundEvent,
        now: E::Instant,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let mut out = Vec::new();

        match event {
            InboundEvent::NewMessage(message) => {
                let conversation_id = message.conversation_id.clone();
                let remote = message.sender_id != self.identity.user_id;

                let appended = match self.session.as_mut() {
                    Some(session) if session.conversation_id() == &conversation_id => {
                        session.merge_incoming([message.clone()]) > 0
                    },
                    _ => false,
                };

                if self.directory.apply_new_message(&message) {
                    out.push(ClientAction::Notify(ClientNotification::DirectoryChanged));
                }

                if appended {
                    out.push(ClientAction::Notify(ClientNotification::MessagesChanged {
                        conversation_id: conversation_id.clone(),
                    }));
                    if remote {
                        out.extend(self.mark_read(conversation_id, now)?);
                    }
                }
            },
            InboundEvent::Typing(indicator) => {
                if let Some(change) = self.typing.apply(&indicator, now) {
                    out.push(ClientAction::Notify(ClientNotification::TypingChanged(change)));
                }
            },
            InboundEvent::ReadReceipt(receipt) => {
                let changed = match self.session.as_mut() {
                    Some(session) => session.apply_read_receipt(&receipt) > 0,
                    None => false,
                };
                if changed {
                    out.push(ClientAction::Notify(ClientNotification::MessagesChanged {
                        conversation_id: receipt.conversation_id,
                    }));
                }
            },
        }

        Ok(out)
    }

    fn stop_typing(&mut self, now: E::Instant) -> Result<Vec<ClientAction>, ClientError> {
        match (self.debounce.flush(), self.router.active_conversation().cloned()) {
            (Some(typing), Some(conversation_id)) => {
                Ok(self.publish_typing(conversation_id, typing, now)?.into_iter().collect())
            },
            _ => Ok(Vec::new()),
        }
    }

    fn publish_typing(
        &mut self,
        conversation_id: ConversationId,
        typing: bool,
        now: E::Instant,
    ) -> Result<Option<ClientAction>, ClientError> {
        let frame =
            outbound(Outbound::Typing).with_json(&TypingSignal { conversation_id, typing })?;
        Ok(self.publish(frame, now))
    }

    /// Real-time publishes are best effort; without a connection they are
    /// dropped.
    fn publish(&mut self, frame: Frame, now: E::Instant) -> Option<ClientAction> {
        match self.connection.publish(frame, now) {
            Ok(ConnectionAction::SendFrame(frame)) => Some(ClientAction::Send(frame)),
            Ok(_) => None,
            Err(error) => {
                tracing::debug!(%error, "publish dropped");
                None
            },
        }
    }
}

fn outbound(destination: Outbound) -> Frame {
    Frame::new(Command::Send).with_header("destination", destination.destination())
}
