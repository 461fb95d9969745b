//! Runtime tests.
//!
//! Run the real event loop against an in-memory connector (the test plays
//! the server end of each link) and an in-memory API, with virtual time for
//! the client's timers.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use dealroom_app::{
    ApiError, Connector, ConversationApi, Link, Runtime, RuntimeConfig, RuntimeError,
    RuntimeHandle, Snapshot, TransportError,
};
use dealroom_client::{
    ClientIdentity, ClientNotification, Credential, CredentialSource, StaticCredential,
};
use dealroom_core::env::test_utils::MockEnv;
use dealroom_proto::{
    Command, Conversation, ConversationId, ConversationStatus, Frame, Message, MessageId,
    MessageKind, MessageStatus, Packet, SendMessagePayload, TypingIndicator, UserId,
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::timeout,
};

const LOCAL_USER: u64 = 1;
const BRAND: u64 = 2;
const WAIT: Duration = Duration::from_secs(2);

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, minute, 0).unwrap()
}

fn message(id: u64, conversation: u64, sender: u64, minute: u32) -> Message {
    Message {
        id: MessageId::from(id),
        conversation_id: ConversationId::from(conversation),
        sender_id: UserId::from(sender),
        content: format!("message {id}"),
        kind: MessageKind::Text,
        status: MessageStatus::Sent,
        created_at: at(minute),
    }
}

fn conversation(id: u64, unread_count: u32) -> Conversation {
    Conversation {
        id: ConversationId::from(id),
        participant_id: UserId::from(BRAND),
        participant_name: "Acme Outdoor".into(),
        last_message_preview: None,
        last_message_at: None,
        unread_count,
        status: ConversationStatus::Active,
    }
}

/// Server half of a link opened by the runtime.
struct ServerEnd {
    from_client: mpsc::Receiver<Packet>,
    to_client: mpsc::Sender<Packet>,
}

impl ServerEnd {
    async fn recv_frame(&mut self) -> Frame {
        loop {
            let packet = timeout(WAIT, self.from_client.recv())
                .await
                .expect("client sent nothing")
                .expect("client closed the link");
            if let Packet::Frame(frame) = packet {
                return frame;
            }
        }
    }

    async fn send(&self, frame: Frame) {
        self.to_client.send(Packet::Frame(frame)).await.unwrap();
    }

    /// Answer CONNECT with heartbeats disabled and return the CONNECT frame.
    async fn accept_handshake(&mut self) -> Frame {
        let connect = self.recv_frame().await;
        assert_eq!(connect.command, Command::Connect);
        self.send(
            Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", "0,0"),
        )
        .await;
        connect
    }

    /// Next `count` frames, all SUBSCRIBE, as destination -> subscription id.
    async fn expect_subscriptions(&mut self, count: usize) -> HashMap<String, String> {
        let mut subscriptions = HashMap::new();
        for _ in 0..count {
            let frame = self.recv_frame().await;
            assert_eq!(frame.command, Command::Subscribe);
            subscriptions.insert(
                frame.header("destination").unwrap().to_string(),
                frame.header("id").unwrap().to_string(),
            );
        }
        subscriptions
    }

    async fn deliver(&self, subscription: &str, body: Vec<u8>) {
        self.send(
            Frame::new(Command::Message)
                .with_header("subscription", subscription)
                .with_header("message-id", "m-1")
                .with_body(body),
        )
        .await;
    }
}

#[derive(Clone)]
struct FakeConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl Connector for FakeConnector {
    fn connect(&self) -> impl Future<Output = Result<Link, TransportError>> + Send {
        let accepted = self.accepted.clone();
        async move {
            let (to_server, from_client) = mpsc::channel(64);
            let (to_client, from_server) = mpsc::channel(64);
            accepted
                .send(ServerEnd { from_client, to_client })
                .map_err(|_| TransportError::Connection("test server gone".into()))?;
            Ok(Link::new(to_server, from_server))
        }
    }
}

#[derive(Default)]
struct ApiState {
    conversations: Vec<Conversation>,
    history: HashMap<ConversationId, Vec<Message>>,
    unread: u32,
    fail_sends: bool,
    fail_history: bool,
    fail_mark_read: bool,
    history_requests: usize,
    sent: Vec<SendMessagePayload>,
    marked_read: Vec<ConversationId>,
}

#[derive(Clone, Default)]
struct FakeApi {
    state: Arc<Mutex<ApiState>>,
}

impl FakeApi {
    fn with<R>(&self, f: impl FnOnce(&mut ApiState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

impl ConversationApi for FakeApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        Ok(self.with(|state| state.conversations.clone()))
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ApiError> {
        self.with(|state| {
            state.history_requests += 1;
            if state.fail_history {
                return Err(ApiError::Status { status: 500, body: "history down".into() });
            }
            Ok(state.history.get(conversation_id).cloned().unwrap_or_default())
        })
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        payload: &SendMessagePayload,
    ) -> Result<Message, ApiError> {
        self.with(|state| {
            if state.fail_sends {
                return Err(ApiError::Status { status: 503, body: "unavailable".into() });
            }
            state.sent.push(payload.clone());
            let id = 500 + state.sent.len() as u64 - 1;
            Ok(Message {
                id: MessageId::from(id),
                conversation_id: conversation_id.clone(),
                sender_id: UserId::from(LOCAL_USER),
                content: payload.content.clone(),
                kind: payload.kind,
                status: MessageStatus::Sent,
                created_at: at(30),
            })
        })
    }

    async fn mark_read(&self, conversation_id: &ConversationId) -> Result<(), ApiError> {
        self.with(|state| {
            state.marked_read.push(conversation_id.clone());
            if state.fail_mark_read {
                return Err(ApiError::Transport("connection reset".into()));
            }
            Ok(())
        })
    }

    async fn unread_count(&self) -> Result<u32, ApiError> {
        Ok(self.with(|state| state.unread))
    }
}

struct Harness {
    env: MockEnv,
    api: FakeApi,
    handle: RuntimeHandle,
    accepted: mpsc::UnboundedReceiver<ServerEnd>,
    task: JoinHandle<()>,
}

impl Harness {
    fn start(credential: Option<&str>) -> Self {
        let env = MockEnv::new();
        let api = FakeApi::default();
        let (accepted_tx, accepted) = mpsc::unbounded_channel();

        let credentials: Arc<dyn CredentialSource> = Arc::new(match credential {
            Some(token) => StaticCredential::new(Credential::new(token)),
            None => StaticCredential::none(),
        });
        let config =
            RuntimeConfig { tick_interval: Duration::from_millis(5), ..RuntimeConfig::default() };

        let (runtime, handle) = Runtime::new(
            env.clone(),
            ClientIdentity::new(LOCAL_USER),
            credentials,
            FakeConnector { accepted: accepted_tx },
            api.clone(),
            config,
        );
        let task = tokio::spawn(runtime.run());

        Self { env, api, handle, accepted, task }
    }

    async fn accept(&mut self) -> ServerEnd {
        timeout(WAIT, self.accepted.recv()).await.expect("no transport opened").unwrap()
    }

    /// Connect and complete the handshake plus session subscriptions.
    async fn connect(&mut self) -> ServerEnd {
        self.handle.connect().await.unwrap();
        let mut server = self.accept().await;
        server.accept_handshake().await;
        server.expect_subscriptions(2).await;

        let mut connectivity = self.handle.connectivity();
        timeout(WAIT, connectivity.wait_for(|connected| *connected)).await.unwrap().unwrap();
        server
    }

    /// Activate and drain the three SUBSCRIBEs and the read marker that
    /// follows the history load.
    async fn activate(&self, server: &mut ServerEnd, id: u64) -> HashMap<String, String> {
        self.handle.activate(ConversationId::from(id)).await.unwrap();
        let subscriptions = server.expect_subscriptions(3).await;

        let read = server.recv_frame().await;
        assert_eq!(read.command, Command::Send);
        assert_eq!(read.header("destination"), Some("/app/chat.read"));
        subscriptions
    }

    async fn eventually(&self, condition: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let snapshot = self.handle.snapshot().await.unwrap();
            if condition(&snapshot) {
                return snapshot;
            }
            assert!(tokio::time::Instant::now() < deadline, "condition not met: {snapshot:?}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

async fn next_matching(
    notifications: &mut broadcast::Receiver<ClientNotification>,
    predicate: impl Fn(&ClientNotification) -> bool,
) -> ClientNotification {
    timeout(WAIT, async {
        loop {
            let notification = notifications.recv().await.unwrap();
            if predicate(&notification) {
                return notification;
            }
        }
    })
    .await
    .expect("notification not emitted")
}

fn ids(snapshot: &Snapshot) -> Vec<&str> {
    snapshot.messages.iter().map(|m| m.id.as_str()).collect()
}

#[tokio::test]
async fn connect_authenticates_and_subscribes_session_topics() {
    let mut harness = Harness::start(Some("jwt-token"));
    harness.handle.connect().await.unwrap();

    let mut server = harness.accept().await;
    let connect = server.accept_handshake().await;
    assert_eq!(connect.header("Authorization"), Some("Bearer jwt-token"));
    assert_eq!(connect.header("accept-version"), Some("1.2"));

    let subscriptions = server.expect_subscriptions(2).await;
    assert!(subscriptions.contains_key("/user/queue/messages"));
    assert!(subscriptions.contains_key("/user/queue/notifications"));

    let mut connectivity = harness.handle.connectivity();
    timeout(WAIT, connectivity.wait_for(|connected| *connected)).await.unwrap().unwrap();
    assert!(harness.handle.is_connected());
}

#[tokio::test]
async fn missing_credential_never_opens_transport() {
    let mut harness = Harness::start(None);
    harness.handle.connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.accepted.try_recv().is_err());
    assert!(!harness.handle.snapshot().await.unwrap().connected);
}

#[tokio::test]
async fn activation_loads_history_and_marks_read() {
    let mut harness = Harness::start(Some("jwt-token"));
    harness.api.with(|state| {
        let history = vec![message(10, 7, BRAND, 1), message(11, 7, LOCAL_USER, 2)];
        state.history.insert(ConversationId::from(7_u64), history);
    });

    let mut server = harness.connect().await;
    let subscriptions = harness.activate(&mut server, 7).await;

    let mut destinations: Vec<&str> = subscriptions.keys().map(String::as_str).collect();
    destinations.sort_unstable();
    assert_eq!(destinations, vec![
        "/topic/conversation.7",
        "/topic/conversation.7.read",
        "/topic/conversation.7.typing",
    ]);

    let snapshot = harness.eventually(|s| s.messages.len() == 2).await;
    assert_eq!(ids(&snapshot), vec!["10", "11"]);
    assert_eq!(snapshot.active_conversation, Some(ConversationId::from(7_u64)));

    let marked = timeout(WAIT, async {
        loop {
            let marked = harness.api.with(|state| state.marked_read.clone());
            if !marked.is_empty() {
                return marked;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(marked, vec![ConversationId::from(7_u64)]);
}

#[tokio::test]
async fn failed_history_leaves_list_empty_and_is_not_refetched() {
    let harness = Harness::start(Some("jwt-token"));
    harness.api.with(|state| state.fail_history = true);
    let mut notifications = harness.handle.notifications();

    harness.handle.activate(ConversationId::from(7_u64)).await.unwrap();
    let failed = next_matching(&mut notifications, |n| {
        matches!(n, ClientNotification::HistoryFailed { .. })
    })
    .await;
    let ClientNotification::HistoryFailed { conversation_id, .. } = failed else { unreachable!() };
    assert_eq!(conversation_id, ConversationId::from(7_u64));

    harness.handle.activate(ConversationId::from(7_u64)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snapshot = harness.handle.snapshot().await.unwrap();
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.active_conversation, Some(ConversationId::from(7_u64)));
    assert_eq!(harness.api.with(|state| state.history_requests), 1);
}

#[tokio::test]
async fn mark_read_failure_is_swallowed() {
    let harness = Harness::start(Some("jwt-token"));
    harness.api.with(|state| {
        state.conversations = vec![conversation(7, 2), conversation(8, 1)];
        state.fail_mark_read = true;
    });
    harness.handle.load_conversations().await.unwrap();
    harness.eventually(|s| s.unread_total == 3).await;

    harness.handle.mark_read(ConversationId::from(7_u64)).await.unwrap();

    let marked = timeout(WAIT, async {
        loop {
            let marked = harness.api.with(|state| state.marked_read.clone());
            if !marked.is_empty() {
                return marked;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(marked, vec![ConversationId::from(7_u64)]);

    // The local reset stands and the runtime keeps serving requests.
    let snapshot = harness.eventually(|s| s.unread_total == 1).await;
    let entry =
        snapshot.conversations.iter().find(|c| c.id == ConversationId::from(7_u64)).unwrap();
    assert_eq!(entry.unread_count, 0);
    assert!(!harness.task.is_finished());
}

#[tokio::test]
async fn send_is_confirmed_relayed_and_echo_deduplicated() {
    let mut harness = Harness::start(Some("jwt-token"));
    let mut server = harness.connect().await;
    let subscriptions = harness.activate(&mut server, 7).await;

    harness.handle.send(SendMessagePayload::text("hello")).await.unwrap();

    let relay = server.recv_frame().await;
    assert_eq!(relay.command, Command::Send);
    assert_eq!(relay.header("destination"), Some("/app/chat.send"));
    let relayed: Message = relay.json().unwrap();
    assert_eq!(relayed.id, MessageId::from(500_u64));
    assert_eq!(relayed.content, "hello");

    // Echo of our own message, then a reply from the brand
    let topic = &subscriptions["/topic/conversation.7"];
    server.deliver(topic, serde_json::to_vec(&relayed).unwrap()).await;
    server.deliver(topic, serde_json::to_vec(&message(501, 7, BRAND, 31)).unwrap()).await;

    let snapshot = harness.eventually(|s| s.messages.len() >= 2).await;
    assert_eq!(ids(&snapshot), vec!["500", "501"]);
}

#[tokio::test]
async fn failed_send_keeps_optimistic_entry() {
    let harness = Harness::start(Some("jwt-token"));
    harness.api.with(|state| state.fail_sends = true);
    let mut notifications = harness.handle.notifications();

    harness.handle.activate(ConversationId::from(7_u64)).await.unwrap();
    harness.handle.send(SendMessagePayload::text("lost")).await.unwrap();

    let failed = next_matching(&mut notifications, |n| {
        matches!(n, ClientNotification::SendFailed { .. })
    })
    .await;
    let ClientNotification::SendFailed { temp_id, .. } = failed else { unreachable!() };
    assert!(temp_id.is_temporary());

    let snapshot = harness.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].id, temp_id);
    assert_eq!(snapshot.messages[0].status, MessageStatus::Sent);
}

#[tokio::test]
async fn send_without_active_conversation_is_rejected() {
    let harness = Harness::start(Some("jwt-token"));

    let result = harness.handle.send(SendMessagePayload::text("nowhere")).await;
    assert!(matches!(result, Err(RuntimeError::Client(_))));
}

#[tokio::test]
async fn peer_close_backs_off_then_resubscribes_everything() {
    let mut harness = Harness::start(Some("jwt-token"));
    let mut server = harness.connect().await;
    harness.activate(&mut server, 7).await;

    let mut notifications = harness.handle.notifications();
    let mut connectivity = harness.handle.connectivity();
    drop(server);

    timeout(WAIT, connectivity.wait_for(|connected| !*connected)).await.unwrap().unwrap();
    let scheduled = next_matching(&mut notifications, |n| {
        matches!(n, ClientNotification::ReconnectScheduled { .. })
    })
    .await;
    assert_eq!(scheduled, ClientNotification::ReconnectScheduled {
        attempt: 1,
        delay: Duration::from_millis(2000),
    });

    // Virtual time has not moved, so no retry yet
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.accepted.try_recv().is_err());

    harness.env.advance(Duration::from_millis(2000));
    let mut server = harness.accept().await;
    server.accept_handshake().await;

    let subscriptions = server.expect_subscriptions(5).await;
    assert_eq!(subscriptions.len(), 5);
    for destination in [
        "/user/queue/messages",
        "/user/queue/notifications",
        "/topic/conversation.7",
        "/topic/conversation.7.typing",
        "/topic/conversation.7.read",
    ] {
        assert!(subscriptions.contains_key(destination), "missing {destination}");
    }

    timeout(WAIT, connectivity.wait_for(|connected| *connected)).await.unwrap().unwrap();
}

#[tokio::test]
async fn remote_typing_shows_then_expires() {
    let mut harness = Harness::start(Some("jwt-token"));
    let mut server = harness.connect().await;
    let subscriptions = harness.activate(&mut server, 7).await;

    let indicator = TypingIndicator {
        conversation_id: ConversationId::from(7_u64),
        user_id: UserId::from(BRAND),
        typing: true,
    };
    let typing = &subscriptions["/topic/conversation.7.typing"];
    server.deliver(typing, serde_json::to_vec(&indicator).unwrap()).await;

    harness.eventually(|s| s.typing == Some(UserId::from(BRAND))).await;

    harness.env.advance(Duration::from_millis(3001));
    harness.eventually(|s| s.typing.is_none()).await;
}

#[tokio::test]
async fn load_conversations_fills_directory() {
    let harness = Harness::start(Some("jwt-token"));
    harness.api.with(|state| {
        state.conversations = vec![conversation(7, 2), conversation(8, 0)];
        state.unread = 5;
    });

    harness.handle.load_conversations().await.unwrap();

    let snapshot = harness.eventually(|s| s.conversations.len() == 2).await;
    assert_eq!(snapshot.unread_total, 2);
}

#[tokio::test]
async fn shutdown_disconnects_and_stops() {
    let mut harness = Harness::start(Some("jwt-token"));
    let mut server = harness.connect().await;

    harness.handle.shutdown().await.unwrap();

    let disconnect = server.recv_frame().await;
    assert_eq!(disconnect.command, Command::Disconnect);

    timeout(WAIT, harness.task).await.unwrap().unwrap();
    assert!(matches!(harness.handle.connect().await, Err(RuntimeError::Stopped)));
}

#[cfg(feature = "transport")]
#[tokio::test]
async fn network_runtime_dials_configured_endpoint() {
    let config = RuntimeConfig {
        ws_url: "ws://127.0.0.1:1/ws".into(),
        api_base_url: "http://127.0.0.1:1/api".into(),
        ..RuntimeConfig::default()
    };
    let credentials: Arc<dyn CredentialSource> =
        Arc::new(StaticCredential::new(Credential::new("jwt-token")));
    let (runtime, handle) =
        Runtime::over_network(ClientIdentity::new(LOCAL_USER), credentials, config);
    let task = tokio::spawn(runtime.run());
    let mut notifications = handle.notifications();

    // Nothing listens on port 1, so the dial fails and a retry is scheduled.
    handle.connect().await.unwrap();
    let scheduled = next_matching(&mut notifications, |n| {
        matches!(n, ClientNotification::ReconnectScheduled { .. })
    })
    .await;
    assert!(matches!(scheduled, ClientNotification::ReconnectScheduled { attempt: 1, .. }));

    handle.shutdown().await.unwrap();
    timeout(WAIT, task).await.unwrap().unwrap();
}
