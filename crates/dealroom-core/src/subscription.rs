//! Topic subscription bookkeeping.
//!
//! The router remembers two kinds of interest: session-scoped topics that
//! live for the whole connection, and the single active conversation whose
//! three topics live only until another conversation is activated. Interest
//! survives disconnects; live subscriptions do not. After every CONNECTED the
//! router re-subscribes everything with fresh ids, session topics first.
//!
//! # Invariants
//!
//! - At most one conversation's scoped subscriptions are live
//! - Switching conversations unsubscribes the old set before subscribing the
//!   new one
//! - Subscription ids are never reused, so a late frame addressed to a
//!   torn-down subscription finds no route

use std::{collections::BTreeMap, fmt};

use dealroom_proto::{Command, ConversationId, Frame, Topic};

/// Router-unique subscription id, rendered as `sub-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    const PREFIX: &'static str = "sub-";

    /// Parse the `subscription` header of a MESSAGE frame.
    pub fn parse(header: &str) -> Option<Self> {
        header.strip_prefix(Self::PREFIX)?.parse().ok().map(Self)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

/// How frames on a subscription are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Tagged `{"type", "payload"}` envelope
    Envelope,
    /// Bare message
    Messages,
    /// Bare typing indicator
    Typing,
    /// Bare read receipt
    ReadReceipts,
}

impl Route {
    /// Natural route for a topic.
    pub fn for_topic(topic: &Topic) -> Self {
        match topic {
            Topic::DirectMessages | Topic::Notifications => Self::Envelope,
            Topic::ConversationMessages(_) => Self::Messages,
            Topic::ConversationTyping(_) => Self::Typing,
            Topic::ConversationReadReceipts(_) => Self::ReadReceipts,
        }
    }
}

/// Lifetime class of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Lives for the whole connection
    Session,
    /// Lives while this conversation is active
    Conversation(ConversationId),
}

/// A live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Id sent in SUBSCRIBE
    pub id: SubscriptionId,
    /// Subscribed topic
    pub topic: Topic,
    /// Decoder for its frames
    pub route: Route,
    /// Lifetime class
    pub scope: Scope,
}

/// Topic-to-route bookkeeping and re-subscription.
///
/// Methods return the SUBSCRIBE/UNSUBSCRIBE frames to publish; nothing is
/// returned while disconnected.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRouter {
    session: Vec<(Topic, Route)>,
    active: Option<ConversationId>,
    live: BTreeMap<SubscriptionId, Subscription>,
    next_id: u64,
    connected: bool,
}

impl SubscriptionRouter {
    /// Empty router, disconnected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session-scoped topic. Registering the same topic twice is
    /// a no-op.
    pub fn subscribe_session(&mut self, topic: Topic, route: Route) -> Vec<Frame> {
        if self.session.iter().any(|(registered, _)| *registered == topic) {
            return Vec::new();
        }

        self.session.push((topic.clone(), route));

        if self.connected {
            vec![self.subscribe(topic, route, Scope::Session)]
        } else {
            Vec::new()
        }
    }

    /// Make `conversation_id` the active conversation.
    ///
    /// Tears down the previous conversation's subscriptions, then subscribes
    /// the three topics of the new one. While disconnected only the intent is
    /// recorded. Re-activating the current conversation is a no-op.
    pub fn activate_conversation(&mut self, conversation_id: ConversationId) -> Vec<Frame> {
        if self.active.as_ref() == Some(&conversation_id) {
            return Vec::new();
        }

        let mut frames = self.unsubscribe_conversation();
        tracing::debug!(%conversation_id, "activating conversation");

        if self.connected {
            frames.extend(self.subscribe_conversation(&conversation_id));
        }
        self.active = Some(conversation_id);

        frames
    }

    /// Drop the active conversation, if any.
    pub fn deactivate_conversation(&mut self) -> Vec<Frame> {
        let frames = self.unsubscribe_conversation();
        self.active = None;
        frames
    }

    /// Handshake completed: subscribe everything registered.
    pub fn on_connected(&mut self) -> Vec<Frame> {
        self.connected = true;
        self.live.clear();

        let mut frames: Vec<Frame> = self
            .session
            .clone()
            .into_iter()
            .map(|(topic, route)| self.subscribe(topic, route, Scope::Session))
            .collect();

        if let Some(conversation_id) = self.active.clone() {
            frames.extend(self.subscribe_conversation(&conversation_id));
        }

        tracing::debug!(count = frames.len(), "re-subscribed");
        frames
    }

    /// Transport lost: live subscriptions are gone, interest remains.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.live.clear();
    }

    /// Forget everything, including registered interest.
    pub fn clear(&mut self) {
        self.connected = false;
        self.live.clear();
        self.session.clear();
        self.active = None;
    }

    /// Live subscription for a MESSAGE frame's `subscription` header.
    pub fn route(&self, subscription: &str) -> Option<&Subscription> {
        SubscriptionId::parse(subscription).and_then(|id| self.live.get(&id))
    }

    /// Currently active conversation.
    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// Live subscriptions in id order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.live.values()
    }

    /// Whether subscriptions are live.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn subscribe_conversation(&mut self, conversation_id: &ConversationId) -> Vec<Frame> {
        Topic::conversation_topics(conversation_id)
            .into_iter()
            .map(|topic| {
                let route = Route::for_topic(&topic);
                self.subscribe(topic, route, Scope::Conversation(conversation_id.clone()))
            })
            .collect()
    }

    fn unsubscribe_conversation(&mut self) -> Vec<Frame> {
        let stale: Vec<SubscriptionId> = self
            .live
            .values()
            .filter(|sub| matches!(sub.scope, Scope::Conversation(_)))
            .map(|sub| sub.id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.live.remove(&id))
            .map(|sub| {
                tracing::trace!(subscription = %sub.id, topic = %sub.topic, "unsubscribe");
                Frame::new(Command::Unsubscribe).with_header("id", sub.id.to_string())
            })
            .collect()
    }

    fn subscribe(&mut self, topic: Topic, route: Route, scope: Scope) -> Frame {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);

        tracing::trace!(subscription = %id, %topic, "subscribe");

        let frame = Frame::new(Command::Subscribe)
            .with_header("id", id.to_string())
            .with_header("destination", topic.destination())
            .with_header("ack", "auto");

        self.live.insert(id, Subscription { id, topic, route, scope });
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destinations(frames: &[Frame], command: Command) -> Vec<String> {
        frames
            .iter()
            .filter(|frame| frame.command == command)
            .filter_map(|frame| frame.header("destination").map(str::to_string))
            .collect()
    }

    fn session_router() -> SubscriptionRouter {
        let mut router = SubscriptionRouter::new();
        router.subscribe_session(Topic::DirectMessages, Route::Envelope);
        router.subscribe_session(Topic::Notifications, Route::Envelope);
        router
    }

    #[test]
    fn activation_while_disconnected_records_intent() {
        let mut router = session_router();
        assert!(router.activate_conversation(ConversationId::from(7_u64)).is_empty());
        assert_eq!(router.subscriptions().count(), 0);

        let frames = router.on_connected();
        assert_eq!(destinations(&frames, Command::Subscribe), vec![
            "/user/queue/messages",
            "/user/queue/notifications",
            "/topic/conversation.7",
            "/topic/conversation.7.typing",
            "/topic/conversation.7.read",
        ]);
        assert_eq!(frames[0].header("id"), Some("sub-1"));
        assert_eq!(frames[0].header("ack"), Some("auto"));
    }

    #[test]
    fn switching_tears_down_before_subscribing() {
        let mut router = session_router();
        router.on_connected();
        router.activate_conversation(ConversationId::from("a"));

        let frames = router.activate_conversation(ConversationId::from("b"));
        let commands: Vec<Command> = frames.iter().map(|frame| frame.command).collect();
        assert_eq!(commands, vec![
            Command::Unsubscribe,
            Command::Unsubscribe,
            Command::Unsubscribe,
            Command::Subscribe,
            Command::Subscribe,
            Command::Subscribe,
        ]);

        let scoped: Vec<&Subscription> = router
            .subscriptions()
            .filter(|sub| matches!(sub.scope, Scope::Conversation(_)))
            .collect();
        assert_eq!(scoped.len(), 3);
        assert!(scoped.iter().all(|sub| sub.scope == Scope::Conversation("b".into())));
    }

    #[test]
    fn reactivating_same_conversation_is_a_no_op() {
        let mut router = session_router();
        router.on_connected();
        router.activate_conversation(ConversationId::from(1_u64));
        assert!(router.activate_conversation(ConversationId::from(1_u64)).is_empty());
        assert_eq!(router.subscriptions().count(), 5);
    }

    #[test]
    fn stale_ids_find_no_route() {
        let mut router = session_router();
        router.on_connected();
        router.activate_conversation(ConversationId::from(1_u64));

        let old = router
            .subscriptions()
            .find(|sub| sub.route == Route::Messages)
            .map(|sub| sub.id.to_string())
            .unwrap();

        router.on_disconnected();
        assert!(router.route(&old).is_none());

        router.on_connected();
        assert!(router.route(&old).is_none());
        assert_eq!(router.subscriptions().count(), 5);
    }

    #[test]
    fn deactivate_and_clear() {
        let mut router = session_router();
        router.on_connected();
        router.activate_conversation(ConversationId::from(1_u64));

        assert_eq!(destinations(&router.deactivate_conversation(), Command::Subscribe).len(), 0);
        assert_eq!(router.subscriptions().count(), 2);
        assert!(router.active_conversation().is_none());

        router.clear();
        assert!(router.on_connected().is_empty());
    }

    #[test]
    fn subscription_id_parsing() {
        assert_eq!(SubscriptionId::parse("sub-12"), Some(SubscriptionId(12)));
        assert_eq!(SubscriptionId::parse("12"), None);
        assert_eq!(SubscriptionId::parse("sub-x"), None);
    }
}
