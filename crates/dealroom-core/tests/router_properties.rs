//! Property-based tests for subscription routing.
//!
//! Applies arbitrary sequences of activations, deactivations and connection
//! drops to a router and checks the exclusivity and re-subscription
//! invariants after every step.

use std::collections::HashSet;

use dealroom_core::{FrameDispatcher, Route, Scope, SubscriptionRouter};
use dealroom_proto::{Command, ConversationId, Frame, Topic};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Activate(u8),
    Deactivate,
    Drop,
    Reconnect,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..4).prop_map(Op::Activate),
        1 => Just(Op::Deactivate),
        1 => Just(Op::Drop),
        2 => Just(Op::Reconnect),
    ]
}

fn message_body(conversation: &ConversationId) -> String {
    format!(
        r#"{{"id": 1, "conversationId": "{conversation}", "senderId": 2,
            "content": "x", "createdAt": "2024-03-01T09:30:00Z"}}"#
    )
}

proptest! {
    #[test]
    fn prop_at_most_one_conversation_scope(ops in prop::collection::vec(op(), 1..40)) {
        let mut router = SubscriptionRouter::new();
        router.subscribe_session(Topic::DirectMessages, Route::Envelope);
        router.subscribe_session(Topic::Notifications, Route::Envelope);
        let mut seen_ids = HashSet::new();

        for op in ops {
            let frames = match op {
                Op::Activate(n) => router.activate_conversation(ConversationId::from(u64::from(n))),
                Op::Deactivate => router.deactivate_conversation(),
                Op::Drop => {
                    router.on_disconnected();
                    Vec::new()
                },
                Op::Reconnect => router.on_connected(),
            };

            // PROPERTY: subscription ids are never reused.
            for frame in frames.iter().filter(|f| f.command == Command::Subscribe) {
                let id = frame.header("id").unwrap().to_string();
                prop_assert!(seen_ids.insert(id));
            }

            let scoped: Vec<_> = router
                .subscriptions()
                .filter_map(|sub| match &sub.scope {
                    Scope::Conversation(id) => Some(id.clone()),
                    Scope::Session => None,
                })
                .collect();
            let session = router.subscriptions().filter(|sub| sub.scope == Scope::Session).count();

            if router.is_connected() {
                prop_assert_eq!(session, 2);
                match router.active_conversation() {
                    Some(active) => {
                        prop_assert_eq!(scoped.len(), 3);
                        prop_assert!(scoped.iter().all(|id| id == active));
                    },
                    None => prop_assert!(scoped.is_empty()),
                }
            } else {
                prop_assert_eq!(router.subscriptions().count(), 0);
            }
        }
    }

    #[test]
    fn prop_old_conversation_receives_nothing_after_switch(a in 0u64..100, b in 100u64..200) {
        let mut router = SubscriptionRouter::new();
        router.on_connected();
        router.activate_conversation(ConversationId::from(a));

        let old_ids: Vec<String> = router.subscriptions().map(|sub| sub.id.to_string()).collect();
        router.activate_conversation(ConversationId::from(b));

        let mut dispatcher = FrameDispatcher::new();
        let body = message_body(&ConversationId::from(a));
        for id in &old_ids {
            let frame = Frame::new(Command::Message)
                .with_header("subscription", id.as_str())
                .with_body(body.clone().into_bytes());
            prop_assert!(dispatcher.dispatch(&router, &frame).is_none());
        }

        let tagged_b = router
            .subscriptions()
            .filter(|sub| sub.scope == Scope::Conversation(ConversationId::from(b)))
            .count();
        prop_assert_eq!(tagged_b, 3);
    }
}
