//! Inbound frame decoding.
//!
//! Every MESSAGE frame enters application state through
//! [`FrameDispatcher::dispatch`]. The frame's `subscription` header selects a
//! live [`Subscription`], whose [`Route`] decides how the body is decoded.
//! Anything that cannot be attributed or decoded is logged and dropped; a bad
//! frame never affects the subscription or any other frame.

use dealroom_proto::{Frame, InboundEvent, Message, ReadReceipt, TypingIndicator};

use crate::subscription::{Route, Scope, Subscription, SubscriptionRouter};

/// Decodes routed frames into [`InboundEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct FrameDispatcher {
    delivered: u64,
    dropped: u64,
}

impl FrameDispatcher {
    /// Fresh dispatcher with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one MESSAGE frame. `None` if it was dropped.
    pub fn dispatch(&mut self, router: &SubscriptionRouter, frame: &Frame) -> Option<InboundEvent> {
        let Some(header) = frame.header("subscription") else {
            tracing::warn!(command = %frame.command, "frame without subscription header dropped");
            self.dropped += 1;
            return None;
        };

        let Some(subscription) = router.route(header) else {
            tracing::debug!(subscription = header, "no live subscription, frame dropped");
            self.dropped += 1;
            return None;
        };

        match decode(subscription, frame) {
            Ok(event) => {
                self.delivered += 1;
                tracing::trace!(
                    subscription = header,
                    kind = ?event.kind(),
                    conversation_id = %event.conversation_id(),
                    "dispatched"
                );
                Some(event)
            },
            Err(reason) => {
                tracing::warn!(
                    subscription = header,
                    topic = %subscription.topic,
                    %reason,
                    "undecodable frame dropped"
                );
                self.dropped += 1;
                None
            },
        }
    }

    /// Frames turned into events.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Frames dropped for any reason.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

fn decode(subscription: &Subscription, frame: &Frame) -> Result<InboundEvent, String> {
    let event = match subscription.route {
        Route::Envelope => frame.json::<InboundEvent>(),
        Route::Messages => frame.json::<Message>().map(InboundEvent::NewMessage),
        Route::Typing => frame.json::<TypingIndicator>().map(InboundEvent::Typing),
        Route::ReadReceipts => frame.json::<ReadReceipt>().map(InboundEvent::ReadReceipt),
    }
    .map_err(|error| error.to_string())?;

    match &subscription.scope {
        Scope::Conversation(expected) if event.conversation_id() != expected => Err(format!(
            "payload for conversation {} on topic of {expected}",
            event.conversation_id()
        )),
        _ => Ok(event),
    }
}
