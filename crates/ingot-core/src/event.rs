//! Events and hook outcomes.
//!
//! An [`Event`] is the unit carried through the hook bus. Topics are free-form
//! strings forming an implicit namespace; the names the engine itself emits or
//! listens on are collected in [`topics`].
//!
//! Every hook callback returns an [`Outcome`]: [`Outcome::Continue`] lets the
//! rest of the chain run, [`Outcome::Eat`] consumes the event and stops
//! dispatch for it.

use serde_json::Value;

/// Reserved topic names.
///
/// Services may register hooks on any string; these are the topics the engine
/// and its command router use themselves.
pub mod topics {
    /// A message delivered to a channel the bot is in.
    pub const CHANNEL_MESSAGE: &str = "message.channel";
    /// A message delivered directly to the bot.
    pub const PRIVATE_MESSAGE: &str = "message.private";
    /// A connection finished registering with its network.
    pub const CONNECTION_READY: &str = "connection.ready";
    /// A connection was closed.
    pub const CONNECTION_CLOSED: &str = "connection.closed";
    /// Live-reload notification, broadcast when the host receives SIGHUP.
    pub const SIGHUP: &str = "sighup";
}

/// The result of one hook invocation.
///
/// Replaces the "magic sentinel return value" pattern: every hook states
/// explicitly whether the event should keep propagating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Let the remaining hooks in the chain see the event.
    Continue,
    /// Consume the event; no later hook is invoked for it.
    Eat,
}

impl Outcome {
    /// Returns `true` for [`Outcome::Eat`].
    pub fn is_eat(self) -> bool {
        matches!(self, Outcome::Eat)
    }
}

/// One protocol event flowing through the hook bus.
///
/// The engine treats the wire protocol as opaque: whatever adapter feeds the
/// engine constructs `Event`s and submits them. Only the fields needed for
/// routing are structured; anything else rides in `payload`.
#[derive(Debug, Clone)]
pub struct Event {
    /// Bus topic, e.g. `"message.channel"`.
    pub topic: String,
    /// Name of the originating connection, if any.
    pub connection: Option<String>,
    /// Full hostmask (`nick!user@host`) of the originating user, if any.
    pub origin: Option<String>,
    /// Delivery target: a channel name or the bot's own nick.
    pub target: Option<String>,
    /// Message body for message-class events.
    pub text: Option<String>,
    /// Additional structured data attached by the adapter.
    pub payload: Value,
}

impl Event {
    /// Creates a bare event with only a topic, e.g. for `"sighup"`.
    pub fn bare(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            connection: None,
            origin: None,
            target: None,
            text: None,
            payload: Value::Null,
        }
    }

    /// Creates a message-class event.
    pub fn message(
        topic: impl Into<String>,
        connection: impl Into<String>,
        origin: impl Into<String>,
        target: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            connection: Some(connection.into()),
            origin: Some(origin.into()),
            target: Some(target.into()),
            text: Some(text.into()),
            payload: Value::Null,
        }
    }

    /// Attaches structured payload data (builder style).
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Returns `true` when this is one of the message-class topics the
    /// command router listens on.
    pub fn is_message(&self) -> bool {
        self.topic == topics::CHANNEL_MESSAGE || self.topic == topics::PRIVATE_MESSAGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_event_has_no_routing_fields() {
        let ev = Event::bare(topics::SIGHUP);
        assert_eq!(ev.topic, "sighup");
        assert!(ev.connection.is_none());
        assert!(ev.origin.is_none());
        assert!(!ev.is_message());
    }

    #[test]
    fn message_event_is_message() {
        let ev = Event::message(
            topics::CHANNEL_MESSAGE,
            "freenode",
            "alice!a@host",
            "#foo",
            "hello",
        );
        assert!(ev.is_message());
        assert_eq!(ev.text.as_deref(), Some("hello"));
    }

    #[test]
    fn outcome_eat() {
        assert!(Outcome::Eat.is_eat());
        assert!(!Outcome::Continue.is_eat());
    }
}
