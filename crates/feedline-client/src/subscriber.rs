//! Subscriber callbacks.
//!
//! A [`Subscriber`] receives the handshake, every event, and every transport
//! error of the connection it is attached to. Callbacks run on the
//! transport's task and must not block.
//!
//! Two ready-made implementations:
//! - [`CallbackSubscriber`]: closures, with optional connected/error hooks
//! - [`ChannelSubscriber`]: forwards [`FeedUpdate`]s to an unbounded channel

use feedline_core::Handshake;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Receiver of one connection's events.
pub trait Subscriber: Send + Sync {
    /// Connection established (fires at most once per connection).
    fn on_connected(&self, _handshake: &Handshake) {}

    /// Server event, in transport order.
    fn on_event(&self, name: &str, data: &Value);

    /// Transport cycle failed.
    fn on_error(&self, _error: &TransportError) {}
}

type ConnectedFn = Box<dyn Fn(&Handshake) + Send + Sync>;
type EventFn = Box<dyn Fn(&str, &Value) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&TransportError) + Send + Sync>;

/// Closure-backed subscriber.
pub struct CallbackSubscriber {
    on_connected: Option<ConnectedFn>,
    on_event: EventFn,
    on_error: Option<ErrorFn>,
}

impl CallbackSubscriber {
    /// Subscriber that only handles events.
    pub fn new(on_event: impl Fn(&str, &Value) + Send + Sync + 'static) -> Self {
        Self {
            on_connected: None,
            on_event: Box::new(on_event),
            on_error: None,
        }
    }

    /// Add a handshake hook.
    #[must_use]
    pub fn with_connected(mut self, f: impl Fn(&Handshake) + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Box::new(f));
        self
    }

    /// Add an error hook.
    #[must_use]
    pub fn with_error(mut self, f: impl Fn(&TransportError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl Subscriber for CallbackSubscriber {
    fn on_connected(&self, handshake: &Handshake) {
        if let Some(f) = &self.on_connected {
            f(handshake);
        }
    }

    fn on_event(&self, name: &str, data: &Value) {
        (self.on_event)(name, data);
    }

    fn on_error(&self, error: &TransportError) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }
}

/// One callback invocation, as a value.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedUpdate {
    /// Handshake delivered.
    Connected(Handshake),
    /// Server event.
    Event {
        /// Event name.
        name: String,
        /// Event payload.
        data: Value,
    },
    /// Transport failure.
    Error(TransportError),
}

/// Subscriber that forwards every callback to a channel.
///
/// Updates sent after the receiver is dropped are discarded.
#[derive(Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<FeedUpdate>,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FeedUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, update: FeedUpdate) {
        let _ = self.tx.send(update);
    }
}

impl Subscriber for ChannelSubscriber {
    fn on_connected(&self, handshake: &Handshake) {
        self.forward(FeedUpdate::Connected(handshake.clone()));
    }

    fn on_event(&self, name: &str, data: &Value) {
        self.forward(FeedUpdate::Event {
            name: name.to_string(),
            data: data.clone(),
        });
    }

    fn on_error(&self, error: &TransportError) {
        self.forward(FeedUpdate::Error(error.clone()));
    }
}
