//! One shared connection per identity.

use std::sync::Arc;

use feedline_core::{Handshake, Identity};

use crate::dispatcher::{Dispatcher, SubscriberId};
use crate::subscriber::Subscriber;
use crate::transport::{EventTransport, TransportMode};

/// A live feed for one identity: its dispatcher plus the transport driving it.
///
/// Created and torn down by the [`Registry`](crate::Registry); subscribers
/// only ever see it through a [`Subscription`](crate::Subscription).
pub struct Connection {
    dispatcher: Arc<Dispatcher>,
    transport: Box<dyn EventTransport>,
}

impl Connection {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, transport: Box<dyn EventTransport>) -> Self {
        Self {
            dispatcher,
            transport,
        }
    }

    /// Identity this connection serves.
    pub fn identity(&self) -> &Identity {
        self.dispatcher.identity()
    }

    /// Transport in use.
    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    /// Highest event id delivered so far.
    pub fn cursor(&self) -> u64 {
        self.dispatcher.cursor()
    }

    /// Attached subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.dispatcher.len()
    }

    /// Whether the handshake has fired.
    pub fn handshake_delivered(&self) -> bool {
        self.dispatcher.handshake_delivered()
    }

    /// Whether the transport is paused.
    pub fn is_paused(&self) -> bool {
        self.transport.is_paused()
    }

    /// Whether the connection was closed.
    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }

    pub(crate) fn attach(&self, subscriber: Arc<dyn Subscriber>) -> (SubscriberId, Option<Handshake>) {
        self.dispatcher.add(subscriber)
    }

    pub(crate) fn detach(&self, id: SubscriberId) -> usize {
        self.dispatcher.remove(id)
    }

    pub(crate) fn start(&self) {
        self.transport.start();
    }

    pub(crate) fn pause(&self) {
        self.transport.pause();
    }

    pub(crate) fn resume(&self) {
        self.transport.resume();
    }

    pub(crate) fn close(&self) {
        self.dispatcher.close();
        self.transport.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("identity", self.identity())
            .field("mode", &self.mode())
            .field("cursor", &self.cursor())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
