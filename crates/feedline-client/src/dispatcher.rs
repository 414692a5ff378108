//! Per-connection fan-out state.
//!
//! The [`Dispatcher`] is the half of a connection that transports write
//! into: the subscriber set, the resumable cursor, and the one-time
//! handshake. Subscriber callbacks always run on a snapshot taken under the
//! lock and invoked after it is released, so a callback may safely close its
//! own subscription.

use std::collections::BTreeMap;
use std::sync::Arc;

use feedline_core::{FeedEvent, Handshake, Identity};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::subscriber::Subscriber;

/// Key of one attached subscriber within its connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

struct DispatchState {
    /// Ordered by attach time.
    subscribers: BTreeMap<SubscriberId, Arc<dyn Subscriber>>,
    next_id: u64,
    cursor: u64,
    /// `Some` once the handshake has fired.
    handshake: Option<Handshake>,
    closed: bool,
}

/// Subscriber set, cursor, and handshake for one identity.
pub struct Dispatcher {
    identity: Identity,
    replay_handshake: bool,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    /// Empty dispatcher at cursor 0.
    pub fn new(identity: Identity, replay_handshake: bool) -> Self {
        Self {
            identity,
            replay_handshake,
            state: Mutex::new(DispatchState {
                subscribers: BTreeMap::new(),
                next_id: 0,
                cursor: 0,
                handshake: None,
                closed: false,
            }),
        }
    }

    /// Identity this dispatcher serves.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Attach a subscriber.
    ///
    /// Returns the cached handshake when it already fired and replay is
    /// enabled; the caller delivers it once it holds no locks.
    pub fn add(&self, subscriber: Arc<dyn Subscriber>) -> (SubscriberId, Option<Handshake>) {
        let mut state = self.state.lock();
        let id = SubscriberId(state.next_id);
        state.next_id += 1;
        let _ = state.subscribers.insert(id, subscriber);
        let replay = if self.replay_handshake {
            state.handshake.clone()
        } else {
            None
        };
        (id, replay)
    }

    /// Detach a subscriber; returns how many remain.
    pub fn remove(&self, id: SubscriberId) -> usize {
        let mut state = self.state.lock();
        let _ = state.subscribers.remove(&id);
        state.subscribers.len()
    }

    /// Number of attached subscribers.
    pub fn len(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Whether no subscriber is attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current cursor.
    pub fn cursor(&self) -> u64 {
        self.state.lock().cursor
    }

    /// Raise the cursor to `to` if it is ahead; returns the resulting cursor.
    pub fn advance_cursor(&self, to: u64) -> u64 {
        let mut state = self.state.lock();
        state.cursor = state.cursor.max(to);
        state.cursor
    }

    /// Whether the handshake has fired.
    pub fn handshake_delivered(&self) -> bool {
        self.state.lock().handshake.is_some()
    }

    /// Fire the handshake to current subscribers, once per dispatcher.
    ///
    /// Returns `false` if it had already fired or the dispatcher is closed.
    pub fn deliver_handshake(&self, handshake: Handshake) -> bool {
        let targets = {
            let mut state = self.state.lock();
            if state.closed || state.handshake.is_some() {
                return false;
            }
            state.handshake = Some(handshake.clone());
            snapshot(&state)
        };
        info!(
            identity = %self.identity,
            cursor = ?handshake.cursor,
            subscribers = targets.len(),
            "feed connected"
        );
        for sub in targets {
            sub.on_connected(&handshake);
        }
        true
    }

    /// Forward one named event to every subscriber.
    pub fn dispatch(&self, name: &str, data: &Value) {
        let targets = {
            let state = self.state.lock();
            if state.closed {
                return;
            }
            snapshot(&state)
        };
        for sub in targets {
            sub.on_event(name, data);
        }
    }

    /// Advance the watermark past `event.id`, then dispatch it.
    pub fn dispatch_event(&self, event: &FeedEvent) {
        let targets = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            if let Some(id) = event.id {
                state.cursor = state.cursor.max(id);
            }
            snapshot(&state)
        };
        for sub in targets {
            sub.on_event(&event.kind, &event.data);
        }
    }

    /// Report a failed cycle to every subscriber.
    pub fn report_error(&self, error: &TransportError) {
        let targets = {
            let state = self.state.lock();
            if state.closed {
                return;
            }
            snapshot(&state)
        };
        for sub in targets {
            sub.on_error(error);
        }
    }

    /// Stop delivering anything further.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            debug!(identity = %self.identity, cursor = state.cursor, "dispatcher closed");
        }
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

fn snapshot(state: &DispatchState) -> Vec<Arc<dyn Subscriber>> {
    state.subscribers.values().cloned().collect()
}
