//! Connection registry and pause coordinator.
//!
//! The [`Registry`] is the public entry point. It keeps at most one
//! [`Connection`] per identity, creating it on the first `subscribe` and
//! tearing it down when the last [`Subscription`] closes. Transport mode is
//! chosen per connection by the injected push-capability predicate.
//!
//! Pausing is reentrant across the whole registry: only the outermost
//! `pause`/`resume` pair touches the polling connections.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use feedline_core::{BackoffPolicy, Identity};
use feedline_settings::FeedlineSettings;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::dispatcher::{Dispatcher, SubscriberId};
use crate::error::TransportError;
use crate::http::{HttpPollFetcher, HttpStreamConnector, build_client};
use crate::subscriber::Subscriber;
use crate::transport::{
    EventTransport, PollConfig, PollFetcher, PollingTransport, StreamConfig, StreamConnector,
    StreamingTransport, TransportMode,
};

/// Decides whether an identity's feed can use server push.
pub type PushCapability = Arc<dyn Fn(&Identity) -> bool + Send + Sync>;

/// Registry-wide transport parameters.
#[derive(Clone, Copy, Debug)]
pub struct RegistryConfig {
    /// Server hold time for each poll request.
    pub poll_timeout: Duration,
    /// Retry pacing for polling and, when enabled, stream reconnects.
    pub backoff: BackoffPolicy,
    /// Reopen failed push streams with backoff.
    pub stream_reconnect: bool,
    /// Hand the cached handshake to subscribers that join late.
    pub replay_handshake: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll_timeout: PollConfig::default().timeout,
            backoff: BackoffPolicy::default(),
            stream_reconnect: false,
            replay_handshake: true,
        }
    }
}

impl RegistryConfig {
    /// Config described by loaded settings.
    pub fn from_settings(settings: &FeedlineSettings) -> Self {
        Self {
            poll_timeout: Duration::from_millis(settings.transport.poll_timeout_ms),
            backoff: settings.backoff.policy(),
            stream_reconnect: settings.transport.stream_reconnect,
            replay_handshake: settings.transport.replay_handshake,
        }
    }
}

struct RegistryState {
    connections: HashMap<Identity, Arc<Connection>>,
    pause_depth: u32,
}

struct RegistryInner {
    config: RegistryConfig,
    poll_fetcher: Arc<dyn PollFetcher>,
    stream_connector: Arc<dyn StreamConnector>,
    push_capable: PushCapability,
    runtime: Handle,
    state: Mutex<RegistryState>,
}

/// Multiplexes subscribers onto one connection per identity.
///
/// Cheap to clone; clones share the same connections.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Build a registry over the given network seams.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        config: RegistryConfig,
        poll_fetcher: Arc<dyn PollFetcher>,
        stream_connector: Arc<dyn StreamConnector>,
        push_capable: PushCapability,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                poll_fetcher,
                stream_connector,
                push_capable,
                runtime: Handle::current(),
                state: Mutex::new(RegistryState {
                    connections: HashMap::new(),
                    pause_depth: 0,
                }),
            }),
        }
    }

    /// Build an HTTP-backed registry from settings.
    ///
    /// Streaming is used for every identity when `preferStreaming` is set,
    /// polling otherwise.
    pub fn from_settings(settings: &FeedlineSettings) -> Result<Self, TransportError> {
        let client = build_client()?;
        let api = &settings.api;
        let poll = HttpPollFetcher::new(client.clone(), api.endpoint(&api.poll_path))
            .with_api_key(api.api_key.clone());
        let stream = HttpStreamConnector::new(client, api.endpoint(&api.stream_path))
            .with_api_key(api.api_key.clone());
        let prefer_streaming = settings.transport.prefer_streaming;
        Ok(Self::new(
            RegistryConfig::from_settings(settings),
            Arc::new(poll),
            Arc::new(stream),
            Arc::new(move |_: &Identity| prefer_streaming),
        ))
    }

    /// Attach `subscriber` to the feed for `identity`.
    ///
    /// Creates and starts the connection if this is the first subscriber.
    /// Connections created while the registry is paused start paused.
    pub fn subscribe(
        &self,
        identity: impl Into<Identity>,
        subscriber: Arc<dyn Subscriber>,
    ) -> Subscription {
        let identity = identity.into();
        let (connection, id, replay) = {
            let mut state = self.inner.state.lock();
            let paused = state.pause_depth > 0;
            if let Some(connection) = state.connections.get(&identity).cloned() {
                let (id, replay) = connection.attach(Arc::clone(&subscriber));
                (connection, id, replay)
            } else {
                let connection = Arc::new(self.inner.connect(identity.clone()));
                let _ = state
                    .connections
                    .insert(identity.clone(), Arc::clone(&connection));
                // Attach before the first request can complete.
                let (id, replay) = connection.attach(Arc::clone(&subscriber));
                if paused && connection.mode() == TransportMode::Polling {
                    connection.pause();
                }
                connection.start();
                (connection, id, replay)
            }
        };
        debug!(
            %identity,
            subscribers = connection.subscriber_count(),
            "subscriber attached"
        );

        if let Some(handshake) = replay {
            subscriber.on_connected(&handshake);
        }

        Subscription {
            registry: Arc::downgrade(&self.inner),
            connection,
            id,
            closed: AtomicBool::new(false),
        }
    }

    /// Suspend every polling connection. Reentrant.
    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        state.pause_depth += 1;
        if state.pause_depth == 1 {
            debug!(connections = state.connections.len(), "pausing polling");
            for connection in polling(&state) {
                connection.pause();
            }
        }
    }

    /// Undo one [`pause`](Self::pause). Polling restarts when the depth
    /// reaches zero; extra calls are ignored.
    pub fn resume(&self) {
        let mut state = self.inner.state.lock();
        if state.pause_depth == 0 {
            return;
        }
        state.pause_depth -= 1;
        if state.pause_depth == 0 {
            debug!(connections = state.connections.len(), "resuming polling");
            for connection in polling(&state) {
                connection.resume();
            }
        }
    }

    /// Pause until the returned guard is dropped.
    pub fn pause_guard(&self) -> PauseGuard {
        self.pause();
        PauseGuard {
            registry: self.clone(),
        }
    }

    /// Run `fut` with polling suspended.
    pub async fn with_pause<F: Future>(&self, fut: F) -> F::Output {
        let _guard = self.pause_guard();
        fut.await
    }

    /// Current pause nesting depth.
    pub fn pause_depth(&self) -> u32 {
        self.inner.state.lock().pause_depth
    }

    /// Live connection for `identity`, if any.
    pub fn connection(&self, identity: &Identity) -> Option<Arc<Connection>> {
        self.inner.state.lock().connections.get(identity).cloned()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Cursor of the live connection for `identity`.
    pub fn cursor(&self, identity: &Identity) -> Option<u64> {
        self.connection(identity).map(|c| c.cursor())
    }

    /// Close every connection. Outstanding subscriptions become inert.
    pub fn shutdown(&self) {
        self.inner.close_all();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Registry")
            .field("connections", &state.connections.len())
            .field("pause_depth", &state.pause_depth)
            .finish()
    }
}

fn polling(state: &RegistryState) -> impl Iterator<Item = &Arc<Connection>> {
    state
        .connections
        .values()
        .filter(|c| c.mode() == TransportMode::Polling)
}

impl RegistryInner {
    fn connect(&self, identity: Identity) -> Connection {
        let dispatcher = Arc::new(Dispatcher::new(
            identity.clone(),
            self.config.replay_handshake,
        ));
        let transport: Box<dyn EventTransport> = if (self.push_capable)(&identity) {
            let config = StreamConfig {
                reconnect: self.config.stream_reconnect.then_some(self.config.backoff),
            };
            Box::new(StreamingTransport::new(
                Arc::clone(&dispatcher),
                Arc::clone(&self.stream_connector),
                config,
                self.runtime.clone(),
            ))
        } else {
            let config = PollConfig {
                timeout: self.config.poll_timeout,
                backoff: self.config.backoff,
            };
            Box::new(PollingTransport::new(
                Arc::clone(&dispatcher),
                Arc::clone(&self.poll_fetcher),
                config,
                self.runtime.clone(),
            ))
        };
        info!(%identity, mode = %transport.mode(), "opening feed connection");
        Connection::new(dispatcher, transport)
    }

    fn release(&self, connection: &Arc<Connection>, id: SubscriberId) {
        let mut state = self.state.lock();
        if connection.detach(id) > 0 {
            return;
        }
        let identity = connection.identity();
        if state
            .connections
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current, connection))
        {
            let _ = state.connections.remove(identity);
        }
        connection.close();
        info!(%identity, cursor = connection.cursor(), "closed feed connection");
    }

    fn close_all(&self) {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.connections.drain().map(|(_, c)| c).collect()
        };
        for connection in drained {
            connection.close();
        }
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.close_all();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handles
// ─────────────────────────────────────────────────────────────────────────────

/// Handle for one attached subscriber. Closes on drop.
pub struct Subscription {
    registry: Weak<RegistryInner>,
    connection: Arc<Connection>,
    id: SubscriberId,
    closed: AtomicBool,
}

impl Subscription {
    /// Identity this subscription listens to.
    pub fn identity(&self) -> &Identity {
        self.connection.identity()
    }

    /// Transport serving this subscription.
    pub fn mode(&self) -> TransportMode {
        self.connection.mode()
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Detach the subscriber. The last close for an identity tears down its
    /// connection. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.registry.upgrade() {
            Some(registry) => registry.release(&self.connection, self.id),
            None => {
                if self.connection.detach(self.id) == 0 {
                    self.connection.close();
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("identity", self.identity())
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Holds one registry pause; resumes on drop.
#[must_use = "polling resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    registry: Registry,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.registry.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        PollStep, RecordingSubscriber, ScriptedConnector, ScriptedFetcher, StreamStep, envelope,
    };
    use crate::transport::StreamMessage;
    use serde_json::json;

    fn registry(fetcher: Arc<ScriptedFetcher>, push: bool) -> Registry {
        Registry::new(
            RegistryConfig::default(),
            fetcher,
            ScriptedConnector::new(vec![]),
            Arc::new(move |_: &Identity| push),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn one_connection_per_identity() {
        let fetcher = ScriptedFetcher::new(vec![PollStep::respond(envelope(
            "P1",
            1,
            vec![json!({"id": 1, "type": "x"})],
        ))]);
        let registry = registry(fetcher.clone(), false);
        let a = RecordingSubscriber::new();
        let b = RecordingSubscriber::new();

        let sa = registry.subscribe("P1", a.clone());
        let sb = registry.subscribe("P1", b.clone());
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(sa.mode(), TransportMode::Polling);

        a.wait_for(2).await;
        b.wait_for(2).await;
        assert_eq!(a.event_names(), vec!["x"]);
        assert_eq!(b.event_names(), vec!["x"]);
        assert_eq!(fetcher.max_in_flight(), 1);
        drop((sa, sb));
    }

    #[tokio::test(start_paused = true)]
    async fn last_close_tears_down() {
        let fetcher = ScriptedFetcher::new(vec![PollStep::Hang]);
        let registry = registry(fetcher.clone(), false);

        let a = registry.subscribe("P1", RecordingSubscriber::new());
        let b = registry.subscribe("P1", RecordingSubscriber::new());
        fetcher.wait_for_calls(1).await;
        let connection = registry.connection(&Identity::from("P1")).unwrap();

        a.close();
        a.close();
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(connection.subscriber_count(), 1);

        drop(b);
        assert_eq!(registry.connection_count(), 0);
        assert!(connection.is_closed());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_after_teardown_opens_fresh_connection() {
        let fetcher = ScriptedFetcher::new(vec![PollStep::Hang, PollStep::Hang]);
        let registry = registry(fetcher.clone(), false);

        let first = registry.subscribe("P1", RecordingSubscriber::new());
        let old = registry.connection(&Identity::from("P1")).unwrap();
        first.close();
        let _second = registry.subscribe("P1", RecordingSubscriber::new());
        let new = registry.connection(&Identity::from("P1")).unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.cursor(), 0);
        fetcher.wait_for_calls(2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_joiner_receives_cached_handshake() {
        let fetcher = ScriptedFetcher::new(vec![PollStep::respond(envelope("P1", 4, vec![]))]);
        let registry = registry(fetcher.clone(), false);
        let early = RecordingSubscriber::new();
        let _a = registry.subscribe("P1", early.clone());
        early.wait_for(1).await;

        let late = RecordingSubscriber::new();
        let _b = registry.subscribe("P1", late.clone());
        assert_eq!(late.handshakes().len(), 1);
        assert_eq!(late.handshakes()[0].cursor, Some(4));
        assert_eq!(early.handshakes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn nested_pause_is_reentrant() {
        let fetcher = ScriptedFetcher::new(vec![PollStep::Hang, PollStep::Hang]);
        let registry = registry(fetcher.clone(), false);
        let _sub = registry.subscribe("P1", RecordingSubscriber::new());
        fetcher.wait_for_calls(1).await;

        registry.pause();
        registry.pause();
        registry.resume();
        assert_eq!(registry.pause_depth(), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.calls().len(), 1);
        assert!(registry.connection(&Identity::from("P1")).unwrap().is_paused());

        registry.resume();
        fetcher.wait_for_calls(2).await;
        assert_eq!(fetcher.max_in_flight(), 1);

        registry.resume();
        assert_eq!(registry.pause_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_opened_while_paused_waits_for_resume() {
        let fetcher = ScriptedFetcher::new(vec![PollStep::Hang]);
        let registry = registry(fetcher.clone(), false);

        let guard = registry.pause_guard();
        let _sub = registry.subscribe("P1", RecordingSubscriber::new());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(fetcher.calls().is_empty());

        drop(guard);
        fetcher.wait_for_calls(1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn with_pause_resumes_after_future() {
        let fetcher = ScriptedFetcher::new(vec![PollStep::Hang, PollStep::Hang]);
        let registry = registry(fetcher.clone(), false);
        let _sub = registry.subscribe("P1", RecordingSubscriber::new());
        fetcher.wait_for_calls(1).await;

        let inner_depth = registry
            .with_pause(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                registry.pause_depth()
            })
            .await;
        assert_eq!(inner_depth, 1);
        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(registry.pause_depth(), 0);
        fetcher.wait_for_calls(2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_connections_ignore_pause() {
        let connector = ScriptedConnector::new(vec![StreamStep::hang_after(vec![
            StreamMessage::new("connected", r#"{"lastEventId":2}"#),
        ])]);
        let registry = Registry::new(
            RegistryConfig::default(),
            ScriptedFetcher::new(vec![]),
            connector.clone(),
            Arc::new(|_: &Identity| true),
        );
        let sub = RecordingSubscriber::new();
        let handle = registry.subscribe("P1", sub.clone());
        assert_eq!(handle.mode(), TransportMode::Streaming);

        registry.pause();
        sub.wait_for(1).await;
        assert_eq!(registry.cursor(&Identity::from("P1")), Some(2));
        assert!(!registry.connection(&Identity::from("P1")).unwrap().is_paused());
        registry.resume();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_everything() {
        let fetcher = ScriptedFetcher::new(vec![PollStep::Hang, PollStep::Hang]);
        let registry = registry(fetcher.clone(), false);
        let a = registry.subscribe("P1", RecordingSubscriber::new());
        let _b = registry.subscribe("P2", RecordingSubscriber::new());
        fetcher.wait_for_calls(2).await;

        registry.shutdown();
        assert_eq!(registry.connection_count(), 0);
        a.close();
        assert!(a.is_closed());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.calls().len(), 2);
    }
}
