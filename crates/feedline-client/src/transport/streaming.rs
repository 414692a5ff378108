//! Server-push transport.
//!
//! Opens one stream for the identity and forwards each recognized message to
//! the dispatcher. The `connected` message is turned into the handshake; any
//! other recognized name is dispatched under that name. Unknown names are
//! dropped.
//!
//! When the stream fails or ends the error is reported to subscribers. With
//! `reconnect` configured the stream is reopened after the backoff delay;
//! otherwise the transport stays idle until closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use feedline_core::backoff::Backoff;
use feedline_core::{BackoffPolicy, EventKind, Handshake};
use futures::StreamExt;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EventTransport, ServerSession, StreamConnector, StreamMessage, TransportMode};
use crate::dispatcher::Dispatcher;
use crate::error::TransportError;

/// Streaming parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamConfig {
    /// Reopen pacing; `None` leaves a failed stream closed.
    pub reconnect: Option<BackoffPolicy>,
}

struct StreamShared {
    dispatcher: Arc<Dispatcher>,
    connector: Arc<dyn StreamConnector>,
    config: StreamConfig,
    shutdown: CancellationToken,
}

/// Push stream for one identity.
pub struct StreamingTransport {
    shared: Arc<StreamShared>,
    runtime: Handle,
    started: AtomicBool,
}

impl StreamingTransport {
    /// Build an idle transport; nothing happens until [`EventTransport::start`].
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        connector: Arc<dyn StreamConnector>,
        config: StreamConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(StreamShared {
                dispatcher,
                connector,
                config,
                shutdown: CancellationToken::new(),
            }),
            runtime,
            started: AtomicBool::new(false),
        }
    }
}

impl EventTransport for StreamingTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Streaming
    }

    fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) || self.shared.shutdown.is_cancelled() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let _ = self.runtime.spawn(async move { shared.run().await });
    }

    fn close(&self) {
        self.shared.shutdown.cancel();
    }
}

impl StreamShared {
    async fn run(&self) {
        let identity = self.dispatcher.identity().clone();
        let mut backoff = self.config.reconnect.map(Backoff::new);
        let mut session = ServerSession::default();

        loop {
            let (delivered, error) = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return,
                outcome = self.session(&mut session) => outcome,
            };
            if self.shutdown.is_cancelled() {
                return;
            }
            self.dispatcher.report_error(&error);

            let Some(backoff) = backoff.as_mut() else {
                warn!(%identity, error = %error, "event stream ended");
                return;
            };
            if delivered {
                backoff.reset();
            }
            let delay = backoff.on_failure();
            warn!(
                %identity,
                error = %error,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "event stream ended, reconnecting"
            );
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one stream until it fails. Returns whether any message arrived.
    async fn session(&self, server: &mut ServerSession) -> (bool, TransportError) {
        let identity = self.dispatcher.identity();
        let mut stream = match self.connector.open(identity).await {
            Ok(stream) => stream,
            Err(e) => return (false, e),
        };
        debug!(%identity, "event stream open");

        let mut delivered = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => {
                    delivered = true;
                    self.handle(server, &message);
                }
                Err(e) => return (delivered, e),
            }
        }
        (delivered, TransportError::StreamClosed)
    }

    fn handle(&self, server: &mut ServerSession, message: &StreamMessage) {
        let identity = self.dispatcher.identity();
        let Some(kind) = EventKind::parse(&message.event) else {
            debug!(%identity, event = %message.event, "ignoring unrecognized stream event");
            return;
        };
        let data = serde_json::from_str::<Value>(&message.data)
            .unwrap_or_else(|_| Value::String(message.data.clone()));

        if kind.is_handshake() {
            let mut handshake = Handshake::from_stream_payload(identity, &data);
            if let Some(cursor) = handshake.cursor {
                handshake.cursor = Some(self.dispatcher.advance_cursor(cursor));
            }
            let _ = server.observe(identity, handshake.server_session_id.as_deref());
            if !self.dispatcher.deliver_handshake(handshake) {
                info!(%identity, "stream reconnected");
            }
            return;
        }
        self.dispatcher.dispatch(kind.as_str(), &data);
    }
}
