//! In-memory fakes for driving the client without a server.
//!
//! - [`RecordingSubscriber`]: stores every callback as a [`FeedUpdate`]
//! - [`ScriptedFetcher`]: answers poll requests from a script and records them
//! - [`ScriptedConnector`]: opens push streams from a script
//!
//! An exhausted script pends forever, which keeps a transport parked in a
//! known state. Timestamps use [`tokio::time::Instant`], so tests running
//! with a paused clock observe exact backoff delays.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use feedline_core::{Handshake, Identity, PollEnvelope};
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::subscriber::{FeedUpdate, Subscriber};
use crate::transport::{MessageStream, PollFetcher, PollRequest, StreamConnector, StreamMessage};

/// Poll envelope with the given cursor and raw events.
pub fn envelope(identity: &str, last_event_id: u64, events: Vec<Value>) -> PollEnvelope {
    PollEnvelope {
        identity: Identity::from(identity),
        last_event_id: Some(last_event_id),
        server_session_id: None,
        events,
    }
}

/// Counter that tasks can await.
struct Progress(watch::Sender<usize>);

impl Progress {
    fn new() -> Self {
        Self(watch::Sender::new(0))
    }

    fn set(&self, value: usize) {
        let _ = self.0.send_replace(value);
    }

    async fn reach(&self, target: usize) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|n| *n >= target).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscriber
// ─────────────────────────────────────────────────────────────────────────────

/// Subscriber that records every callback.
pub struct RecordingSubscriber {
    updates: Mutex<Vec<FeedUpdate>>,
    progress: Progress,
}

impl RecordingSubscriber {
    /// New empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            updates: Mutex::new(Vec::new()),
            progress: Progress::new(),
        })
    }

    fn push(&self, update: FeedUpdate) {
        let len = {
            let mut updates = self.updates.lock();
            updates.push(update);
            updates.len()
        };
        self.progress.set(len);
    }

    /// Every callback so far, in order.
    pub fn updates(&self) -> Vec<FeedUpdate> {
        self.updates.lock().clone()
    }

    /// Names of received events.
    pub fn event_names(&self) -> Vec<String> {
        self.updates
            .lock()
            .iter()
            .filter_map(|u| match u {
                FeedUpdate::Event { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Received handshakes.
    pub fn handshakes(&self) -> Vec<Handshake> {
        self.updates
            .lock()
            .iter()
            .filter_map(|u| match u {
                FeedUpdate::Connected(hs) => Some(hs.clone()),
                _ => None,
            })
            .collect()
    }

    /// Received errors.
    pub fn errors(&self) -> Vec<TransportError> {
        self.updates
            .lock()
            .iter()
            .filter_map(|u| match u {
                FeedUpdate::Error(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` callbacks have been recorded.
    pub async fn wait_for(&self, count: usize) {
        self.progress.reach(count).await;
    }
}

impl Subscriber for RecordingSubscriber {
    fn on_connected(&self, handshake: &Handshake) {
        self.push(FeedUpdate::Connected(handshake.clone()));
    }

    fn on_event(&self, name: &str, data: &Value) {
        self.push(FeedUpdate::Event {
            name: name.to_owned(),
            data: data.clone(),
        });
    }

    fn on_error(&self, error: &TransportError) {
        self.push(FeedUpdate::Error(error.clone()));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Poll fetcher
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted poll outcome.
#[derive(Clone, Debug)]
pub enum PollStep {
    /// Complete immediately.
    Reply(Result<PollEnvelope, TransportError>),
    /// Complete after a delay.
    Delayed(Duration, Result<PollEnvelope, TransportError>),
    /// Never complete.
    Hang,
}

impl PollStep {
    /// Immediate success.
    pub fn respond(envelope: PollEnvelope) -> Self {
        Self::Reply(Ok(envelope))
    }

    /// Immediate failure.
    pub fn fail(error: TransportError) -> Self {
        Self::Reply(Err(error))
    }
}

/// A recorded poll request.
#[derive(Clone, Debug)]
pub struct PollCall {
    /// Identity polled.
    pub identity: Identity,
    /// Cursor sent.
    pub since: u64,
    /// When the request was issued.
    pub at: Instant,
}

/// [`PollFetcher`] that plays back a script.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<PollStep>>,
    calls: Mutex<Vec<PollCall>>,
    progress: Progress,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    /// Fetcher answering with `steps` in order.
    pub fn new(steps: Vec<PollStep>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
            progress: Progress::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Append a step.
    pub fn push(&self, step: PollStep) {
        self.script.lock().push_back(step);
    }

    /// Requests issued so far.
    pub fn calls(&self) -> Vec<PollCall> {
        self.calls.lock().clone()
    }

    /// Milliseconds between consecutive requests.
    pub fn gaps_ms(&self) -> Vec<u64> {
        self.calls
            .lock()
            .windows(2)
            .map(|w| u64::try_from((w[1].at - w[0].at).as_millis()).unwrap_or(u64::MAX))
            .collect()
    }

    /// Highest number of simultaneously outstanding requests.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` requests have been issued.
    pub async fn wait_for_calls(&self, count: usize) {
        self.progress.reach(count).await;
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PollFetcher for ScriptedFetcher {
    async fn poll(&self, request: &PollRequest) -> Result<PollEnvelope, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let len = {
            let mut calls = self.calls.lock();
            calls.push(PollCall {
                identity: request.identity.clone(),
                since: request.since,
                at: Instant::now(),
            });
            calls.len()
        };
        self.progress.set(len);

        let step = self.script.lock().pop_front();
        match step {
            Some(PollStep::Reply(result)) => result,
            Some(PollStep::Delayed(delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            Some(PollStep::Hang) | None => std::future::pending().await,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream connector
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted stream open.
#[derive(Clone, Debug)]
pub enum StreamStep {
    /// Opening fails.
    Fail(TransportError),
    /// Stream yields the messages, then ends.
    Messages(Vec<StreamMessage>),
    /// Stream yields the messages, then stays open.
    MessagesThenHang(Vec<StreamMessage>),
}

impl StreamStep {
    /// Stream that delivers `messages` and stays open.
    pub fn hang_after(messages: Vec<StreamMessage>) -> Self {
        Self::MessagesThenHang(messages)
    }
}

/// [`StreamConnector`] that plays back a script.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<StreamStep>>,
    opens: AtomicUsize,
    progress: Progress,
}

impl ScriptedConnector {
    /// Connector answering opens with `steps` in order.
    pub fn new(steps: Vec<StreamStep>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            opens: AtomicUsize::new(0),
            progress: Progress::new(),
        })
    }

    /// Number of open attempts so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` opens have been attempted.
    pub async fn wait_for_opens(&self, count: usize) {
        self.progress.reach(count).await;
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn open(&self, _identity: &Identity) -> Result<MessageStream, TransportError> {
        let opens = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.set(opens);

        let step = self.script.lock().pop_front();
        match step {
            Some(StreamStep::Fail(error)) => Err(error),
            Some(StreamStep::Messages(messages)) => {
                Ok(Box::pin(stream::iter(messages.into_iter().map(Ok))))
            }
            Some(StreamStep::MessagesThenHang(messages)) => {
                Ok(Box::pin(
                    stream::iter(messages.into_iter().map(Ok)).chain(stream::pending()),
                ))
            }
            None => std::future::pending().await,
        }
    }
}
