//! Transport strategies.
//!
//! A connection drives exactly one [`EventTransport`]:
//! - [`PollingTransport`]: repeated long-poll requests with a resumable cursor
//! - [`StreamingTransport`]: one server-push stream of named messages
//!
//! Network access goes through the [`PollFetcher`] and [`StreamConnector`]
//! seams so the scheduling logic can be driven by in-memory fakes.

pub mod polling;
pub mod streaming;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use feedline_core::{Identity, PollEnvelope};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TransportError;

pub use polling::{PollConfig, PollingTransport};
pub use streaming::{StreamConfig, StreamingTransport};

/// Which transport a connection uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Server push.
    Streaming,
    /// Long-poll loop.
    Polling,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Streaming => f.write_str("streaming"),
            Self::Polling => f.write_str("polling"),
        }
    }
}

/// Lifecycle shared by both transports.
///
/// All methods return immediately; network work happens on spawned tasks.
pub trait EventTransport: Send + Sync {
    /// Transport kind.
    fn mode(&self) -> TransportMode;

    /// Begin delivering. Calling twice has no further effect.
    fn start(&self);

    /// Suspend network activity, aborting any in-flight request.
    fn pause(&self) {}

    /// Undo [`pause`](Self::pause) and run a cycle immediately.
    fn resume(&self) {}

    /// Whether the transport is currently paused.
    fn is_paused(&self) -> bool {
        false
    }

    /// Stop for good. No callbacks fire afterwards.
    fn close(&self);
}

// ─────────────────────────────────────────────────────────────────────────────
// Network seams
// ─────────────────────────────────────────────────────────────────────────────

/// One long-poll request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollRequest {
    /// Feed to poll.
    pub identity: Identity,
    /// Cursor: only events after this id are wanted.
    pub since: u64,
    /// How long the server may hold the request.
    pub timeout: Duration,
}

/// Issues long-poll requests.
#[async_trait]
pub trait PollFetcher: Send + Sync {
    /// Perform one request. Dropping the future aborts it.
    async fn poll(&self, request: &PollRequest) -> Result<PollEnvelope, TransportError>;
}

/// One named message from the push stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMessage {
    /// Event name.
    pub event: String,
    /// Raw data field.
    pub data: String,
}

impl StreamMessage {
    /// Build a message.
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Stream of push messages; ends when the server closes the connection.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<StreamMessage, TransportError>> + Send>>;

/// Opens push streams.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open the stream for `identity`.
    async fn open(&self, identity: &Identity) -> Result<MessageStream, TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Server session tracking
// ─────────────────────────────────────────────────────────────────────────────

/// Remembers the server process session to notice restarts.
#[derive(Debug, Default)]
pub(crate) struct ServerSession {
    known: Option<String>,
}

impl ServerSession {
    /// Record `seen`; returns `true` when it differs from a known session.
    pub(crate) fn observe(&mut self, identity: &Identity, seen: Option<&str>) -> bool {
        let Some(seen) = seen else {
            return false;
        };
        match self.known.as_deref() {
            Some(known) if known == seen => false,
            Some(known) => {
                warn!(
                    %identity,
                    previous = known,
                    current = seen,
                    "server restart detected"
                );
                self.known = Some(seen.to_owned());
                true
            }
            None => {
                self.known = Some(seen.to_owned());
                false
            }
        }
    }
}
