//! Transport and backoff settings.

use feedline_core::BackoffPolicy;
use feedline_core::backoff::{DEFAULT_FACTOR, DEFAULT_INITIAL_MS, DEFAULT_MAX_MS};
use serde::{Deserialize, Serialize};

/// Transport selection and long-poll parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// How long the server may hold a poll request open, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Use the push stream when the environment supports it.
    pub prefer_streaming: bool,
    /// Reopen the push stream with backoff after it fails.
    pub stream_reconnect: bool,
    /// Replay the cached handshake to subscribers that join late.
    pub replay_handshake: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 25_000,
            prefer_streaming: true,
            stream_reconnect: false,
            replay_handshake: true,
        }
    }
}

/// Retry pacing after failed cycles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffSettings {
    /// First retry delay in milliseconds.
    pub initial_ms: u64,
    /// Growth factor between consecutive failures.
    pub factor: f64,
    /// Delay cap in milliseconds.
    pub max_ms: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_ms: DEFAULT_INITIAL_MS,
            factor: DEFAULT_FACTOR,
            max_ms: DEFAULT_MAX_MS,
        }
    }
}

impl BackoffSettings {
    /// Policy described by these settings.
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.initial_ms, self.factor, self.max_ms)
    }
}
