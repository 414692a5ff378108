//! # feedline-core
//!
//! Shared vocabulary for the feedline event-delivery client.
//!
//! - **Identity**: [`Identity`] newtype scoping one logical feed
//! - **Wire types**: [`PollEnvelope`], [`FeedEvent`], [`Handshake`], [`EventKind`]
//! - **Backoff**: [`BackoffPolicy`] pacing retries after failed cycles
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod backoff;
pub mod events;
pub mod ids;
pub mod logging;

pub use backoff::{Backoff, BackoffPolicy};
pub use events::{EventKind, FeedEvent, Handshake, PollEnvelope};
pub use ids::Identity;
