//! # feedline-client
//!
//! Real-time event delivery for many subscribers over few connections.
//!
//! - **Registry**: [`Registry`] keeps one [`Connection`] per identity and
//!   hands out [`Subscription`] handles; last close tears the connection down
//! - **Transports**: [`PollingTransport`] (long-poll with a resumable cursor
//!   and backoff) or [`StreamingTransport`] (server push), chosen per
//!   identity by a capability predicate
//! - **Pause coordination**: reentrant [`Registry::pause`] /
//!   [`Registry::resume`] suspend every polling connection at once
//! - **HTTP**: [`HttpPollFetcher`] and [`HttpStreamConnector`] implement the
//!   network seams over `reqwest`
//! - **Testing**: [`testing`] fakes for both seams plus a recording subscriber

#![deny(unsafe_code)]

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod registry;
pub mod subscriber;
pub mod testing;
pub mod transport;

pub use connection::Connection;
pub use dispatcher::{Dispatcher, SubscriberId};
pub use error::TransportError;
pub use http::{HttpPollFetcher, HttpStreamConnector};
pub use registry::{PauseGuard, PushCapability, Registry, RegistryConfig, Subscription};
pub use subscriber::{CallbackSubscriber, ChannelSubscriber, FeedUpdate, Subscriber};
pub use transport::{
    EventTransport, MessageStream, PollConfig, PollFetcher, PollRequest, PollingTransport,
    StreamConfig, StreamConnector, StreamMessage, StreamingTransport, TransportMode,
};
