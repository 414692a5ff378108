//! HTTP implementations of the network seams.
//!
//! - [`HttpPollFetcher`]: `GET {poll_url}?identity=..&since=..&timeoutMs=..`,
//!   JSON [`PollEnvelope`] body
//! - [`HttpStreamConnector`]: `GET {stream_url}?identity=..` with
//!   `Accept: text/event-stream`, parsed as server-sent events
//!
//! Both send `Authorization: Bearer <key>` when a key is configured. No
//! client-side timeout is applied; the server bounds long-poll hold time.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use feedline_core::{Identity, PollEnvelope};
use futures::StreamExt;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{MessageStream, PollFetcher, PollRequest, StreamConnector, StreamMessage};

/// Build the shared HTTP client.
pub fn build_client() -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .user_agent(concat!("feedline/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| TransportError::Network {
            message: e.to_string(),
        })
}

fn authorize(request: reqwest::RequestBuilder, api_key: Option<&str>) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Long-poll
// ─────────────────────────────────────────────────────────────────────────────

/// Long-poll requests over HTTP.
#[derive(Clone)]
pub struct HttpPollFetcher {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpPollFetcher {
    /// Fetcher for the endpoint at `url`.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: None,
        }
    }

    /// Send a bearer token with every request.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

#[async_trait]
impl PollFetcher for HttpPollFetcher {
    async fn poll(&self, request: &PollRequest) -> Result<PollEnvelope, TransportError> {
        let timeout_ms = u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX);
        let http = self.client.get(&self.url).query(&[
            ("identity", request.identity.as_str().to_owned()),
            ("since", request.since.to_string()),
            ("timeoutMs", timeout_ms.to_string()),
        ]);
        let response = authorize(http, self.api_key.as_deref()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        debug!(identity = %request.identity, bytes = body.len(), "poll response");
        Ok(serde_json::from_slice(&body)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server-sent events
// ─────────────────────────────────────────────────────────────────────────────

/// Push streams over server-sent events.
#[derive(Clone)]
pub struct HttpStreamConnector {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpStreamConnector {
    /// Connector for the endpoint at `url`.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: None,
        }
    }

    /// Send a bearer token when opening streams.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

#[async_trait]
impl StreamConnector for HttpStreamConnector {
    async fn open(&self, identity: &Identity) -> Result<MessageStream, TransportError> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let http = self
            .client
            .get(&self.url)
            .headers(headers)
            .query(&[("identity", identity.as_str())]);
        let response = authorize(http, self.api_key.as_deref()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let messages = response.bytes_stream().eventsource().map(|item| {
            item.map(|event| StreamMessage::new(event.event, event.data))
                .map_err(|e| TransportError::Network {
                    message: e.to_string(),
                })
        });
        Ok(Box::pin(messages))
    }
}
