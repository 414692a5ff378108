//! Transport error taxonomy.
//!
//! Every failure a transport can hit folds into [`TransportError`], the only
//! error class subscribers ever see. Results of superseded requests are not
//! errors at all; the polling loop drops them before they reach this type's
//! consumers.

use thiserror::Error;

/// A failed transport cycle.
///
/// Cloneable so one value can be handed to every subscriber of a
/// connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Server answered with a non-success status.
    #[error("server returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Connection, DNS, TLS, or body-read failure.
    #[error("network error: {message}")]
    Network {
        /// Error description.
        message: String,
    },

    /// Request was cancelled before it completed.
    #[error("request aborted")]
    Aborted,

    /// Push stream ended.
    #[error("event stream closed by server")]
    StreamClosed,

    /// Response body could not be decoded.
    #[error("malformed payload: {message}")]
    MalformedPayload {
        /// Decoder error description.
        message: String,
    },
}

impl TransportError {
    /// Whether this error came from a cancelled request.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
            },
            None => Self::Network {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedPayload {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            TransportError::Status { status: 503 }.to_string(),
            "server returned HTTP 503"
        );
        assert_eq!(TransportError::Aborted.to_string(), "request aborted");
        assert!(
            TransportError::Network {
                message: "connection refused".into()
            }
            .to_string()
            .contains("connection refused")
        );
    }

    #[test]
    fn json_error_becomes_malformed_payload() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: TransportError = json_err.into();
        assert!(matches!(err, TransportError::MalformedPayload { .. }));
        assert!(!err.is_aborted());
    }

    #[test]
    fn only_aborted_is_aborted() {
        assert!(TransportError::Aborted.is_aborted());
        assert!(!TransportError::StreamClosed.is_aborted());
    }
}
