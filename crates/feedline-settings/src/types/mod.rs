//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a partial JSON file only overrides the fields it names.

mod api;
mod transport;

pub use api::*;
pub use transport::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// Loaded from `~/.feedline/settings.json` with defaults applied for
/// missing fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "api": { "baseUrl": "https://events.example.com/" },
///   "transport": { "preferStreaming": false }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedlineSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Backend endpoints and credentials.
    pub api: ApiSettings,
    /// Transport selection and polling parameters.
    pub transport: TransportSettings,
    /// Retry pacing after failed cycles.
    pub backoff: BackoffSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for FeedlineSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "feedline".to_string(),
            api: ApiSettings::default(),
            transport: TransportSettings::default(),
            backoff: BackoffSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level passed to the `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_serde_roundtrip() {
        let defaults = FeedlineSettings::default();
        let json = serde_json::to_string(&defaults).unwrap();
        let back: FeedlineSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, defaults.name);
        assert_eq!(back.api.poll_path, defaults.api.poll_path);
        assert_eq!(back.transport.poll_timeout_ms, defaults.transport.poll_timeout_ms);
    }

    #[test]
    fn default_settings_json_field_names() {
        let json = serde_json::to_value(FeedlineSettings::default()).unwrap();
        let api = json.get("api").unwrap();
        assert!(api.get("baseUrl").is_some());
        assert!(api.get("pollPath").is_some());
        // No key configured by default
        assert!(api.get("apiKey").is_none());

        let transport = json.get("transport").unwrap();
        assert!(transport.get("pollTimeoutMs").is_some());
        assert!(transport.get("streamReconnect").is_some());
    }

    #[test]
    fn empty_json_produces_defaults() {
        let settings: FeedlineSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.logging.level, "warn");
        assert_eq!(settings.backoff.initial_ms, 1000);
        assert!(settings.transport.prefer_streaming);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let settings: FeedlineSettings =
            serde_json::from_str(r#"{"transport": {"streamReconnect": true}}"#).unwrap();
        assert!(settings.transport.stream_reconnect);
        assert_eq!(settings.transport.poll_timeout_ms, 25_000);
    }
}
