//! Backend endpoint settings.

use serde::{Deserialize, Serialize};

/// Where the event endpoints live and how to authenticate.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL the endpoint paths are resolved against (trailing slash kept).
    pub base_url: String,
    /// Bearer token sent with every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Long-poll endpoint path, relative to `base_url`.
    pub poll_path: String,
    /// Push-stream endpoint path, relative to `base_url`.
    pub stream_path: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787/".to_string(),
            api_key: None,
            poll_path: "events/poll".to_string(),
            stream_path: "events/stream".to_string(),
        }
    }
}

impl ApiSettings {
    /// Absolute URL for an endpoint path.
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}
