//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FeedlineSettings::default()`]
//! 2. If `~/.feedline/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `FEEDLINE_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::FeedlineSettings;

/// Resolve the path to the settings file (`~/.feedline/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".feedline").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FeedlineSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file cannot be read,
/// contains invalid JSON or holds an unusable value, returns an error naming
/// the file or the offending key.
pub fn load_settings_from_path(path: &Path) -> Result<FeedlineSettings> {
    let defaults =
        serde_json::to_value(FeedlineSettings::default()).map_err(SettingsError::Defaults)?;
    let parse_error = |source: serde_json::Error| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let mut settings: FeedlineSettings = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(parse_error)?;
        serde_json::from_value(deep_merge(defaults, user)).map_err(parse_error)?
    } else {
        debug!(?path, "settings file not found, using defaults");
        serde_json::from_value(defaults).map_err(SettingsError::Defaults)?
    };

    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject settings the client cannot run with.
pub fn validate(settings: &FeedlineSettings) -> Result<()> {
    let base = &settings.api.base_url;
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(SettingsError::Invalid {
            field: "api.baseUrl",
            reason: format!("must be an absolute http(s) URL, got {base:?}"),
        });
    }
    if settings.transport.poll_timeout_ms == 0 {
        return Err(SettingsError::Invalid {
            field: "transport.pollTimeoutMs",
            reason: "must be positive".to_string(),
        });
    }
    if settings.backoff.initial_ms == 0 {
        return Err(SettingsError::Invalid {
            field: "backoff.initialMs",
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut FeedlineSettings) {
    if let Some(v) = read_env_string("FEEDLINE_BASE_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = read_env_string("FEEDLINE_API_KEY") {
        settings.api.api_key = Some(v);
    }
    if let Some(v) = read_env_u64("FEEDLINE_POLL_TIMEOUT_MS", 1000, 120_000) {
        settings.transport.poll_timeout_ms = v;
    }
    if let Some(v) = read_env_bool("FEEDLINE_PREFER_STREAMING") {
        settings.transport.prefer_streaming = v;
    }
    if let Some(v) = read_env_bool("FEEDLINE_STREAM_RECONNECT") {
        settings.transport.stream_reconnect = v;
    }
    if let Some(v) = read_env_string("FEEDLINE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"api": {"basePath": "a", "pollPath": "b"}});
        let source = serde_json::json!({"api": {"pollPath": "c"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["api"]["basePath"], "a");
        assert_eq!(merged["api"]["pollPath"], "c");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.api.poll_path, "events/poll");
        assert_eq!(settings.transport.poll_timeout_ms, 25_000);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"{{"api": {{"baseUrl": "https://events.test/"}}, "backoff": {{"maxMs": 5000}}}}"#
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.api.base_url, "https://events.test/");
        assert_eq!(settings.api.stream_path, "events/stream");
        assert_eq!(settings.backoff.max_ms, 5000);
        assert_eq!(settings.backoff.initial_ms, 1000);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert_eq!(err.path(), Some(path.as_path()));
    }

    #[test]
    fn wrong_field_type_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"transport": {"pollTimeoutMs": "soon"}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert!(err.to_string().contains(path.to_str().unwrap()));
    }

    #[test]
    fn unreadable_file_names_the_path() {
        // A directory exists but cannot be read as a file
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings_from_path(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
        assert_eq!(err.path(), Some(dir.path()));
    }

    #[test]
    fn relative_base_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"api": {"baseUrl": "events.test"}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { field: "api.baseUrl", .. }));
    }

    #[test]
    fn zero_poll_timeout_is_rejected() {
        let mut settings = FeedlineSettings::default();
        settings.transport.poll_timeout_ms = 0;
        assert!(matches!(
            validate(&settings),
            Err(SettingsError::Invalid { field: "transport.pollTimeoutMs", .. })
        ));
    }

    // ── parsing helpers ─────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("25000", 1000, 120_000), Some(25_000));
        assert_eq!(parse_u64_range("999", 1000, 120_000), None);
        assert_eq!(parse_u64_range("x", 1000, 120_000), None);
    }
}
