//! # feedline-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`FeedlineSettings::default()`]
//! 2. **User file**: `~/.feedline/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `FEEDLINE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = FeedlineSettings::default();
        let path = settings_path();
        assert!(path.ends_with(".feedline/settings.json"));
    }
}
