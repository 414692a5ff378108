//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file {}: {source}", .path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not JSON, or a field has the wrong shape.
    #[error("malformed settings file {}: {source}", .path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying decode failure, with line and column.
        source: serde_json::Error,
    },
    /// Compiled defaults did not round-trip through JSON.
    #[error("built-in settings defaults are unusable: {0}")]
    Defaults(#[source] serde_json::Error),
    /// A value parsed but the client cannot run with it.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted camelCase key, e.g. `api.baseUrl`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    /// Settings file involved, when the failure came from one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::Defaults(_) | Self::Invalid { .. } => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
