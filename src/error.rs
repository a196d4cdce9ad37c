//! Error types for the visualizer.
//!
//! Only session-start and configuration failures are errors. A grid that
//! resolves to zero cells or a timer that fires after teardown is not an
//! error: those are discarded where they occur.

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, VizError>;

#[derive(Debug, thiserror::Error)]
pub enum VizError {
    /// Audio acquisition was rejected by the user or the platform
    #[error("audio input unavailable: {0}")]
    PermissionDenied(String),

    /// Terminal or filesystem I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prefs file could not be parsed or serialized
    #[error("prefs error: {0}")]
    Prefs(String),

    /// A value given for a known option could not be parsed
    #[error("invalid value {value:?} for option {key}")]
    InvalidOption { key: String, value: String },
}

impl From<toml::de::Error> for VizError {
    fn from(e: toml::de::Error) -> Self {
        VizError::Prefs(e.to_string())
    }
}

impl From<toml::ser::Error> for VizError {
    fn from(e: toml::ser::Error) -> Self {
        VizError::Prefs(e.to_string())
    }
}
