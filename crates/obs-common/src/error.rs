//! Error types for the ingestion pipeline.

use serde::Serialize;
use thiserror::Error;

/// Result type alias using ObsError.
pub type ObsResult<T> = Result<T, ObsError>;

/// Primary error type for adapter, registry and cache operations.
#[derive(Debug, Error)]
pub enum ObsError {
    // === Feed Errors ===
    #[error("Source unavailable for station '{station}': {reason}")]
    SourceUnavailable { station: String, reason: String },

    #[error("Malformed feed for station '{station}': {reason}")]
    MalformedFeed { station: String, reason: String },

    // === Configuration Errors ===
    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    #[error("Station ID '{id}' not found{}", format_suggestions(.suggestions))]
    StationNotFound { id: String, suggestions: Vec<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    // === Storage Errors ===
    #[error("Failed to publish '{path}': {reason}")]
    WriteFailure { path: String, reason: String },

    #[error("Unreadable cache file '{path}': {reason}")]
    CorruptCache { path: String, reason: String },
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(". Did you mean: {}?", suggestions.join(", "))
    }
}

/// Coarse classification of an [`ObsError`], used as a diagnostics key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    MalformedFeed,
    UnknownAdapter,
    StationNotFound,
    Config,
    WriteFailure,
    CorruptCache,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::MalformedFeed => "malformed_feed",
            ErrorKind::UnknownAdapter => "unknown_adapter",
            ErrorKind::StationNotFound => "station_not_found",
            ErrorKind::Config => "config",
            ErrorKind::WriteFailure => "write_failure",
            ErrorKind::CorruptCache => "corrupt_cache",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ObsError {
    pub fn source_unavailable(station: impl Into<String>, reason: impl ToString) -> Self {
        ObsError::SourceUnavailable {
            station: station.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(station: impl Into<String>, reason: impl ToString) -> Self {
        ObsError::MalformedFeed {
            station: station.into(),
            reason: reason.to_string(),
        }
    }

    pub fn write_failure(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        ObsError::WriteFailure {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn corrupt_cache(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        ObsError::CorruptCache {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Get the diagnostics kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ObsError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            ObsError::MalformedFeed { .. } => ErrorKind::MalformedFeed,
            ObsError::UnknownAdapter(_) => ErrorKind::UnknownAdapter,
            ObsError::StationNotFound { .. } => ErrorKind::StationNotFound,
            ObsError::Config(_) => ErrorKind::Config,
            ObsError::WriteFailure { .. } => ErrorKind::WriteFailure,
            ObsError::CorruptCache { .. } => ErrorKind::CorruptCache,
        }
    }

    /// Whether a retry against an earlier date's resource may succeed.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(self, ObsError::SourceUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_not_found_message_lists_suggestions() {
        let err = ObsError::StationNotFound {
            id: "bouy_1".to_string(),
            suggestions: vec!["buoy_1".to_string(), "buoy_11".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Station ID 'bouy_1' not found. Did you mean: buoy_1, buoy_11?"
        );

        let bare = ObsError::StationNotFound {
            id: "x".to_string(),
            suggestions: vec![],
        };
        assert_eq!(bare.to_string(), "Station ID 'x' not found");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ObsError::source_unavailable("a", "404").kind(),
            ErrorKind::SourceUnavailable
        );
        assert_eq!(ObsError::malformed("a", "bad").kind(), ErrorKind::MalformedFeed);
        assert_eq!(
            ObsError::UnknownAdapter("nope".into()).kind().as_str(),
            "unknown_adapter"
        );
        assert!(ObsError::source_unavailable("a", "timeout").is_source_unavailable());
        assert!(!ObsError::malformed("a", "bad").is_source_unavailable());
    }
}
