//! Unified error types for tunematch
//!
//! Error strategy:
//! - Input errors (format, corrupt payload, too short): abort the request, the
//!   engine stays usable for the next one
//! - Contract errors (non-finite features, a separator that breaks its stem
//!   contract or panics): always fatal for the request and logged
//! - Capacity errors (busy, timeout, cancelled): the caller may retry later
//!
//! Every error maps to a flat [`ErrorKind`] so callers can report a structured result.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Supported audio formats for helpful error messages
pub const SUPPORTED_FORMATS: &str = "MP3, WAV, FLAC, AIFF, OGG/Vorbis";

/// Top-level error type for tunematch operations
#[derive(Debug, Error)]
pub enum TunematchError {
    // =========================================================================
    // Input errors - reject the request
    // =========================================================================
    #[error("Unsupported audio format: {reason}\n  Supported formats: {SUPPORTED_FORMATS}")]
    UnsupportedFormat { reason: String },

    #[error("Corrupt audio payload: {reason}\n  Tip: the container was recognised but its audio data could not be read")]
    CorruptAudio { reason: String },

    #[error("Audio too short ({duration_secs:.2}s). At least {required_secs:.2}s is required for stable features")]
    InsufficientAudio {
        duration_secs: f64,
        required_secs: f64,
    },

    // =========================================================================
    // Contract violations
    // =========================================================================
    #[error("Invalid feature set: {reason}")]
    InvalidFeatureSet { reason: String },

    #[error("Stem separation failed: {reason}")]
    SeparationFailed { reason: String },

    // =========================================================================
    // Capacity and lifecycle errors - retryable
    // =========================================================================
    #[error("Stem separation exceeded its time budget of {:.1}s", budget.as_secs_f64())]
    SeparationTimeout { budget: Duration },

    #[error("Separation workers are saturated ({in_flight} of {limit} slots in use), retry later")]
    Busy { in_flight: usize, limit: usize },

    #[error("Stem separation was cancelled")]
    Cancelled,

    // =========================================================================
    // Persistence and configuration
    // =========================================================================
    #[error("Cannot write output to '{path}': {reason}\n  Tip: Check write permissions for the output directory")]
    ExportError { path: PathBuf, reason: String },

    #[error("Cannot load corpus from '{path}': {reason}")]
    CorpusError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tunematch operations
pub type Result<T> = std::result::Result<T, TunematchError>;

/// Flat error discriminant reported to callers alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptAudio,
    InsufficientAudio,
    InvalidFeatureSet,
    SeparationFailed,
    SeparationTimeout,
    Busy,
    Cancelled,
    Export,
    Corpus,
    Config,
    Io,
}

impl TunematchError {
    /// The structured kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TunematchError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            TunematchError::CorruptAudio { .. } => ErrorKind::CorruptAudio,
            TunematchError::InsufficientAudio { .. } => ErrorKind::InsufficientAudio,
            TunematchError::InvalidFeatureSet { .. } => ErrorKind::InvalidFeatureSet,
            TunematchError::SeparationFailed { .. } => ErrorKind::SeparationFailed,
            TunematchError::SeparationTimeout { .. } => ErrorKind::SeparationTimeout,
            TunematchError::Busy { .. } => ErrorKind::Busy,
            TunematchError::Cancelled => ErrorKind::Cancelled,
            TunematchError::ExportError { .. } => ErrorKind::Export,
            TunematchError::CorpusError { .. } => ErrorKind::Corpus,
            TunematchError::ConfigError(_) => ErrorKind::Config,
            TunematchError::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns true if the request was rejected because of its audio input
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TunematchError::UnsupportedFormat { .. }
                | TunematchError::CorruptAudio { .. }
                | TunematchError::InsufficientAudio { .. }
        )
    }

    /// Returns true if the same request may succeed when retried later
    pub fn is_retryable(&self) -> bool {
        matches!(self, TunematchError::Busy { .. })
    }

    /// Create an unsupported format error
    pub fn unsupported(reason: impl Into<String>) -> Self {
        TunematchError::UnsupportedFormat {
            reason: reason.into(),
        }
    }

    /// Create a corrupt audio error
    pub fn corrupt(reason: impl Into<String>) -> Self {
        TunematchError::CorruptAudio {
            reason: reason.into(),
        }
    }

    /// Create an invalid feature set error
    pub fn invalid_features(reason: impl Into<String>) -> Self {
        TunematchError::InvalidFeatureSet {
            reason: reason.into(),
        }
    }

    /// Create a separation failure error
    pub fn separation_failed(reason: impl Into<String>) -> Self {
        TunematchError::SeparationFailed {
            reason: reason.into(),
        }
    }

    /// Create an export error, naming common IO causes
    pub fn export_error(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        let reason = match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                format!("Permission denied. Check that you have write access to {}", path.display())
            }
            std::io::ErrorKind::NotFound => {
                format!("Directory does not exist: {}", path.parent().map(|p| p.display().to_string()).unwrap_or_default())
            }
            _ => err.to_string(),
        };
        TunematchError::ExportError { path, reason }
    }
}
