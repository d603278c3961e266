//! Error types for the compaction pass store.

use thiserror::Error;

/// Result type alias for pass store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the pass store.
#[derive(Error, Debug)]
pub enum Error {
    // Encoding errors (10-19)
    #[error("decoding failed: {0}")]
    Decoding(String),

    #[error("truncated stream: {context} declares {expected} bytes, {available} available")]
    Truncated {
        context: String,
        expected: usize,
        available: usize,
    },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("time {0} is outside the storable range 0001-01-01 to 9999-12-31")]
    TimeOutOfRange(String),

    // Storage errors (20-29)
    #[error("granule does not exist: {key}")]
    GranuleDoesNotExist { key: String },

    #[error("mutable to immutable conversion failed for {key}: {reason}")]
    MutableToImmutableConversion { key: String, reason: String },

    #[error("cache unavailable during {operation} (dataset {dataset}, key {key}): {reason}")]
    CacheUnavailable {
        operation: String,
        dataset: String,
        key: String,
        reason: String,
    },

    #[error("commit failed ({failed} failed, {applied} applied): {reason}")]
    CommitFailed {
        failed: String,
        applied: String,
        reason: String,
    },

    // Spatial errors (30-39)
    #[error("cell ({x}, {y}) is outside the index extent of {extent} cells")]
    CellOutOfRange { x: u64, y: u64, extent: u64 },

    #[error("no leaf subgrid covers cell ({x}, {y})")]
    LeafNotFound { x: u32, y: u32 },

    #[error("segment unavailable: {0}")]
    SegmentUnavailable(String),

    // Configuration errors (50-59)
    #[error("configuration error: {0}")]
    Config(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used for detailed error reporting in JSON output.
    pub fn code(&self) -> u32 {
        match self {
            Error::Decoding(_) => 10,
            Error::Truncated { .. } => 11,
            Error::UnsupportedOperation(_) => 12,
            Error::TimeOutOfRange(_) => 13,
            Error::GranuleDoesNotExist { .. } => 20,
            Error::MutableToImmutableConversion { .. } => 21,
            Error::CacheUnavailable { .. } => 22,
            Error::CommitFailed { .. } => 23,
            Error::CellOutOfRange { .. } => 30,
            Error::LeafNotFound { .. } => 31,
            Error::SegmentUnavailable(_) => 32,
            Error::Config(_) => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Create a decoding error.
    pub fn decoding(msg: impl Into<String>) -> Self {
        Error::Decoding(msg.into())
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::UnsupportedOperation(msg.into())
    }

    /// Create a not-found error for a cache key.
    pub fn not_found(key: impl std::fmt::Display) -> Self {
        Error::GranuleDoesNotExist {
            key: key.to_string(),
        }
    }

    /// Whether this is the expected "no such granule" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::GranuleDoesNotExist { .. })
    }

    /// Whether this error indicates corrupt or malformed stored bytes.
    pub fn is_decoding(&self) -> bool {
        matches!(self, Error::Decoding(_) | Error::Truncated { .. })
    }

    /// Whether a segment-level scan may skip past this error.
    ///
    /// Only storage-level failures qualify; decoding failures inside a
    /// readable segment never do.
    pub fn is_segment_io(&self) -> bool {
        matches!(
            self,
            Error::GranuleDoesNotExist { .. } | Error::CacheUnavailable { .. }
        )
    }

    /// Whether the caller should retry the write that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::MutableToImmutableConversion { .. }
                | Error::CacheUnavailable { .. }
                | Error::CommitFailed { .. }
        )
    }
}
