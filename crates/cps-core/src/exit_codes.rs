//! Exit codes for the `cps` CLI.

use cps_common::Error;

/// Process exit codes. Stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Command succeeded
    Clean = 0,

    /// Query succeeded but matched nothing
    NoData = 1,

    /// Configuration or argument error
    ConfigError = 10,

    /// Stored or ingested bytes could not be decoded
    DecodingError = 11,

    /// Backing cache or commit failure
    StorageError = 12,

    /// I/O error
    IoError = 13,

    /// Spatial addressing error
    SpatialError = 14,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean | ExitCode::NoData)
    }

    /// Classify an error by its code band.
    pub fn from_error(error: &Error) -> Self {
        match error.code() {
            10..=19 => ExitCode::DecodingError,
            20..=29 => ExitCode::StorageError,
            30..=39 => ExitCode::SpatialError,
            50..=59 => ExitCode::ConfigError,
            60 => ExitCode::IoError,
            61 => ExitCode::DecodingError,
            _ => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_by_band() {
        assert_eq!(
            ExitCode::from_error(&Error::decoding("x")),
            ExitCode::DecodingError
        );
        assert_eq!(
            ExitCode::from_error(&Error::not_found("k")),
            ExitCode::StorageError
        );
        assert_eq!(
            ExitCode::from_error(&Error::LeafNotFound { x: 0, y: 0 }),
            ExitCode::SpatialError
        );
        assert_eq!(
            ExitCode::from_error(&Error::Config("bad".into())),
            ExitCode::ConfigError
        );
        assert_eq!(ExitCode::ConfigError.as_i32(), 10);
        assert!(ExitCode::NoData.is_success());
        assert!(!ExitCode::IoError.is_success());
    }
}
