//! Validation results and errors.

use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl From<ValidationError> for cps_common::Error {
    fn from(err: ValidationError) -> Self {
        cps_common::Error::Config(err.to_string())
    }
}

/// Accumulated validation findings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn error(&mut self, msg: String) {
        self.errors.push(msg);
    }

    pub(crate) fn warn(&mut self, msg: String) {
        self.warnings.push(msg);
    }
}
