//! Error types for Dynaform

use crate::expression::ExpressionError;
use crate::path::PathError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Dynaform errors
///
/// Only operations that fail as a whole return these. Problems inside a
/// value-change cycle are recorded as [`crate::Diagnostic`]s instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Unknown field type '{field_type}' for field '{key}'")]
    UnknownFieldType { key: String, field_type: String },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Array event dispatched to unknown array '{0}'")]
    UnknownArray(String),

    #[error("Array index {index} out of bounds for '{array}' ({len} items)")]
    ArrayIndexOutOfBounds {
        array: String,
        index: usize,
        len: usize,
    },

    #[error("A submission is already in flight")]
    SubmissionInFlight,

    #[error("No submission action configured")]
    NoSubmissionAction,

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_norway::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownArray("contacts".into());
        assert_eq!(
            err.to_string(),
            "Array event dispatched to unknown array 'contacts'"
        );
    }

    #[test]
    fn test_path_error_converts() {
        let err: Error = PathError::NoEnclosingScope {
            path: "$.phone".into(),
        }
        .into();
        assert!(err.to_string().contains("$.phone"));
    }
}
