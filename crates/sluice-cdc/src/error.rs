//! Error types for envelope decoding and row projection
//!
//! Every error here is a producer-contract violation: the input did not have the
//! shape the decoder or projector requires. None of them are retriable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for CDC operations
pub type Result<T> = std::result::Result<T, CdcError>;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The change envelope itself is malformed
    Envelope,
    /// Snapshot schema and values disagree
    Projection,
    /// JSON (de)serialization failed
    Serialization,
}

/// CDC-specific errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// Wrong arity, unknown operation marker, or a missing row image
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Schema and value sequences have different lengths
    #[error("Schema/value arity mismatch at '{path}': {fields} fields, {values} values")]
    SchemaValueArityMismatch {
        path: String,
        fields: usize,
        values: usize,
    },

    /// A field's declared index differs from its position among its siblings
    #[error("Schema index mismatch for field '{path}': declared index {index}, position {position}")]
    SchemaIndexMismatch {
        path: String,
        index: usize,
        position: usize,
    },

    /// Two sibling fields share a name
    #[error("Duplicate column '{path}'")]
    DuplicateColumn { path: String },

    /// A composite field's value is not snapshot-shaped
    #[error("Invalid nested value for field '{path}': {reason}")]
    InvalidNestedValue { path: String, reason: String },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CdcError {
    /// Create a malformed envelope error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEnvelope(msg.into())
    }

    /// Create an invalid nested value error
    pub fn invalid_nested(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNestedValue {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable.
    ///
    /// Decoding is deterministic, so retrying the same input yields the same error.
    pub fn is_retriable(&self) -> bool {
        false
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedEnvelope(_) => ErrorCategory::Envelope,
            Self::SchemaValueArityMismatch { .. }
            | Self::SchemaIndexMismatch { .. }
            | Self::DuplicateColumn { .. }
            | Self::InvalidNestedValue { .. } => ErrorCategory::Projection,
            Self::Json(_) => ErrorCategory::Serialization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CdcError::SchemaIndexMismatch {
            path: "address.city".to_string(),
            index: 3,
            position: 1,
        };
        assert_eq!(
            err.to_string(),
            "Schema index mismatch for field 'address.city': declared index 3, position 1"
        );

        let err = CdcError::malformed("unknown operation 'x'");
        assert_eq!(err.to_string(), "Malformed envelope: unknown operation 'x'");
    }

    #[test]
    fn test_never_retriable() {
        assert!(!CdcError::malformed("bad").is_retriable());
        assert!(!CdcError::DuplicateColumn {
            path: "id".to_string()
        }
        .is_retriable());
    }

    #[test]
    fn test_category() {
        assert_eq!(
            CdcError::malformed("bad").category(),
            ErrorCategory::Envelope
        );
        assert_eq!(
            CdcError::SchemaValueArityMismatch {
                path: String::new(),
                fields: 2,
                values: 1
            }
            .category(),
            ErrorCategory::Projection
        );
        assert_eq!(
            CdcError::invalid_nested("a", "not an object").category(),
            ErrorCategory::Projection
        );
    }
}
