//! Remote write-error classification
//!
//! The store reports per-row failures as loosely structured `(reason, message)`
//! pairs and request failures as API status errors. Which of those mean "the
//! table's schema is behind the data" or "the table does not exist yet" can only
//! be told by matching on reason codes and message prefixes; those heuristics
//! live here, in one place, with no I/O and no retry logic.
//!
//! Anything that does not match a known shape is [`ErrorClass::Fatal`].

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const REASON_INVALID: &str = "invalid";
const REASON_STOPPED: &str = "stopped";
const MISSING_REQUIRED_PREFIX: &str = "Missing required field";
const UNRECOGNIZED_PREFIX: &str = "no such field";
const TABLE_NOT_FOUND_MESSAGE: &str = "Not found: Table";
const TABLE_MISSING_SCHEMA_MESSAGE: &str = "The destination table has no schema.";

/// A single row-level error returned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertError {
    /// Machine-readable reason code
    pub reason: String,
    /// Field the error refers to, when the store reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl InsertError {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            location: None,
            message: message.into(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Error for a row lacking a column the table requires
    pub fn missing_required_field(field: &str) -> Self {
        Self::new(REASON_INVALID, format!("{}: {}.", MISSING_REQUIRED_PREFIX, field))
            .with_location(field)
    }

    /// Error for a row carrying a column the table does not have
    pub fn unrecognized_field(field: &str) -> Self {
        Self::new(REASON_INVALID, format!("{}: {}.", UNRECOGNIZED_PREFIX, field))
            .with_location(field)
    }

    /// Error for a row rejected only because another row in the request failed
    pub fn stopped() -> Self {
        Self::new(REASON_STOPPED, "")
    }

    pub fn is_missing_required_field(&self) -> bool {
        self.reason == REASON_INVALID && self.message.starts_with(MISSING_REQUIRED_PREFIX)
    }

    pub fn is_unrecognized_field(&self) -> bool {
        self.reason == REASON_INVALID && self.message.starts_with(UNRECOGNIZED_PREFIX)
    }

    pub fn is_stopped(&self) -> bool {
        self.reason == REASON_STOPPED && self.message.is_empty()
    }

    /// Missing-required or unrecognized field
    pub fn is_schema_mismatch(&self) -> bool {
        self.is_missing_required_field() || self.is_unrecognized_field()
    }
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}: {}", self.reason, location, self.message),
            None => write!(f, "{}: {}", self.reason, self.message),
        }
    }
}

/// Row-level errors of one insert, keyed by batch position
pub type RowErrors = BTreeMap<usize, Vec<InsertError>>;

/// Outcome class of a failed insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The table's schema lags the rows being written
    SchemaMismatch,
    /// The table does not exist (yet)
    TableNotFound,
    /// Store-side hiccup; the same request may succeed later
    TransientServerError,
    /// Not recoverable by retrying
    Fatal,
}

impl ErrorClass {
    /// Can be fixed by a table create or schema update
    pub fn is_remediable(&self) -> bool {
        matches!(self, Self::SchemaMismatch | Self::TableNotFound)
    }

    /// Worth sending the same request again
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaMismatch => write!(f, "schema_mismatch"),
            Self::TableNotFound => write!(f, "table_not_found"),
            Self::TransientServerError => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Classify the row-level errors of one insert.
///
/// `SchemaMismatch` requires at least one missing-required or unrecognized
/// field error; `stopped` errors alongside them are ignored since they come
/// from rows still shaped for the old schema. Any other error, or a set of
/// only `stopped` errors, is `Fatal`.
pub fn classify<'a, I>(errors: I) -> ErrorClass
where
    I: IntoIterator<Item = &'a InsertError>,
{
    let mut schema_mismatch = false;
    for error in errors {
        if error.is_schema_mismatch() {
            schema_mismatch = true;
        } else if !error.is_stopped() {
            return ErrorClass::Fatal;
        }
    }

    if schema_mismatch {
        ErrorClass::SchemaMismatch
    } else {
        ErrorClass::Fatal
    }
}

/// Classify all row-level errors of an insert response
pub fn classify_row_errors(errors: &RowErrors) -> ErrorClass {
    classify(errors.values().flatten())
}

/// Classify a request-level store failure
pub fn classify_request_error(error: &StoreError) -> ErrorClass {
    if is_table_not_found(error) {
        ErrorClass::TableNotFound
    } else if is_table_missing_schema(error) {
        ErrorClass::SchemaMismatch
    } else if is_transient(error) {
        ErrorClass::TransientServerError
    } else {
        ErrorClass::Fatal
    }
}

/// 404 for a table that does not exist
pub fn is_table_not_found(error: &StoreError) -> bool {
    matches!(
        error,
        StoreError::Api { code: 404, reason, message }
            if reason == "notFound" && message.contains(TABLE_NOT_FOUND_MESSAGE)
    )
}

/// 400 for a table that exists but has no columns yet
pub fn is_table_missing_schema(error: &StoreError) -> bool {
    matches!(
        error,
        StoreError::Api { code: 400, reason, message }
            if reason == REASON_INVALID && message.contains(TABLE_MISSING_SCHEMA_MESSAGE)
    )
}

/// Backend errors, unavailability, quota and rate limits, and lost connections
pub fn is_transient(error: &StoreError) -> bool {
    match error {
        StoreError::Api { code, reason, .. } => match code {
            500 => reason == "backendError",
            503 => true,
            403 => reason == "quotaExceeded" || reason == "rateLimitExceeded",
            _ => false,
        },
        StoreError::Transport(_) => true,
        StoreError::Schema(_) | StoreError::InvalidResponse(_) => false,
    }
}

/// 409 from a create for a table that already exists
pub fn is_already_exists(error: &StoreError) -> bool {
    matches!(error, StoreError::Api { code: 409, reason, .. } if reason == "duplicate")
}
