//! Error types for sluice-connect
//!
//! [`StoreError`] is what a remote table store reports. [`WriteError`] is what a
//! write call surfaces to its caller once the writer has given up on local
//! recovery.

use crate::types::{RecordId, TableTarget};
use sluice_cdc::CdcError;
use thiserror::Error;

/// Result type alias for write operations
pub type Result<T> = std::result::Result<T, WriteError>;

/// Result type alias for table store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors reported by a remote table store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Request rejected by the store API
    #[error("api error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    /// Request never got a response (connection reset, timeout, ...)
    #[error("transport error: {0}")]
    Transport(String),

    /// A schema could not be derived or applied
    #[error("schema error: {0}")]
    Schema(String),

    /// The store answered with something that cannot be interpreted
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    /// Create an API error
    pub fn api(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// HTTP-style status code, if the store returned one
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Machine-readable reason, if the store returned one
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Api { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Errors surfaced by batch assembly and table writes
#[derive(Debug, Error)]
pub enum WriteError {
    /// An inbound record could not be decoded or projected
    #[error("record {record} could not be decoded: {source}")]
    Decode {
        record: RecordId,
        #[source]
        source: CdcError,
    },

    /// Table is missing and automatic creation is disabled
    #[error("table {table} does not exist and automatic table creation is disabled")]
    TableNotFound { table: TableTarget },

    /// Creating a missing table failed
    #[error("failed to create table {table}: {source}")]
    TableCreate {
        table: TableTarget,
        #[source]
        source: StoreError,
    },

    /// Updating a table's schema failed
    #[error("failed to update schema of table {table}: {source}")]
    SchemaUpdate {
        table: TableTarget,
        #[source]
        source: StoreError,
    },

    /// Remediable errors kept recurring past the retry ceiling
    #[error("failed to write to table {table} after {attempts} attempts")]
    RetryLimitExceeded { table: TableTarget, attempts: u32 },

    /// Shutdown was requested while waiting between attempts
    #[error("write to table {table} interrupted by shutdown")]
    Interrupted { table: TableTarget },

    /// Non-remediable store failure
    #[error("store error on table {table}: {source}")]
    Store {
        table: TableTarget,
        #[source]
        source: StoreError,
    },

    /// Invalid writer configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl WriteError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a decode error for a record
    pub fn decode(record: RecordId, source: CdcError) -> Self {
        Self::Decode { record, source }
    }

    /// Check if this is an orderly shutdown rather than a failure
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }

    /// Table the error refers to, if any
    pub fn table(&self) -> Option<&TableTarget> {
        match self {
            Self::TableNotFound { table }
            | Self::TableCreate { table, .. }
            | Self::SchemaUpdate { table, .. }
            | Self::RetryLimitExceeded { table, .. }
            | Self::Interrupted { table }
            | Self::Store { table, .. } => Some(table),
            Self::Decode { .. } | Self::Config(_) => None,
        }
    }

    /// Record the error refers to, if any
    pub fn record(&self) -> Option<&RecordId> {
        match self {
            Self::Decode { record, .. } => Some(record),
            _ => None,
        }
    }
}
