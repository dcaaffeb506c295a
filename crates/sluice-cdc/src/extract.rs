//! Row extraction
//!
//! Flattens a [`ChangeEnvelope`] into the single row that gets written to the
//! destination table, optionally tagging it with envelope metadata.
//!
//! # Example
//!
//! ```rust
//! use sluice_cdc::{ChangeEnvelope, DeleteHandling, FieldSchema, FieldType, RowExtractor, RowSnapshot};
//! use serde_json::json;
//!
//! let before = RowSnapshot::new(vec![FieldSchema::new("id", 0, FieldType::Int64)], vec![json!(7)]);
//! let extractor = RowExtractor::new()
//!     .delete_handling(DeleteHandling::Rewrite)
//!     .add_op_field();
//!
//! let row = extractor.extract(&ChangeEnvelope::delete(before)).unwrap().unwrap();
//! assert_eq!(row.get("__deleted"), Some(&json!(true)));
//! assert_eq!(row.get("__op"), Some(&json!("d")));
//! ```

use crate::error::{CdcError, Result};
use crate::event::ChangeEnvelope;
use crate::projector::{project, ProjectedRow};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// How to handle delete operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeleteHandling {
    /// Skip delete events
    Drop,
    /// Write the before image with a `deleted` marker column
    Rewrite,
    /// Write the before image as-is
    #[default]
    None,
}

/// Turns envelopes into writable rows
#[derive(Debug, Clone)]
pub struct RowExtractor {
    delete_handling: DeleteHandling,
    add_op: bool,
    add_ts: bool,
    field_prefix: String,
}

impl Default for RowExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl RowExtractor {
    /// Create an extractor with default settings.
    pub fn new() -> Self {
        Self {
            delete_handling: DeleteHandling::None,
            add_op: false,
            add_ts: false,
            field_prefix: "__".to_string(),
        }
    }

    /// Set delete handling mode.
    pub fn delete_handling(mut self, mode: DeleteHandling) -> Self {
        self.delete_handling = mode;
        self
    }

    /// Add the operation code column.
    pub fn add_op_field(mut self) -> Self {
        self.add_op = true;
        self
    }

    /// Add the event timestamp column.
    pub fn add_ts_field(mut self) -> Self {
        self.add_ts = true;
        self
    }

    /// Set the prefix for added columns.
    pub fn field_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.field_prefix = prefix.into();
        self
    }

    /// Project the envelope's row image and apply the configured handling.
    ///
    /// Returns `Ok(None)` when the event is a delete and deletes are dropped.
    pub fn extract(&self, envelope: &ChangeEnvelope) -> Result<Option<ProjectedRow>> {
        if envelope.is_delete() && self.delete_handling == DeleteHandling::Drop {
            trace!("Dropping delete event");
            return Ok(None);
        }

        let mut row = project(envelope.row_image())?;

        if self.delete_handling == DeleteHandling::Rewrite {
            self.add_column(&mut row, "deleted", Value::Bool(envelope.is_delete()))?;
        }
        if self.add_op {
            let op = Value::String(envelope.op().code().to_string());
            self.add_column(&mut row, "op", op)?;
        }
        if self.add_ts {
            let ts = envelope.ts_ms().map(Value::from).unwrap_or(Value::Null);
            self.add_column(&mut row, "ts_ms", ts)?;
        }

        Ok(Some(row))
    }

    /// Metadata columns never replace a source column.
    fn add_column(&self, row: &mut ProjectedRow, name: &str, value: Value) -> Result<()> {
        let column = self.column(name);
        if row.contains(&column) {
            return Err(CdcError::DuplicateColumn { path: column });
        }
        row.insert(column, value);
        Ok(())
    }

    fn column(&self, name: &str) -> String {
        format!("{}{}", self.field_prefix, name)
    }
}
