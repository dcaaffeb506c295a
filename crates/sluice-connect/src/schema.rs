//! Store-side table schema model
//!
//! These types describe a destination table the way the store sees it. How a
//! source field type maps onto a [`ColumnType`] is decided by the
//! [`SchemaRegistry`](crate::SchemaRegistry) implementation, not here.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    String,
    Bytes,
    Int64,
    Float64,
    Numeric,
    Bool,
    Timestamp,
    Date,
    Time,
    Datetime,
    Json,
    Record,
}

/// Column nullability / cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

/// A single column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub mode: ColumnMode,
    /// Sub-columns of a `RECORD` column
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<ColumnSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            mode: ColumnMode::Nullable,
            fields: Vec::new(),
            description: None,
        }
    }

    /// A `RECORD` column with sub-columns
    pub fn record(name: impl Into<String>, fields: Vec<ColumnSchema>) -> Self {
        Self {
            fields,
            ..Self::new(name, ColumnType::Record)
        }
    }

    pub fn required(mut self) -> Self {
        self.mode = ColumnMode::Required;
        self
    }

    pub fn repeated(mut self) -> Self {
        self.mode = ColumnMode::Repeated;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Column list of a table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    pub fn with_column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Columns of this schema that a table with `existing` columns lacks.
    ///
    /// Additions are always nullable, so applying them only ever adds columns
    /// and re-applying after a concurrent update is a no-op.
    pub fn additions(&self, existing: &[&str]) -> Vec<ColumnSchema> {
        self.columns
            .iter()
            .filter(|column| !existing.contains(&column.name.as_str()))
            .map(|column| {
                let mut added = column.clone();
                if added.mode == ColumnMode::Required {
                    added.mode = ColumnMode::Nullable;
                }
                added
            })
            .collect()
    }
}
