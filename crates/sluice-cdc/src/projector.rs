//! Positional row projection
//!
//! Turns a [`RowSnapshot`] into a named [`ProjectedRow`] by zipping the field
//! sequence with the value sequence. Each field's declared `index` is checked
//! against its position before the value is assigned; a disagreement means the
//! producer's schema and values drifted apart and is reported rather than
//! silently re-ordered. Projection is all-or-nothing: no partial row is ever
//! returned.

use crate::error::{CdcError, Result};
use crate::schema::{FieldSchema, RowSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const ROOT_PATH: &str = "(root)";

/// Column name to value mapping for one row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectedRow(Map<String, Value>);

impl ProjectedRow {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a column value
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Check if a column is present
    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    /// Set a column value, returning the previous one
    pub fn insert(&mut self, column: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(column.into(), value)
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Column names
    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Column/value pairs
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Borrow the underlying JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Unwrap into the underlying JSON object
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<ProjectedRow> for Value {
    fn from(row: ProjectedRow) -> Self {
        Value::Object(row.0)
    }
}

impl From<Map<String, Value>> for ProjectedRow {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Project a snapshot into a named row
pub fn project(snapshot: &RowSnapshot) -> Result<ProjectedRow> {
    project_fields(&snapshot.fields, &snapshot.values)
}

/// Project parallel field and value sequences into a named row
pub fn project_fields(fields: &[FieldSchema], values: &[Value]) -> Result<ProjectedRow> {
    project_at(None, fields, values)
}

fn project_at(prefix: Option<&str>, fields: &[FieldSchema], values: &[Value]) -> Result<ProjectedRow> {
    if fields.len() != values.len() {
        return Err(CdcError::SchemaValueArityMismatch {
            path: prefix.unwrap_or(ROOT_PATH).to_string(),
            fields: fields.len(),
            values: values.len(),
        });
    }

    let mut row = Map::with_capacity(fields.len());
    for (position, (field, value)) in fields.iter().zip(values).enumerate() {
        let path = match prefix {
            Some(prefix) => format!("{}.{}", prefix, field.name),
            None => field.name.clone(),
        };

        if field.index != position {
            return Err(CdcError::SchemaIndexMismatch {
                path,
                index: field.index,
                position,
            });
        }

        let projected = match &field.fields {
            Some(nested) => project_nested(&path, field, nested, value)?,
            None => value.clone(),
        };

        if row.insert(field.name.clone(), projected).is_some() {
            return Err(CdcError::DuplicateColumn { path });
        }
    }

    Ok(ProjectedRow(row))
}

fn project_nested(
    path: &str,
    field: &FieldSchema,
    nested: &[FieldSchema],
    value: &Value,
) -> Result<Value> {
    let values = match value {
        Value::Null if field.optional => return Ok(Value::Null),
        Value::Null => {
            return Err(CdcError::invalid_nested(
                path,
                "required composite field is null",
            ))
        }
        Value::Array(values) => values,
        Value::Object(object) => match object.get("values") {
            Some(Value::Array(values)) => values,
            _ => {
                return Err(CdcError::invalid_nested(
                    path,
                    "snapshot object has no 'values' array",
                ))
            }
        },
        _ => {
            return Err(CdcError::invalid_nested(
                path,
                "expected a snapshot object or value array",
            ))
        }
    };

    project_at(Some(path), nested, values).map(Value::from)
}
