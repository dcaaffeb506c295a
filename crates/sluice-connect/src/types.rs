//! Common types for sluice-connect

use crate::classifier::InsertError;
use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sluice_cdc::ProjectedRow;
use std::collections::HashMap;
use std::fmt;

/// Destination table (namespace + name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct TableTarget {
    /// Namespace the table lives in (dataset, schema, database)
    pub dataset: String,
    /// Table name
    pub table: String,
}

impl TableTarget {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Parse `dataset.table`
    pub fn parse(s: &str) -> Option<Self> {
        let (dataset, table) = s.split_once('.')?;
        if dataset.is_empty() || table.is_empty() || table.contains('.') {
            return None;
        }
        Some(Self::new(dataset, table))
    }
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Stable identity of an inbound record, used to correlate write failures
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    /// Stream (topic) the record was read from
    pub stream: String,
    /// Partition within the stream
    pub partition: u32,
    /// Offset within the partition
    pub offset: u64,
}

impl RecordId {
    pub fn new(stream: impl Into<String>, partition: u32, offset: u64) -> Self {
        Self {
            stream: stream.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.stream, self.partition, self.offset)
    }
}

/// One row of a batch, tagged with the record it came from
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    pub id: RecordId,
    pub row: ProjectedRow,
}

impl BatchRecord {
    pub fn new(id: RecordId, row: ProjectedRow) -> Self {
        Self { id, row }
    }
}

/// Ordered rows bound for a single table
///
/// Row order is preserved end-to-end: the store reports failures by batch
/// position, which is mapped back to the record identity here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    records: Vec<BatchRecord>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, id: RecordId, row: ProjectedRow) {
        self.records.push(BatchRecord::new(id, row));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record at a batch position
    pub fn get(&self, index: usize) -> Option<&BatchRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[BatchRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BatchRecord> {
        self.records.iter()
    }

    /// Rows in batch order
    pub fn rows(&self) -> impl Iterator<Item = &ProjectedRow> {
        self.records.iter().map(|r| &r.row)
    }
}

impl FromIterator<BatchRecord> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = BatchRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for WriteBatch {
    type Item = BatchRecord;
    type IntoIter = std::vec::IntoIter<BatchRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a WriteBatch {
    type Item = &'a BatchRecord;
    type IntoIter = std::slice::Iter<'a, BatchRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Per-record failures of a write; empty means every row was accepted
pub type RowFailures = HashMap<RecordId, Vec<InsertError>>;

/// A wrapper around `SecretString` that keeps credentials out of logs.
///
/// Debug and Display print `[REDACTED]`; serialization writes
/// `"***REDACTED***"`. Use [`expose_secret`](Self::expose_secret) to read it.
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl JsonSchema for SensitiveString {
    fn schema_name() -> String {
        "SensitiveString".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = gen.subschema_for::<String>();
        if let schemars::schema::Schema::Object(obj) = &mut schema {
            obj.format = Some("password".to_string());
            obj.metadata().description =
                Some("Credential material, redacted in logs and config dumps.".to_string());
        }
        schema
    }
}
