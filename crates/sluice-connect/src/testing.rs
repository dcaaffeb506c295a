//! Test doubles for the store and registry collaborators
//!
//! # Example
//!
//! ```rust
//! use sluice_connect::testing::{MockSchemaRegistry, MockTableStore};
//! use sluice_connect::{AdaptiveTableWriter, StoreError, TableTarget, WriteBatch, WriterConfig};
//! use std::sync::Arc;
//!
//! # async fn example(batch: WriteBatch) {
//! let store = Arc::new(MockTableStore::new().with_insert_results(vec![Err(
//!     StoreError::api(404, "notFound", "Not found: Table p:shop.orders"),
//! )]));
//! let config = WriterConfig { auto_create_tables: true, ..Default::default() };
//! let writer = AdaptiveTableWriter::new(store.clone(), Arc::new(MockSchemaRegistry::new()), config);
//!
//! writer.write(&batch, &TableTarget::new("shop", "orders")).await.unwrap();
//! assert_eq!(store.create_calls(), 1);
//! # }
//! ```

use crate::classifier::RowErrors;
use crate::error::StoreResult;
use crate::schema::{ColumnSchema, ColumnType, TableSchema};
use crate::store::{SchemaRegistry, TableStore};
use crate::types::{TableTarget, WriteBatch};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

// ============================================================================
// Mock Table Store
// ============================================================================

/// In-memory table store with scripted responses.
///
/// Insert responses are consumed in order; once the script runs out every
/// insert succeeds. Create and update calls return their configured result
/// (success by default) on every call.
#[derive(Debug)]
pub struct MockTableStore {
    insert_results: Arc<Mutex<VecDeque<StoreResult<RowErrors>>>>,
    create_result: Arc<Mutex<StoreResult<()>>>,
    update_result: Arc<Mutex<StoreResult<()>>>,
    inserts: Arc<Mutex<Vec<(TableTarget, WriteBatch)>>>,
    creates: Arc<Mutex<Vec<(TableTarget, TableSchema)>>>,
    updates: Arc<Mutex<Vec<(TableTarget, TableSchema)>>>,
}

impl Default for MockTableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTableStore {
    pub fn new() -> Self {
        Self {
            insert_results: Arc::new(Mutex::new(VecDeque::new())),
            create_result: Arc::new(Mutex::new(Ok(()))),
            update_result: Arc::new(Mutex::new(Ok(()))),
            inserts: Arc::new(Mutex::new(Vec::new())),
            creates: Arc::new(Mutex::new(Vec::new())),
            updates: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Script the responses of the next inserts
    pub fn with_insert_results(self, results: Vec<StoreResult<RowErrors>>) -> Self {
        self.insert_results.lock().extend(results);
        self
    }

    /// Append one scripted insert response
    pub fn push_insert_result(&self, result: StoreResult<RowErrors>) {
        self.insert_results.lock().push_back(result);
    }

    /// Result of every `create_table` call
    pub fn with_create_result(self, result: StoreResult<()>) -> Self {
        *self.create_result.lock() = result;
        self
    }

    /// Result of every `update_table_schema` call
    pub fn with_update_result(self, result: StoreResult<()>) -> Self {
        *self.update_result.lock() = result;
        self
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.lock().len()
    }

    pub fn create_calls(&self) -> usize {
        self.creates.lock().len()
    }

    pub fn update_calls(&self) -> usize {
        self.updates.lock().len()
    }

    /// Every batch passed to `insert_batch`, in call order
    pub fn inserted(&self) -> Vec<(TableTarget, WriteBatch)> {
        self.inserts.lock().clone()
    }

    /// Every schema passed to `create_table`, in call order
    pub fn created(&self) -> Vec<(TableTarget, TableSchema)> {
        self.creates.lock().clone()
    }

    /// Every schema passed to `update_table_schema`, in call order
    pub fn updated(&self) -> Vec<(TableTarget, TableSchema)> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl TableStore for MockTableStore {
    async fn insert_batch(&self, table: &TableTarget, batch: &WriteBatch) -> StoreResult<RowErrors> {
        self.inserts.lock().push((table.clone(), batch.clone()));
        self.insert_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(RowErrors::new()))
    }

    async fn create_table(&self, table: &TableTarget, schema: &TableSchema) -> StoreResult<()> {
        self.creates.lock().push((table.clone(), schema.clone()));
        self.create_result.lock().clone()
    }

    async fn update_table_schema(
        &self,
        table: &TableTarget,
        schema: &TableSchema,
    ) -> StoreResult<()> {
        self.updates.lock().push((table.clone(), schema.clone()));
        self.update_result.lock().clone()
    }
}

// ============================================================================
// Mock Schema Registry
// ============================================================================

/// Registry that types every column of the batch as a nullable string.
#[derive(Debug, Default)]
pub struct MockSchemaRegistry {
    calls: Arc<Mutex<Vec<TableTarget>>>,
    fail_with: Arc<Mutex<Option<crate::error::StoreError>>>,
}

impl MockSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every derivation fail
    pub fn fail_with(self, error: crate::error::StoreError) -> Self {
        *self.fail_with.lock() = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl SchemaRegistry for MockSchemaRegistry {
    async fn derive_schema(
        &self,
        table: &TableTarget,
        batch: &WriteBatch,
    ) -> StoreResult<TableSchema> {
        self.calls.lock().push(table.clone());
        if let Some(err) = self.fail_with.lock().clone() {
            return Err(err);
        }

        let mut schema = TableSchema::default();
        for row in batch.rows() {
            for column in row.columns() {
                if schema.column(column).is_none() {
                    schema.columns.push(ColumnSchema::new(column.as_str(), ColumnType::String));
                }
            }
        }
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::types::RecordId;
    use serde_json::json;
    use sluice_cdc::ProjectedRow;

    #[tokio::test]
    async fn test_mock_store_script_then_success() {
        let store = MockTableStore::new()
            .with_insert_results(vec![Err(StoreError::transport("reset"))]);
        let table = TableTarget::new("a", "b");

        assert!(store.insert_batch(&table, &WriteBatch::new()).await.is_err());
        assert!(store.insert_batch(&table, &WriteBatch::new()).await.unwrap().is_empty());
        assert_eq!(store.insert_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_registry_collects_columns() {
        let mut batch = WriteBatch::new();
        let mut row = ProjectedRow::new();
        row.insert("id", json!(1));
        row.insert("name", json!("x"));
        batch.push(RecordId::new("s", 0, 0), row.clone());
        batch.push(RecordId::new("s", 0, 1), row);

        let registry = MockSchemaRegistry::new();
        let schema = registry
            .derive_schema(&TableTarget::new("a", "b"), &batch)
            .await
            .unwrap();

        assert_eq!(schema.len(), 2);
        assert_eq!(registry.calls(), 1);
    }
}
