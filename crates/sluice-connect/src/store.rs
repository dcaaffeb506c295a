//! Collaborator traits for the remote table store and the schema registry
//!
//! The writer only talks to the outside world through these two traits, so any
//! store (or an in-memory double) can be plugged in.

use crate::classifier::RowErrors;
use crate::error::{StoreError, StoreResult};
use crate::schema::TableSchema;
use crate::types::{TableTarget, WriteBatch};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Remote tabular store
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Insert all rows of a batch in one request.
    ///
    /// `Ok` with an empty map means every row was accepted. Row-level failures
    /// are keyed by batch position. `Err` means the request as a whole failed.
    async fn insert_batch(&self, table: &TableTarget, batch: &WriteBatch) -> StoreResult<RowErrors>;

    /// Create a table with the given schema
    async fn create_table(&self, table: &TableTarget, schema: &TableSchema) -> StoreResult<()>;

    /// Add the schema's missing columns to an existing table.
    ///
    /// Must be idempotent: concurrent writers may issue the same update.
    async fn update_table_schema(
        &self,
        table: &TableTarget,
        schema: &TableSchema,
    ) -> StoreResult<()>;
}

/// Source of store-compatible table schemas
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Schema the table needs in order to accept the rows of `batch`
    async fn derive_schema(&self, table: &TableTarget, batch: &WriteBatch)
        -> StoreResult<TableSchema>;
}

/// Registry serving pre-registered schemas per table
#[derive(Debug, Default)]
pub struct StaticSchemaRegistry {
    schemas: RwLock<HashMap<TableTarget, TableSchema>>,
}

impl StaticSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema at construction time
    pub fn with_schema(self, table: TableTarget, schema: TableSchema) -> Self {
        self.register(table, schema);
        self
    }

    /// Register or replace a table's schema
    pub fn register(&self, table: TableTarget, schema: TableSchema) -> Option<TableSchema> {
        self.schemas.write().insert(table, schema)
    }

    pub fn get(&self, table: &TableTarget) -> Option<TableSchema> {
        self.schemas.read().get(table).cloned()
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn derive_schema(
        &self,
        table: &TableTarget,
        _batch: &WriteBatch,
    ) -> StoreResult<TableSchema> {
        self.get(table)
            .ok_or_else(|| StoreError::schema(format!("no schema registered for table {}", table)))
    }
}
