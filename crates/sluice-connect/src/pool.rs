//! Concurrent writes across tables
//!
//! One `write` per table target runs at a time, up to `max_concurrent_tables`
//! targets in parallel. Writers for different tables share nothing but the
//! store, the registry and the shutdown token.

use crate::config::WriterConfig;
use crate::error::Result;
use crate::store::{SchemaRegistry, TableStore};
use crate::types::{RowFailures, TableTarget, WriteBatch};
use crate::writer::AdaptiveTableWriter;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-target outcome of a pool run
pub type TargetResult = (TableTarget, Result<RowFailures>);

/// Runs adaptive writes for many tables concurrently
pub struct WriterPool {
    writer: AdaptiveTableWriter,
}

impl WriterPool {
    pub fn new(
        store: Arc<dyn TableStore>,
        registry: Arc<dyn SchemaRegistry>,
        config: WriterConfig,
    ) -> Self {
        Self::from_writer(AdaptiveTableWriter::new(store, registry, config))
    }

    pub fn from_writer(writer: AdaptiveTableWriter) -> Self {
        Self { writer }
    }

    /// Use an externally owned shutdown token for every write
    pub fn with_shutdown(self, shutdown: CancellationToken) -> Self {
        Self::from_writer(self.writer.with_shutdown(shutdown))
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.writer.shutdown_token()
    }

    /// Write every batch to its table.
    ///
    /// Results come back in input order, one per batch, whether or not other
    /// targets failed.
    pub async fn write_all(&self, batches: Vec<(TableTarget, WriteBatch)>) -> Vec<TargetResult> {
        let concurrency = self.writer.config().max_concurrent_tables.max(1);
        debug!(tables = batches.len(), concurrency, "Writing batches");

        let writer = &self.writer;
        stream::iter(batches)
            .map(move |(target, batch)| async move {
                let result = writer.write(&batch, &target).await;
                (target, result)
            })
            .buffered(concurrency)
            .collect()
            .await
    }
}
