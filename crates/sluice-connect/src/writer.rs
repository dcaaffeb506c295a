//! Adaptive table writer
//!
//! Writes one batch to one table and keeps going through the two kinds of
//! store state that lag behind the data: a table that does not exist yet and a
//! table whose columns are older than the rows.
//!
//! ```text
//!            ┌──────────────── transient / recurring ──────────────┐
//!            ▼                     (wait, resend)                  │
//!   ──▶  SEND ──ok──▶ DONE                                         │
//!          │ ├─ row data errors ──▶ partial failure (final)        │
//!          │ ├─ table not found ──▶ CREATE_TABLE (once) ──▶ SEND ──┤
//!          │ ├─ schema mismatch ──▶ UPDATE_SCHEMA (once) ─▶ SEND ──┘
//!          │ └─ fatal ────────────▶ FAILED
//!          └── retries exhausted ─▶ FAILED (RetryLimitExceeded)
//! ```
//!
//! Remote DDL takes minutes to become visible, so after the single remediation
//! the writer keeps resending instead of remediating again. The first resend
//! after a remediation goes out immediately; every other resend waits
//! `retry_wait_ms`. Shutdown is only observed during that wait.

use crate::classifier::{
    classify_request_error, classify_row_errors, is_already_exists, ErrorClass, RowErrors,
};
use crate::config::WriterConfig;
use crate::error::{Result, StoreError, WriteError};
use crate::store::{SchemaRegistry, TableStore};
use crate::types::{RowFailures, TableTarget, WriteBatch};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// What the last send asked the writer to do next
enum Step {
    Remediate(ErrorClass),
    Resend,
}

/// Per-call remediation bookkeeping; nothing survives a `write` call
#[derive(Debug, Default)]
struct Remediation {
    table_created: bool,
    schema_updated: bool,
}

/// Writes batches to a remote table store, healing schema drift on the way
pub struct AdaptiveTableWriter {
    store: Arc<dyn TableStore>,
    registry: Arc<dyn SchemaRegistry>,
    config: WriterConfig,
    shutdown: CancellationToken,
}

impl AdaptiveTableWriter {
    pub fn new(
        store: Arc<dyn TableStore>,
        registry: Arc<dyn SchemaRegistry>,
        config: WriterConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an externally owned shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Token that interrupts the wait between attempts
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Write a batch to a table.
    ///
    /// Returns the per-record failures of the final response; an empty map
    /// means every row was accepted. Row failures that are not caused by schema
    /// drift are returned as-is without retrying.
    pub async fn write(&self, batch: &WriteBatch, target: &TableTarget) -> Result<RowFailures> {
        if batch.is_empty() {
            return Ok(RowFailures::new());
        }

        let started = Instant::now();
        let result = self.write_inner(batch, target).await;
        histogram!("sluice.writer.write.duration_ms").record(started.elapsed().as_millis() as f64);

        match &result {
            Ok(failures) => {
                let failed = failures.len();
                counter!("sluice.writer.rows.written")
                    .increment(batch.len().saturating_sub(failed) as u64);
                counter!("sluice.writer.rows.failed").increment(failed as u64);
            }
            Err(err) if err.is_interruption() => {
                info!(table = %target, "Write interrupted by shutdown");
            }
            Err(err) => {
                counter!("sluice.writer.rows.failed").increment(batch.len() as u64);
                warn!(table = %target, rows = batch.len(), error = %err, "Write failed");
            }
        }
        result
    }

    async fn write_inner(&self, batch: &WriteBatch, target: &TableTarget) -> Result<RowFailures> {
        let mut remediation = Remediation::default();
        let mut sends: u32 = 0;
        let mut wait_first = false;

        loop {
            if sends > 0 {
                if wait_first {
                    self.wait_before_retry(target).await?;
                }
                counter!("sluice.writer.retries").increment(1);
            }

            sends += 1;
            counter!("sluice.writer.sends").increment(1);
            trace!(table = %target, attempt = sends, rows = batch.len(), "Sending batch");

            let step = match self.store.insert_batch(target, batch).await {
                Ok(errors) if errors.is_empty() => {
                    if sends > 1 {
                        debug!(table = %target, attempt = sends, "Batch accepted on retry");
                    }
                    return Ok(RowFailures::new());
                }
                Ok(errors) => match classify_row_errors(&errors) {
                    ErrorClass::SchemaMismatch => Step::Remediate(ErrorClass::SchemaMismatch),
                    _ => {
                        debug!(
                            table = %target,
                            failed_rows = errors.len(),
                            "Batch rejected with row data errors"
                        );
                        return correlate(batch, target, errors);
                    }
                },
                Err(err) => match classify_request_error(&err) {
                    ErrorClass::TableNotFound if !self.config.auto_create_tables => {
                        return Err(WriteError::TableNotFound {
                            table: target.clone(),
                        });
                    }
                    ErrorClass::TableNotFound => Step::Remediate(ErrorClass::TableNotFound),
                    ErrorClass::SchemaMismatch => Step::Remediate(ErrorClass::SchemaMismatch),
                    ErrorClass::TransientServerError => {
                        debug!(table = %target, attempt = sends, error = %err, "Transient store error");
                        Step::Resend
                    }
                    ErrorClass::Fatal => {
                        return Err(WriteError::Store {
                            table: target.clone(),
                            source: err,
                        });
                    }
                },
            };

            // No resend left, so any remediation would be wasted.
            if sends > self.config.max_retries {
                return Err(WriteError::RetryLimitExceeded {
                    table: target.clone(),
                    attempts: sends,
                });
            }

            wait_first = true;
            if let Step::Remediate(class) = step {
                if self.remediate(class, &mut remediation, batch, target).await? {
                    wait_first = false;
                } else {
                    debug!(table = %target, attempt = sends, %class, "Waiting for remediation to take effect");
                }
            }
        }
    }

    /// Run the remediation for `class` unless it already ran during this call.
    ///
    /// Returns whether a remediation was performed.
    async fn remediate(
        &self,
        class: ErrorClass,
        done: &mut Remediation,
        batch: &WriteBatch,
        target: &TableTarget,
    ) -> Result<bool> {
        match class {
            ErrorClass::TableNotFound if !done.table_created => {
                done.table_created = true;
                self.create_table(batch, target).await?;
                Ok(true)
            }
            ErrorClass::SchemaMismatch if !done.schema_updated => {
                done.schema_updated = true;
                self.update_schema(batch, target).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_table(&self, batch: &WriteBatch, target: &TableTarget) -> Result<()> {
        info!(table = %target, "Table not found, creating it");
        counter!("sluice.writer.remediations", "kind" => "create_table").increment(1);

        let to_error = |source: StoreError| WriteError::TableCreate {
            table: target.clone(),
            source,
        };
        let schema = self
            .registry
            .derive_schema(target, batch)
            .await
            .map_err(to_error)?;

        match self.store.create_table(target, &schema).await {
            Ok(()) => Ok(()),
            Err(err) if is_already_exists(&err) => {
                debug!(table = %target, "Table was created concurrently");
                Ok(())
            }
            Err(err) => Err(to_error(err)),
        }
    }

    async fn update_schema(&self, batch: &WriteBatch, target: &TableTarget) -> Result<()> {
        info!(table = %target, "Rows do not match table schema, updating it");
        counter!("sluice.writer.remediations", "kind" => "update_schema").increment(1);

        let to_error = |source: StoreError| WriteError::SchemaUpdate {
            table: target.clone(),
            source,
        };
        let schema = self
            .registry
            .derive_schema(target, batch)
            .await
            .map_err(to_error)?;

        self.store
            .update_table_schema(target, &schema)
            .await
            .map_err(to_error)
    }

    async fn wait_before_retry(&self, target: &TableTarget) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(WriteError::Interrupted {
                table: target.clone(),
            }),
            _ = tokio::time::sleep(self.config.retry_wait()) => Ok(()),
        }
    }
}

/// Map row errors keyed by batch position back to record identities
fn correlate(batch: &WriteBatch, target: &TableTarget, errors: RowErrors) -> Result<RowFailures> {
    let mut failures = RowFailures::with_capacity(errors.len());
    for (index, row_errors) in errors {
        let record = batch.get(index).ok_or_else(|| WriteError::Store {
            table: target.clone(),
            source: StoreError::invalid_response(format!(
                "row error index {} outside batch of {} rows",
                index,
                batch.len()
            )),
        })?;
        failures
            .entry(record.id.clone())
            .or_default()
            .extend(row_errors);
    }
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::InsertError;
    use crate::testing::{MockSchemaRegistry, MockTableStore};
    use crate::types::RecordId;
    use serde_json::json;
    use sluice_cdc::ProjectedRow;
    use std::time::Duration;

    fn orders() -> TableTarget {
        TableTarget::new("shop", "orders")
    }

    fn batch(rows: u64) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for offset in 0..rows {
            let mut row = ProjectedRow::new();
            row.insert("id", json!(offset));
            batch.push(RecordId::new("cdc.shop.orders", 0, offset), row);
        }
        batch
    }

    fn writer(store: &Arc<MockTableStore>, config: WriterConfig) -> AdaptiveTableWriter {
        AdaptiveTableWriter::new(store.clone(), Arc::new(MockSchemaRegistry::new()), config)
    }

    fn config() -> WriterConfig {
        WriterConfig {
            max_retries: 3,
            retry_wait_ms: 1_000,
            auto_create_tables: true,
            ..Default::default()
        }
    }

    fn schema_mismatch() -> RowErrors {
        RowErrors::from([
            (0, vec![InsertError::unrecognized_field("email")]),
            (1, vec![InsertError::stopped()]),
        ])
    }

    #[tokio::test]
    async fn test_success_on_first_send() {
        let store = Arc::new(MockTableStore::new());
        let failures = writer(&store, config()).write(&batch(2), &orders()).await.unwrap();

        assert!(failures.is_empty());
        assert_eq!(store.insert_calls(), 1);
        assert_eq!(store.create_calls(), 0);
        assert_eq!(store.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_sent() {
        let store = Arc::new(MockTableStore::new());
        let failures = writer(&store, config()).write(&WriteBatch::new(), &orders()).await.unwrap();
        assert!(failures.is_empty());
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remediation_resend_is_immediate() {
        let store = Arc::new(MockTableStore::new().with_insert_results(vec![Ok(schema_mismatch())]));
        let started = tokio::time::Instant::now();

        writer(&store, config()).write(&batch(2), &orders()).await.unwrap();

        assert_eq!(store.insert_calls(), 2);
        assert_eq!(store.update_calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_resends_wait() {
        let store = Arc::new(MockTableStore::new().with_insert_results(vec![
            Ok(schema_mismatch()),
            Ok(schema_mismatch()),
            Ok(schema_mismatch()),
        ]));
        let started = tokio::time::Instant::now();

        writer(&store, config()).write(&batch(2), &orders()).await.unwrap();

        assert_eq!(store.insert_calls(), 4);
        assert_eq!(store.update_calls(), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_row_data_errors_are_final() {
        let errors = RowErrors::from([
            (1, vec![InsertError::new("invalid", "Cannot convert value to integer.")]),
            (0, vec![InsertError::stopped()]),
        ]);
        let store = Arc::new(MockTableStore::new().with_insert_results(vec![Ok(errors)]));

        let failures = writer(&store, config()).write(&batch(3), &orders()).await.unwrap();

        assert_eq!(store.insert_calls(), 1);
        assert_eq!(store.update_calls(), 0);
        assert_eq!(failures.len(), 2);
        let bad = &failures[&RecordId::new("cdc.shop.orders", 0, 1)];
        assert_eq!(bad[0].reason, "invalid");
        assert!(!failures.contains_key(&RecordId::new("cdc.shop.orders", 0, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatch_turning_into_data_errors_is_final() {
        let data_errors = RowErrors::from([(0, vec![InsertError::new("invalid", "bad date")])]);
        let store = Arc::new(
            MockTableStore::new().with_insert_results(vec![Ok(schema_mismatch()), Ok(data_errors)]),
        );

        let failures = writer(&store, config()).write(&batch(1), &orders()).await.unwrap();

        assert_eq!(store.insert_calls(), 2);
        assert_eq!(failures.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_row_index() {
        let errors = RowErrors::from([(5, vec![InsertError::new("invalid", "bad")])]);
        let store = Arc::new(MockTableStore::new().with_insert_results(vec![Ok(errors)]));

        let err = writer(&store, config()).write(&batch(1), &orders()).await.unwrap_err();
        assert!(matches!(
            err,
            WriteError::Store { source: StoreError::InvalidResponse(_), .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_created_once_then_retried() {
        let not_found = StoreError::api(404, "notFound", "Not found: Table p:shop.orders");
        let store = Arc::new(MockTableStore::new().with_insert_results(vec![
            Err(not_found.clone()),
            Err(not_found.clone()),
            Err(not_found),
        ]));

        writer(&store, config()).write(&batch(1), &orders()).await.unwrap();

        assert_eq!(store.create_calls(), 1);
        assert_eq!(store.insert_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_remediation_without_a_send_left() {
        let store = Arc::new(MockTableStore::new().with_insert_results(vec![Err(
            StoreError::api(404, "notFound", "Not found: Table p:shop.orders"),
        )]));
        let config = WriterConfig {
            max_retries: 0,
            ..config()
        };

        let err = writer(&store, config).write(&batch(1), &orders()).await.unwrap_err();

        assert!(matches!(err, WriteError::RetryLimitExceeded { attempts: 1, .. }));
        assert_eq!(store.insert_calls(), 1);
        assert_eq!(store.create_calls(), 0);
        assert_eq!(store.update_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_not_found_without_auto_create() {
        let store = Arc::new(MockTableStore::new().with_insert_results(vec![Err(
            StoreError::api(404, "notFound", "Not found: Table p:shop.orders"),
        )]));
        let config = WriterConfig {
            auto_create_tables: false,
            ..config()
        };

        let err = writer(&store, config).write(&batch(1), &orders()).await.unwrap_err();

        assert!(matches!(err, WriteError::TableNotFound { .. }));
        assert_eq!(store.create_calls(), 0);
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_create_counts_as_created() {
        let store = Arc::new(
            MockTableStore::new()
                .with_insert_results(vec![Err(StoreError::api(
                    404,
                    "notFound",
                    "Not found: Table p:shop.orders",
                ))])
                .with_create_result(Err(StoreError::api(409, "duplicate", "Already Exists"))),
        );

        writer(&store, config()).write(&batch(1), &orders()).await.unwrap();
        assert_eq!(store.insert_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_is_surfaced() {
        let store = Arc::new(
            MockTableStore::new()
                .with_insert_results(vec![Err(StoreError::api(
                    404,
                    "notFound",
                    "Not found: Table p:shop.orders",
                ))])
                .with_create_result(Err(StoreError::api(403, "accessDenied", "no"))),
        );

        let err = writer(&store, config()).write(&batch(1), &orders()).await.unwrap_err();
        assert!(matches!(err, WriteError::TableCreate { .. }));
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_table_schema_triggers_update() {
        let store = Arc::new(MockTableStore::new().with_insert_results(vec![Err(
            StoreError::api(400, "invalid", "The destination table has no schema."),
        )]));

        writer(&store, config()).write(&batch(1), &orders()).await.unwrap();

        assert_eq!(store.update_calls(), 1);
        assert_eq!(store.insert_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_with_wait() {
        let store = Arc::new(MockTableStore::new().with_insert_results(vec![
            Err(StoreError::api(503, "backendError", "unavailable")),
            Err(StoreError::transport("connection reset")),
        ]));
        let started = tokio::time::Instant::now();

        writer(&store, config()).write(&batch(1), &orders()).await.unwrap();

        assert_eq!(store.insert_calls(), 3);
        assert_eq!(store.update_calls(), 0);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_request_error() {
        let store = Arc::new(MockTableStore::new().with_insert_results(vec![Err(
            StoreError::api(403, "accessDenied", "Access Denied"),
        )]));

        let err = writer(&store, config()).write(&batch(1), &orders()).await.unwrap_err();
        assert!(matches!(err, WriteError::Store { .. }));
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_wait() {
        let store = Arc::new(MockTableStore::new().with_insert_results(vec![
            Err(StoreError::transport("reset")),
            Err(StoreError::transport("reset")),
        ]));
        let writer = writer(&store, config());
        let token = writer.shutdown_token();

        let batch = batch(1);
        let target = orders();
        let write = writer.write(&batch, &target);
        tokio::pin!(write);

        tokio::select! {
            _ = &mut write => panic!("write finished before shutdown"),
            _ = tokio::time::sleep(Duration::from_millis(500)) => token.cancel(),
        }

        let err = write.await.unwrap_err();
        assert!(err.is_interruption());
        assert_eq!(store.insert_calls(), 1);
    }
}
