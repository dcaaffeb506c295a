//! Adaptive writer behaviour against a scripted store.
//!
//! Time is paused so the retry wait never actually elapses.

use serde_json::json;
use sluice_cdc::ProjectedRow;
use sluice_connect::testing::{MockSchemaRegistry, MockTableStore};
use sluice_connect::{
    AdaptiveTableWriter, InsertError, RecordId, RowErrors, StoreError, TableTarget, WriteBatch,
    WriteError, WriterConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sluice_connect=debug")
        .with_test_writer()
        .try_init();
}

fn target() -> TableTarget {
    TableTarget::new("shop", "orders")
}

fn batch(rows: u64) -> WriteBatch {
    let mut batch = WriteBatch::new();
    for offset in 0..rows {
        let mut row = ProjectedRow::new();
        row.insert("id", json!(offset));
        row.insert("email", json!(format!("user{}@example.com", offset)));
        batch.push(RecordId::new("cdc.shop.orders", 0, offset), row);
    }
    batch
}

fn table_not_found() -> StoreError {
    StoreError::api(404, "notFound", "Not found: Table my-project:shop.orders")
}

fn schema_mismatch() -> RowErrors {
    RowErrors::from([
        (0, vec![InsertError::missing_required_field("email")]),
        (1, vec![InsertError::stopped()]),
        (2, vec![InsertError::stopped()]),
    ])
}

fn writer(
    store: Arc<MockTableStore>,
    registry: Arc<MockSchemaRegistry>,
    config: WriterConfig,
) -> AdaptiveTableWriter {
    AdaptiveTableWriter::new(store, registry, config)
}

#[tokio::test(start_paused = true)]
async fn table_not_found_once_creates_table_and_resends_once() {
    init_test_logging();
    let store = Arc::new(MockTableStore::new().with_insert_results(vec![Err(table_not_found())]));
    let registry = Arc::new(MockSchemaRegistry::new());
    let config = WriterConfig {
        auto_create_tables: true,
        ..Default::default()
    };

    let failures = writer(store.clone(), registry.clone(), config)
        .write(&batch(3), &target())
        .await
        .unwrap();

    assert!(failures.is_empty());
    assert_eq!(store.create_calls(), 1);
    assert_eq!(store.insert_calls(), 2);
    assert_eq!(registry.calls(), 1);

    let (created_table, schema) = &store.created()[0];
    assert_eq!(created_table, &target());
    let mut columns: Vec<_> = schema.column_names().collect();
    columns.sort_unstable();
    assert_eq!(columns, vec!["email", "id"]);
}

#[tokio::test(start_paused = true)]
async fn persistent_schema_mismatch_updates_once_then_hits_retry_limit() {
    init_test_logging();
    let max_retries = 30;
    let store = Arc::new(
        MockTableStore::new()
            .with_insert_results((0..=max_retries).map(|_| Ok(schema_mismatch())).collect()),
    );
    // one more than the writer may use; it must never be consumed
    store.push_insert_result(Ok(RowErrors::new()));

    let started = tokio::time::Instant::now();
    let err = writer(store.clone(), Arc::new(MockSchemaRegistry::new()), WriterConfig::default())
        .write(&batch(3), &target())
        .await
        .unwrap_err();

    match err {
        WriteError::RetryLimitExceeded { table, attempts } => {
            assert_eq!(table, target());
            assert_eq!(attempts, max_retries + 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.update_calls(), 1);
    assert_eq!(store.create_calls(), 0);
    assert_eq!(store.insert_calls(), (max_retries + 1) as usize);
    // first resend follows the update immediately, the other 29 wait 30s each
    assert_eq!(started.elapsed(), Duration::from_secs(29 * 30));
}

#[tokio::test(start_paused = true)]
async fn persistent_transient_errors_hit_retry_limit() {
    init_test_logging();
    let store = Arc::new(MockTableStore::new().with_insert_results(
        (0..10)
            .map(|_| Err(StoreError::api(503, "backendError", "Backend error")))
            .collect(),
    ));
    let config = WriterConfig {
        max_retries: 4,
        retry_wait_ms: 2_000,
        ..Default::default()
    };

    let started = tokio::time::Instant::now();
    let err = writer(store.clone(), Arc::new(MockSchemaRegistry::new()), config)
        .write(&batch(2), &target())
        .await
        .unwrap_err();

    assert!(matches!(err, WriteError::RetryLimitExceeded { attempts: 5, .. }));
    assert_eq!(store.insert_calls(), 5);
    assert_eq!(store.create_calls(), 0);
    assert_eq!(store.update_calls(), 0);
    // every resend of a transient failure waits
    assert_eq!(started.elapsed(), Duration::from_secs(4 * 2));
}

#[tokio::test(start_paused = true)]
async fn table_still_missing_after_creation_hits_retry_limit() {
    init_test_logging();
    let store = Arc::new(
        MockTableStore::new().with_insert_results((0..10).map(|_| Err(table_not_found())).collect()),
    );
    let config = WriterConfig {
        max_retries: 3,
        retry_wait_ms: 1_000,
        auto_create_tables: true,
        ..Default::default()
    };

    let started = tokio::time::Instant::now();
    let err = writer(store.clone(), Arc::new(MockSchemaRegistry::new()), config)
        .write(&batch(1), &target())
        .await
        .unwrap_err();

    assert!(matches!(err, WriteError::RetryLimitExceeded { attempts: 4, .. }));
    assert_eq!(store.create_calls(), 1);
    assert_eq!(store.insert_calls(), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn schema_mismatch_after_table_creation_updates_schema_once() {
    let store = Arc::new(MockTableStore::new().with_insert_results(vec![
        Err(table_not_found()),
        Err(table_not_found()),
        Ok(schema_mismatch()),
        Ok(schema_mismatch()),
    ]));
    let config = WriterConfig {
        auto_create_tables: true,
        max_retries: 10,
        ..Default::default()
    };

    writer(store.clone(), Arc::new(MockSchemaRegistry::new()), config)
        .write(&batch(3), &target())
        .await
        .unwrap();

    assert_eq!(store.create_calls(), 1);
    assert_eq!(store.update_calls(), 1);
    assert_eq!(store.insert_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn generic_row_errors_are_returned_without_retry() {
    let errors = RowErrors::from([
        (0, vec![InsertError::new("invalid", "Invalid date: 'yesterday'").with_location("created")]),
        (2, vec![InsertError::stopped()]),
    ]);
    let store = Arc::new(MockTableStore::new().with_insert_results(vec![Ok(errors)]));

    let failures = writer(store.clone(), Arc::new(MockSchemaRegistry::new()), WriterConfig::default())
        .write(&batch(3), &target())
        .await
        .unwrap();

    assert_eq!(store.insert_calls(), 1);
    assert_eq!(store.update_calls(), 0);
    assert_eq!(failures.len(), 2);
    assert_eq!(
        failures[&RecordId::new("cdc.shop.orders", 0, 0)][0].location.as_deref(),
        Some("created")
    );
}

#[tokio::test(start_paused = true)]
async fn missing_table_without_auto_create_fails() {
    let store = Arc::new(MockTableStore::new().with_insert_results(vec![Err(table_not_found())]));

    let err = writer(store.clone(), Arc::new(MockSchemaRegistry::new()), WriterConfig::default())
        .write(&batch(1), &target())
        .await
        .unwrap_err();

    assert!(matches!(err, WriteError::TableNotFound { ref table } if table == &target()));
    assert_eq!(store.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn schema_update_failure_is_surfaced() {
    let store = Arc::new(
        MockTableStore::new()
            .with_insert_results(vec![Ok(schema_mismatch())])
            .with_update_result(Err(StoreError::api(400, "invalid", "Field email already exists"))),
    );

    let err = writer(store.clone(), Arc::new(MockSchemaRegistry::new()), WriterConfig::default())
        .write(&batch(3), &target())
        .await
        .unwrap_err();

    assert!(matches!(err, WriteError::SchemaUpdate { .. }));
    assert_eq!(store.insert_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn registry_failure_is_surfaced_as_create_error() {
    let store = Arc::new(MockTableStore::new().with_insert_results(vec![Err(table_not_found())]));
    let registry = Arc::new(MockSchemaRegistry::new().fail_with(StoreError::schema("unknown type")));
    let config = WriterConfig {
        auto_create_tables: true,
        ..Default::default()
    };

    let err = writer(store.clone(), registry, config)
        .write(&batch(1), &target())
        .await
        .unwrap_err();

    assert!(matches!(err, WriteError::TableCreate { source: StoreError::Schema(_), .. }));
    assert_eq!(store.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_the_retry_wait() {
    let store = Arc::new(MockTableStore::new().with_insert_results(vec![
        Ok(schema_mismatch()),
        Ok(schema_mismatch()),
        Ok(schema_mismatch()),
    ]));
    let writer = writer(store.clone(), Arc::new(MockSchemaRegistry::new()), WriterConfig::default());
    let shutdown = writer.shutdown_token();

    let handle = tokio::spawn(async move { writer.write(&batch(3), &target()).await });

    // past the immediate resend, inside the first 30s wait
    tokio::time::sleep(Duration::from_secs(10)).await;
    shutdown.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_interruption());
    assert!(matches!(err, WriteError::Interrupted { ref table } if table == &target()));
    assert_eq!(store.insert_calls(), 2);
}
