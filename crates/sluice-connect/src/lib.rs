//! # sluice-connect - Schema-drift tolerant table writes
//!
//! Takes decoded change rows to a remote table store whose schema may lag the
//! data, remediating missing tables and missing columns once per write and
//! retrying until the store catches up.
//!
//! ## Features
//!
//! - `bigquery` - [`bigquery::BigQueryStore`] on the BigQuery REST API
//!
//! ## Architecture
//!
//! ```text
//! InboundRecord ─▶ BatchAssembler ─▶ (TableTarget, WriteBatch) ─▶ WriterPool
//!                   decode/project                                   │
//!                                                                    ▼
//!                       SchemaRegistry ◀── remediate ── AdaptiveTableWriter
//!                                                         │        ▲
//!                                              insert/DDL │        │ classify
//!                                                         ▼        │
//!                                                     TableStore ──┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sluice_connect::testing::{MockSchemaRegistry, MockTableStore};
//! use sluice_connect::{BatchAssembler, InboundRecord, SinkConfig, WriterPool};
//! use std::sync::Arc;
//!
//! # async fn example(records: Vec<InboundRecord>) -> anyhow::Result<()> {
//! let config = SinkConfig::from_file("sluice.yaml")?;
//! let assembler = BatchAssembler::from_config(&config.assembler)?;
//! let pool = WriterPool::new(
//!     Arc::new(MockTableStore::new()),
//!     Arc::new(MockSchemaRegistry::new()),
//!     config.writer.clone(),
//! );
//!
//! for (table, result) in pool.write_all(assembler.assemble(records)?).await {
//!     let failures = result?;
//!     println!("{}: {} rows failed", table, failures.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod classifier;
pub mod config;
pub mod error;
pub mod pool;
pub mod schema;
pub mod store;
pub mod testing;
pub mod types;
pub mod writer;

#[cfg(feature = "bigquery")]
pub mod bigquery;

pub use assembler::{BatchAssembler, InboundRecord};
pub use classifier::{
    classify, classify_request_error, classify_row_errors, ErrorClass, InsertError, RowErrors,
};
pub use config::{AssemblerConfig, SinkConfig, WriterConfig};
pub use error::{Result, StoreError, StoreResult, WriteError};
pub use pool::{TargetResult, WriterPool};
pub use schema::{ColumnMode, ColumnSchema, ColumnType, TableSchema};
pub use store::{SchemaRegistry, StaticSchemaRegistry, TableStore};
pub use types::{BatchRecord, RecordId, RowFailures, SensitiveString, TableTarget, WriteBatch};
pub use writer::AdaptiveTableWriter;
