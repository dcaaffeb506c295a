//! Google BigQuery table store
//!
//! Implements [`TableStore`] on the BigQuery REST API:
//!
//! - **insertAll** for batches, one insert id per record so resends after a
//!   remediation are deduplicated by BigQuery
//! - **tables.insert** for table creation
//! - **tables.get + tables.patch** for additive schema updates, reloading
//!   when another writer changed the schema in between
//!
//! API failures are mapped to [`StoreError::Api`] with the HTTP status and the
//! first error reason, which is what the classifier matches on.
//!
//! # Authentication
//!
//! 1. **Application Default Credentials (ADC)** - Automatic (default)
//! 2. **Service Account Key File** - Via `credentials_file` config
//! 3. **Service Account JSON** - Via `credentials_json` config

use crate::classifier::{InsertError, RowErrors};
use crate::error::{StoreError, StoreResult};
use crate::schema::{ColumnMode, ColumnSchema, ColumnType, TableSchema};
use crate::store::TableStore;
use crate::types::{SensitiveString, TableTarget, WriteBatch};
use async_trait::async_trait;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::field_type::FieldType;
use gcp_bigquery_client::model::table::Table;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::model::table_data_insert_all_request_rows::TableDataInsertAllRequestRows;
use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;
use gcp_bigquery_client::model::table_schema::TableSchema as BqTableSchema;
use gcp_bigquery_client::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

/// Connection settings for the BigQuery store
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, JsonSchema)]
pub struct BigQueryStoreConfig {
    /// GCP project ID
    #[validate(length(min = 1, max = 255))]
    pub project_id: String,

    /// Path to service account credentials JSON file
    /// If not provided, uses Application Default Credentials (ADC)
    #[serde(default)]
    pub credentials_file: Option<String>,

    /// Service account credentials as JSON string
    #[serde(default)]
    pub credentials_json: Option<SensitiveString>,
}

/// BigQuery-backed [`TableStore`]
pub struct BigQueryStore {
    client: Client,
    project_id: String,
}

impl BigQueryStore {
    /// Authenticate and build a store
    pub async fn connect(config: &BigQueryStoreConfig) -> StoreResult<Self> {
        let client = if let Some(json) = &config.credentials_json {
            let sa_key = serde_json::from_str(json.expose_secret())
                .map_err(|e| StoreError::transport(format!("Invalid credentials JSON: {}", e)))?;
            Client::from_service_account_key(sa_key, false)
                .await
                .map_err(|e| {
                    StoreError::transport(format!(
                        "Failed to create BigQuery client from credentials: {}",
                        e
                    ))
                })?
        } else if let Some(file_path) = &config.credentials_file {
            let sa_key = gcp_bigquery_client::yup_oauth2::read_service_account_key(file_path)
                .await
                .map_err(|e| {
                    StoreError::transport(format!(
                        "Failed to read credentials from '{}': {}",
                        file_path, e
                    ))
                })?;
            Client::from_service_account_key(sa_key, false)
                .await
                .map_err(|e| {
                    StoreError::transport(format!(
                        "Failed to create BigQuery client from file: {}",
                        e
                    ))
                })?
        } else {
            Client::from_application_default_credentials()
                .await
                .map_err(|e| {
                    StoreError::transport(format!(
                        "Failed to create BigQuery client with ADC: {}",
                        e
                    ))
                })?
        };

        info!(project = %config.project_id, "Connected to BigQuery");
        Ok(Self {
            client,
            project_id: config.project_id.clone(),
        })
    }

    fn build_request(batch: &WriteBatch) -> StoreResult<TableDataInsertAllRequest> {
        let rows = batch
            .iter()
            .map(|record| TableDataInsertAllRequestRows {
                insert_id: Some(record.id.to_string()),
                json: serde_json::Value::from(record.row.clone()),
            })
            .collect();

        let mut request = TableDataInsertAllRequest::new();
        request
            .add_rows(rows)
            .map_err(|e| StoreError::invalid_response(format!("Failed to add rows: {}", e)))?;
        Ok(request)
    }
}

#[async_trait]
impl TableStore for BigQueryStore {
    async fn insert_batch(&self, table: &TableTarget, batch: &WriteBatch) -> StoreResult<RowErrors> {
        debug!(table = %table, rows = batch.len(), "Inserting rows");
        let request = Self::build_request(batch)?;

        let response = self
            .client
            .tabledata()
            .insert_all(&self.project_id, &table.dataset, &table.table, request)
            .await
            .map_err(map_bq_error)?;

        let mut errors = RowErrors::new();
        for row in response.insert_errors.unwrap_or_default() {
            let index = row
                .index
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| StoreError::invalid_response("insert error without row index"))?;
            let row_errors = errors.entry(index).or_default();
            for proto in row.errors.unwrap_or_default() {
                row_errors.push(InsertError {
                    reason: proto.reason.unwrap_or_default(),
                    location: proto.location,
                    message: proto.message.unwrap_or_default(),
                });
            }
        }
        Ok(errors)
    }

    async fn create_table(&self, table: &TableTarget, schema: &TableSchema) -> StoreResult<()> {
        let definition = Table::new(
            &self.project_id,
            &table.dataset,
            &table.table,
            BqTableSchema::new(schema.columns.iter().map(to_field).collect()),
        );
        self.client
            .table()
            .create(definition)
            .await
            .map_err(map_bq_error)?;
        info!(table = %table, columns = schema.len(), "Created table");
        Ok(())
    }

    async fn update_table_schema(
        &self,
        table: &TableTarget,
        schema: &TableSchema,
    ) -> StoreResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut current = self
                .client
                .table()
                .get(&self.project_id, &table.dataset, &table.table, None)
                .await
                .map_err(map_bq_error)?;

            let mut fields = current.schema.fields.take().unwrap_or_default();
            let added = add_missing_fields(&mut fields, schema);
            if added == 0 {
                debug!(table = %table, "Table schema already up to date");
                return Ok(());
            }

            current.schema.fields = Some(fields);
            match self
                .client
                .table()
                .patch(&self.project_id, &table.dataset, &table.table, current)
                .await
            {
                Ok(_) => {
                    info!(table = %table, added, "Updated table schema");
                    return Ok(());
                }
                Err(err) => {
                    let err = map_bq_error(err);
                    if is_stale_patch(&err) && attempt < SCHEMA_PATCH_ATTEMPTS {
                        debug!(table = %table, attempt, error = %err, "Schema changed concurrently, reloading");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Read-then-patch rounds before a schema update gives up
const SCHEMA_PATCH_ATTEMPTS: u32 = 3;

/// Append the columns of `schema` missing from `fields`; returns how many were added
fn add_missing_fields(fields: &mut Vec<TableFieldSchema>, schema: &TableSchema) -> usize {
    let existing: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    let additions = schema.additions(&existing);
    fields.extend(additions.iter().map(to_field));
    additions.len()
}

/// BigQuery rejects a schema patch that would remove a column with 400 invalid
fn is_stale_patch(err: &StoreError) -> bool {
    err.code() == Some(400) && err.reason() == Some("invalid")
}

fn to_field(column: &ColumnSchema) -> TableFieldSchema {
    let mut field = TableFieldSchema::new(&column.name, field_type(column.column_type));
    field.mode = Some(
        match column.mode {
            ColumnMode::Nullable => "NULLABLE",
            ColumnMode::Required => "REQUIRED",
            ColumnMode::Repeated => "REPEATED",
        }
        .to_string(),
    );
    field.description = column.description.clone();
    if !column.fields.is_empty() {
        field.fields = Some(column.fields.iter().map(to_field).collect());
    }
    field
}

fn field_type(column_type: ColumnType) -> FieldType {
    match column_type {
        ColumnType::String => FieldType::String,
        ColumnType::Bytes => FieldType::Bytes,
        ColumnType::Int64 => FieldType::Int64,
        ColumnType::Float64 => FieldType::Float64,
        ColumnType::Numeric => FieldType::Numeric,
        ColumnType::Bool => FieldType::Bool,
        ColumnType::Timestamp => FieldType::Timestamp,
        ColumnType::Date => FieldType::Date,
        ColumnType::Time => FieldType::Time,
        ColumnType::Datetime => FieldType::Datetime,
        ColumnType::Json => FieldType::Json,
        ColumnType::Record => FieldType::Record,
    }
}

fn map_bq_error(err: BQError) -> StoreError {
    match err {
        BQError::ResponseError { error } => {
            let reason = error
                .error
                .errors
                .first()
                .and_then(|e| e.get("reason"))
                .cloned()
                .unwrap_or_default();
            let code = u16::try_from(error.error.code).unwrap_or(500);
            StoreError::api(code, reason, error.error.message)
        }
        BQError::RequestError(e) => StoreError::transport(e.to_string()),
        other => StoreError::invalid_response(other.to_string()),
    }
}
