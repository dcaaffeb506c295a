//! Batch assembly
//!
//! Decodes, projects and extracts inbound change records and groups the rows by
//! destination table. Rows keep their inbound order within a batch and batches
//! come out in the order their table was first seen.

use crate::config::AssemblerConfig;
use crate::error::{Result, WriteError};
use crate::types::{RecordId, TableTarget, WriteBatch};
use serde_json::Value;
use sluice_cdc::{EnvelopeDecoder, ProjectedRow, RowExtractor};
use std::collections::HashMap;
use tracing::{debug, trace};

/// A raw change record as handed over by the ingestion side
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    pub id: RecordId,
    pub table: TableTarget,
    pub value: Value,
}

impl InboundRecord {
    pub fn new(id: RecordId, table: TableTarget, value: Value) -> Self {
        Self { id, table, value }
    }
}

/// Turns inbound records into per-table write batches
#[derive(Debug, Clone, Default)]
pub struct BatchAssembler {
    decoder: EnvelopeDecoder,
    extractor: RowExtractor,
}

impl BatchAssembler {
    pub fn new(decoder: EnvelopeDecoder, extractor: RowExtractor) -> Self {
        Self { decoder, extractor }
    }

    pub fn from_config(config: &AssemblerConfig) -> Result<Self> {
        let decoder = config
            .decoder()
            .map_err(|e| WriteError::config(format!("invalid envelope layout: {}", e)))?;
        Ok(Self::new(decoder, config.extractor()))
    }

    /// Row for one record, `None` if the record is a dropped delete
    pub fn row(&self, record: &InboundRecord) -> Result<Option<ProjectedRow>> {
        let envelope = self
            .decoder
            .decode_value(&record.value)
            .map_err(|e| WriteError::decode(record.id.clone(), e))?;
        self.extractor
            .extract(&envelope)
            .map_err(|e| WriteError::decode(record.id.clone(), e))
    }

    /// Group records into one batch per table.
    ///
    /// Fails on the first record that cannot be decoded or projected; no
    /// batches are returned in that case.
    pub fn assemble<I>(&self, records: I) -> Result<Vec<(TableTarget, WriteBatch)>>
    where
        I: IntoIterator<Item = InboundRecord>,
    {
        let mut batches: Vec<(TableTarget, WriteBatch)> = Vec::new();
        let mut positions: HashMap<TableTarget, usize> = HashMap::new();
        let mut skipped = 0usize;

        for record in records {
            let Some(row) = self.row(&record)? else {
                trace!(record = %record.id, "Skipping dropped delete");
                skipped += 1;
                continue;
            };

            let position = match positions.get(&record.table) {
                Some(&position) => position,
                None => {
                    batches.push((record.table.clone(), WriteBatch::new()));
                    positions.insert(record.table.clone(), batches.len() - 1);
                    batches.len() - 1
                }
            };
            batches[position].1.push(record.id, row);
        }

        debug!(tables = batches.len(), skipped, "Assembled write batches");
        Ok(batches)
    }
}
