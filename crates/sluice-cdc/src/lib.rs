//! # sluice-cdc - Change envelope decoding and row projection
//!
//! Pure, synchronous building blocks for turning positionally encoded change
//! records into named rows.
//!
//! ```text
//! RawChangeRecord ──decode──▶ ChangeEnvelope ──extract──▶ ProjectedRow
//!                                   │                          ▲
//!                                   └── row image ──project────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use sluice_cdc::{EnvelopeDecoder, RawChangeRecord, RowExtractor};
//! use serde_json::json;
//!
//! let raw = RawChangeRecord::from_value(&json!({
//!     "values": [
//!         null,
//!         {
//!             "schema": [{"name": "id", "index": 0}, {"name": "amount", "index": 1}],
//!             "values": [7, 42.5]
//!         },
//!         null,
//!         "u",
//!         null
//!     ]
//! })).unwrap();
//!
//! let envelope = EnvelopeDecoder::default().decode(&raw).unwrap();
//! let row = RowExtractor::new().extract(&envelope).unwrap().unwrap();
//! assert_eq!(row.get("id"), Some(&json!(7)));
//! assert_eq!(row.get("amount"), Some(&json!(42.5)));
//! ```

mod decoder;
mod error;
mod event;
mod extract;
mod projector;
mod schema;

pub use decoder::{decode, EnvelopeDecoder, EnvelopeLayout, RawChangeRecord};
pub use error::{CdcError, ErrorCategory, Result};
pub use event::{CdcOp, ChangeEnvelope};
pub use extract::{DeleteHandling, RowExtractor};
pub use projector::{project, project_fields, ProjectedRow};
pub use schema::{FieldSchema, FieldType, RowSnapshot};
