//! Change envelope representation
//!
//! A [`ChangeEnvelope`] is the normalized form of one row mutation: the
//! operation plus the row images it carries. Constructors enforce the image
//! rules, so a delete never has an `after` image and every other operation
//! always has one.

use crate::schema::RowSnapshot;
use serde::{Deserialize, Serialize};

/// CDC operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdcOp {
    /// Row inserted (`c`)
    Create,
    /// Row updated (`u`)
    Update,
    /// Row deleted (`d`)
    Delete,
    /// Snapshot read during initial sync (`r`)
    Read,
}

impl CdcOp {
    /// Parse a single-character operation marker
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Self::Create),
            "u" => Some(Self::Update),
            "d" => Some(Self::Delete),
            "r" => Some(Self::Read),
            _ => None,
        }
    }

    /// The single-character operation marker
    pub fn code(&self) -> &'static str {
        match self {
            Self::Create => "c",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Read => "r",
        }
    }
}

impl std::fmt::Display for CdcOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CdcOp::Create => write!(f, "CREATE"),
            CdcOp::Update => write!(f, "UPDATE"),
            CdcOp::Delete => write!(f, "DELETE"),
            CdcOp::Read => write!(f, "READ"),
        }
    }
}

/// Normalized change envelope
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEnvelope {
    op: CdcOp,
    /// `before` for deletes, `after` for everything else
    image: RowSnapshot,
    /// Informational `before` of a non-delete
    prior: Option<RowSnapshot>,
    source: Option<RowSnapshot>,
    ts_ms: Option<i64>,
}

impl ChangeEnvelope {
    /// Create an insert envelope
    pub fn create(after: RowSnapshot) -> Self {
        Self::from_parts(CdcOp::Create, after, None)
    }

    /// Create an update envelope; `before` is informational only
    pub fn update(before: Option<RowSnapshot>, after: RowSnapshot) -> Self {
        Self::from_parts(CdcOp::Update, after, before)
    }

    /// Create a snapshot-read envelope
    pub fn read(after: RowSnapshot) -> Self {
        Self::from_parts(CdcOp::Read, after, None)
    }

    /// Create a delete envelope
    pub fn delete(before: RowSnapshot) -> Self {
        Self::from_parts(CdcOp::Delete, before, None)
    }

    /// Create an envelope for a decoded operation marker.
    ///
    /// `image` is the row image the operation selects; `prior` is dropped for deletes.
    pub(crate) fn from_parts(op: CdcOp, image: RowSnapshot, prior: Option<RowSnapshot>) -> Self {
        Self {
            op,
            image,
            prior: if op == CdcOp::Delete { None } else { prior },
            source: None,
            ts_ms: None,
        }
    }

    /// Attach source metadata
    pub fn with_source(mut self, source: RowSnapshot) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach the event timestamp (Unix epoch millis)
    pub fn with_ts_ms(mut self, ts_ms: i64) -> Self {
        self.ts_ms = Some(ts_ms);
        self
    }

    /// Operation type
    pub fn op(&self) -> CdcOp {
        self.op
    }

    /// Row state before the change
    pub fn before(&self) -> Option<&RowSnapshot> {
        match self.op {
            CdcOp::Delete => Some(&self.image),
            _ => self.prior.as_ref(),
        }
    }

    /// Row state after the change; always `None` for deletes
    pub fn after(&self) -> Option<&RowSnapshot> {
        match self.op {
            CdcOp::Delete => None,
            _ => Some(&self.image),
        }
    }

    /// Source metadata snapshot (connector, db, table, ...)
    pub fn source(&self) -> Option<&RowSnapshot> {
        self.source.as_ref()
    }

    /// Event timestamp (Unix epoch millis)
    pub fn ts_ms(&self) -> Option<i64> {
        self.ts_ms
    }

    /// The image that describes the row: `before` for deletes, `after` otherwise
    pub fn row_image(&self) -> &RowSnapshot {
        &self.image
    }

    /// Check if this is a delete
    pub fn is_delete(&self) -> bool {
        self.op == CdcOp::Delete
    }
}
