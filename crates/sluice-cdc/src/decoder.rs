//! Change envelope decoding
//!
//! A raw change record is a fixed-arity positional sequence holding the `before`
//! image, the `after` image, source metadata, the operation marker and an
//! optional timestamp. Which slot holds what is described by an
//! [`EnvelopeLayout`]. The layout is treated as externally versioned: when the
//! record carries its own envelope schema, the layout is re-derived from it and
//! checked, instead of trusting one hard-coded shape.
//!
//! ```rust
//! use sluice_cdc::{decode, CdcOp, RawChangeRecord};
//! use serde_json::json;
//!
//! let raw = RawChangeRecord::from_value(&json!({
//!     "values": [
//!         null,
//!         {"schema": [{"name": "id", "index": 0}], "values": [7]},
//!         null,
//!         "c",
//!         1705000000000i64
//!     ]
//! })).unwrap();
//!
//! let envelope = decode(&raw).unwrap();
//! assert_eq!(envelope.op(), CdcOp::Create);
//! ```

use crate::error::{CdcError, Result};
use crate::event::{CdcOp, ChangeEnvelope};
use crate::schema::{FieldSchema, RowSnapshot, WireStructSchema};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Slot positions inside a raw change record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnvelopeLayout {
    /// Exact number of slots a record must have
    pub arity: usize,
    /// Position of the `before` image
    pub before: usize,
    /// Position of the `after` image
    pub after: usize,
    /// Position of the source metadata, if the layout carries it
    #[serde(default)]
    pub source: Option<usize>,
    /// Position of the operation marker
    pub op: usize,
    /// Position of the event timestamp, if the layout carries it
    #[serde(default)]
    pub ts_ms: Option<usize>,
}

impl Default for EnvelopeLayout {
    fn default() -> Self {
        Self::debezium()
    }
}

impl EnvelopeLayout {
    /// Debezium envelope: `before, after, source, op, ts_ms`
    pub fn debezium() -> Self {
        Self {
            arity: 5,
            before: 0,
            after: 1,
            source: Some(2),
            op: 3,
            ts_ms: Some(4),
        }
    }

    /// Debezium envelope with the trailing `transaction` block
    pub fn debezium_with_transaction() -> Self {
        Self {
            arity: 6,
            ..Self::debezium()
        }
    }

    /// Derive a layout from an envelope's own field schema.
    ///
    /// `before`, `after` and `op` are required; `source` and `ts_ms` are picked
    /// up when present. Every field's declared index must equal its position.
    pub fn from_fields(fields: &[FieldSchema]) -> Result<Self> {
        let mut before = None;
        let mut after = None;
        let mut source = None;
        let mut op = None;
        let mut ts_ms = None;

        for (position, field) in fields.iter().enumerate() {
            if field.index != position {
                return Err(CdcError::malformed(format!(
                    "envelope field '{}' declares index {} at position {}",
                    field.name, field.index, position
                )));
            }
            let slot = match field.name.as_str() {
                "before" => &mut before,
                "after" => &mut after,
                "source" => &mut source,
                "op" => &mut op,
                "ts_ms" => &mut ts_ms,
                _ => continue,
            };
            if slot.replace(position).is_some() {
                return Err(CdcError::malformed(format!(
                    "envelope field '{}' declared twice",
                    field.name
                )));
            }
        }

        let require = |slot: Option<usize>, name: &str| {
            slot.ok_or_else(|| CdcError::malformed(format!("envelope schema has no '{}' field", name)))
        };

        Ok(Self {
            arity: fields.len(),
            before: require(before, "before")?,
            after: require(after, "after")?,
            source,
            op: require(op, "op")?,
            ts_ms,
        })
    }

    /// Check that every slot fits the arity and no two slots collide
    pub fn validate(&self) -> Result<()> {
        let mut slots = vec![("before", self.before), ("after", self.after), ("op", self.op)];
        slots.extend(self.source.map(|s| ("source", s)));
        slots.extend(self.ts_ms.map(|s| ("ts_ms", s)));

        for (i, (name, position)) in slots.iter().enumerate() {
            if *position >= self.arity {
                return Err(CdcError::malformed(format!(
                    "layout slot '{}' at position {} exceeds arity {}",
                    name, position, self.arity
                )));
            }
            if let Some((other, _)) = slots[..i].iter().find(|(_, p)| p == position) {
                return Err(CdcError::malformed(format!(
                    "layout slots '{}' and '{}' share position {}",
                    other, name, position
                )));
            }
        }
        Ok(())
    }
}

/// An undecoded change record as delivered by the ingestion side
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WireRecord")]
pub struct RawChangeRecord {
    /// Envelope schema, when the record is self-describing
    pub schema: Option<Vec<FieldSchema>>,
    /// Envelope slots
    pub values: Vec<Value>,
}

#[derive(Deserialize)]
struct WireRecord {
    #[serde(default)]
    schema: Option<WireStructSchema>,
    values: Vec<Value>,
}

impl From<WireRecord> for RawChangeRecord {
    fn from(wire: WireRecord) -> Self {
        Self {
            schema: wire.schema.map(WireStructSchema::into_fields),
            values: wire.values,
        }
    }
}

impl RawChangeRecord {
    /// Create a record without an embedded envelope schema
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            schema: None,
            values,
        }
    }

    /// Attach an envelope schema
    pub fn with_schema(mut self, fields: Vec<FieldSchema>) -> Self {
        self.schema = Some(fields);
        self
    }

    /// Parse a record from JSON.
    ///
    /// Accepts either `{"schema": ..., "values": [...]}` or a bare slot array.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Array(values) => Ok(Self::new(values.clone())),
            Value::Object(_) => Self::deserialize(value)
                .map_err(|e| CdcError::malformed(format!("invalid change record: {}", e))),
            other => Err(CdcError::malformed(format!(
                "change record must be an object or array, got {}",
                json_kind(other)
            ))),
        }
    }
}

/// Decodes raw change records into [`ChangeEnvelope`]s
#[derive(Debug, Clone)]
pub struct EnvelopeDecoder {
    layout: EnvelopeLayout,
    use_embedded_schema: bool,
}

impl Default for EnvelopeDecoder {
    fn default() -> Self {
        Self {
            layout: EnvelopeLayout::debezium(),
            use_embedded_schema: true,
        }
    }
}

impl EnvelopeDecoder {
    /// Create a decoder for a fixed layout
    pub fn new(layout: EnvelopeLayout) -> Result<Self> {
        layout.validate()?;
        Ok(Self {
            layout,
            use_embedded_schema: true,
        })
    }

    /// Whether a record's own envelope schema overrides the configured layout
    pub fn use_embedded_schema(mut self, enabled: bool) -> Self {
        self.use_embedded_schema = enabled;
        self
    }

    /// The configured layout
    pub fn layout(&self) -> &EnvelopeLayout {
        &self.layout
    }

    /// Decode a raw record.
    ///
    /// Deletes read only the `before` slot; every other operation reads `after`
    /// and keeps a well-formed `before` as informational.
    pub fn decode(&self, raw: &RawChangeRecord) -> Result<ChangeEnvelope> {
        let embedded;
        let layout = match (&raw.schema, self.use_embedded_schema) {
            (Some(fields), true) => {
                embedded = EnvelopeLayout::from_fields(fields)?;
                &embedded
            }
            _ => &self.layout,
        };

        if raw.values.len() != layout.arity {
            return Err(CdcError::malformed(format!(
                "expected {} envelope slots, found {}",
                layout.arity,
                raw.values.len()
            )));
        }

        let op = parse_op(&raw.values[layout.op])?;
        let envelope = match op {
            CdcOp::Delete => {
                ChangeEnvelope::delete(required_image(&raw.values[layout.before], "before")?)
            }
            _ => {
                let after = required_image(&raw.values[layout.after], "after")?;
                let prior = optional_image(&raw.values[layout.before], "before");
                ChangeEnvelope::from_parts(op, after, prior)
            }
        };

        let envelope = match layout.source.and_then(|i| optional_image(&raw.values[i], "source")) {
            Some(source) => envelope.with_source(source),
            None => envelope,
        };

        Ok(match layout.ts_ms.and_then(|i| raw.values[i].as_i64()) {
            Some(ts) => envelope.with_ts_ms(ts),
            None => envelope,
        })
    }

    /// Parse and decode a JSON record
    pub fn decode_value(&self, value: &Value) -> Result<ChangeEnvelope> {
        self.decode(&RawChangeRecord::from_value(value)?)
    }
}

/// Decode a record with the default Debezium layout
pub fn decode(raw: &RawChangeRecord) -> Result<ChangeEnvelope> {
    EnvelopeDecoder::default().decode(raw)
}

fn parse_op(value: &Value) -> Result<CdcOp> {
    let code = value.as_str().ok_or_else(|| {
        CdcError::malformed(format!(
            "operation marker must be a string, got {}",
            json_kind(value)
        ))
    })?;
    CdcOp::from_code(code)
        .ok_or_else(|| CdcError::malformed(format!("unrecognized operation marker '{}'", code)))
}

fn required_image(value: &Value, slot: &str) -> Result<RowSnapshot> {
    if value.is_null() {
        return Err(CdcError::malformed(format!("'{}' image is required", slot)));
    }
    RowSnapshot::from_value(value)
        .map_err(|e| CdcError::malformed(format!("'{}' image: {}", slot, e)))
}

fn optional_image(value: &Value, slot: &str) -> Option<RowSnapshot> {
    if value.is_null() {
        return None;
    }
    match RowSnapshot::from_value(value) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            trace!(slot, error = %e, "ignoring unreadable informational image");
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
