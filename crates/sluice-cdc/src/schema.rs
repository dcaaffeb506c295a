//! Positional field schemas and row snapshots
//!
//! A snapshot is two parallel sequences: field definitions and raw values. The
//! meaning of `values[i]` comes only from `fields[i]`; nothing in the value
//! itself names its column.
//!
//! Wire form (Kafka Connect JSON, as emitted by Debezium converters):
//!
//! ```json
//! {
//!   "schema": { "type": "struct", "fields": [
//!     { "name": "id", "index": 0, "schema": { "type": "int64", "optional": false } },
//!     { "name": "amount", "index": 1, "schema": { "type": "float64", "optional": true } }
//!   ]},
//!   "values": [7, 42.5]
//! }
//! ```
//!
//! The `schema` key may also hold the field array directly.

use crate::error::Result;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Connect schema type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Boolean,
    String,
    Bytes,
    Array,
    Map,
    Struct,
    /// Tag not known to this decoder, or no tag given
    #[default]
    #[serde(other)]
    Other,
}

impl FieldType {
    /// Whether values of this type are numbers on the wire
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::Float32 | Self::Float64
        )
    }
}

/// One field of a positional schema.
///
/// `index` is an integrity assertion: it must equal the field's position among
/// its siblings. It is never used to reorder values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireField", into = "WireField")]
pub struct FieldSchema {
    /// Column name
    pub name: String,
    /// Declared position among sibling fields
    pub index: usize,
    /// Connect type tag
    pub field_type: FieldType,
    /// Whether the value may be null
    pub optional: bool,
    /// Logical type name (e.g. `io.debezium.time.Timestamp`)
    pub logical_name: Option<String>,
    /// Nested fields for composite columns
    pub fields: Option<Vec<FieldSchema>>,
}

impl FieldSchema {
    /// Create a required scalar field
    pub fn new(name: impl Into<String>, index: usize, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            index,
            field_type,
            optional: false,
            logical_name: None,
            fields: None,
        }
    }

    /// Create a required composite field
    pub fn composite(name: impl Into<String>, index: usize, fields: Vec<FieldSchema>) -> Self {
        Self {
            fields: Some(fields),
            ..Self::new(name, index, FieldType::Struct)
        }
    }

    /// Mark the field optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Attach a logical type name
    pub fn with_logical_name(mut self, name: impl Into<String>) -> Self {
        self.logical_name = Some(name.into());
        self
    }

    /// Whether this field declares a nested schema
    pub fn is_composite(&self) -> bool {
        self.fields.is_some()
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct WireField {
    name: String,
    index: usize,
    #[serde(default)]
    schema: WireFieldType,
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct WireFieldType {
    #[serde(rename = "type", default)]
    field_type: FieldType,
    #[serde(default)]
    optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldSchema>>,
}

impl From<WireField> for FieldSchema {
    fn from(wire: WireField) -> Self {
        Self {
            name: wire.name,
            index: wire.index,
            field_type: wire.schema.field_type,
            optional: wire.schema.optional,
            logical_name: wire.schema.name,
            fields: wire.schema.fields,
        }
    }
}

impl From<FieldSchema> for WireField {
    fn from(field: FieldSchema) -> Self {
        Self {
            name: field.name,
            index: field.index,
            schema: WireFieldType {
                field_type: field.field_type,
                optional: field.optional,
                name: field.logical_name,
                fields: field.fields,
            },
        }
    }
}

/// Struct schema as it appears under a snapshot's `schema` key
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum WireStructSchema {
    Struct { fields: Vec<FieldSchema> },
    Fields(Vec<FieldSchema>),
}

impl WireStructSchema {
    pub(crate) fn into_fields(self) -> Vec<FieldSchema> {
        match self {
            Self::Struct { fields } | Self::Fields(fields) => fields,
        }
    }
}

#[derive(Deserialize)]
struct WireSnapshot {
    schema: WireStructSchema,
    values: Vec<Value>,
}

/// Raw values positionally aligned with a field schema sequence.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WireSnapshot")]
pub struct RowSnapshot {
    /// Field definitions, in position order
    pub fields: Vec<FieldSchema>,
    /// Raw values, `values[i]` belongs to `fields[i]`
    pub values: Vec<Value>,
}

impl From<WireSnapshot> for RowSnapshot {
    fn from(wire: WireSnapshot) -> Self {
        Self {
            fields: wire.schema.into_fields(),
            values: wire.values,
        }
    }
}

impl Serialize for RowSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct StructSchema<'a> {
            #[serde(rename = "type")]
            kind: &'static str,
            fields: &'a [FieldSchema],
        }

        let mut state = serializer.serialize_struct("RowSnapshot", 2)?;
        state.serialize_field(
            "schema",
            &StructSchema {
                kind: "struct",
                fields: &self.fields,
            },
        )?;
        state.serialize_field("values", &self.values)?;
        state.end()
    }
}

impl RowSnapshot {
    /// Create a snapshot from parallel sequences
    pub fn new(fields: Vec<FieldSchema>, values: Vec<Value>) -> Self {
        Self { fields, values }
    }

    /// Parse a snapshot from its JSON wire form
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(Self::deserialize(value)?)
    }

    /// Number of fields declared by the schema
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema declares no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a top-level value by field name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .and_then(|i| self.values.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CdcError, ErrorCategory};
    use serde_json::json;

    #[test]
    fn test_parse_connect_wire_form() {
        let value = json!({
            "schema": {
                "type": "struct",
                "fields": [
                    {"name": "id", "index": 0, "schema": {"type": "int64", "optional": false}},
                    {"name": "created", "index": 1, "schema": {
                        "type": "int64", "optional": true, "name": "io.debezium.time.Timestamp"
                    }}
                ]
            },
            "values": [1, 1705000000000i64]
        });

        let snapshot = RowSnapshot::from_value(&value).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.fields[0].field_type, FieldType::Int64);
        assert!(!snapshot.fields[0].optional);
        assert!(snapshot.fields[1].optional);
        assert_eq!(
            snapshot.fields[1].logical_name.as_deref(),
            Some("io.debezium.time.Timestamp")
        );
        assert_eq!(snapshot.get("id"), Some(&json!(1)));
    }

    #[test]
    fn test_parse_bare_field_array() {
        let value = json!({
            "schema": [{"name": "id", "index": 0}, {"name": "amount", "index": 1}],
            "values": [7, 42.5]
        });

        let snapshot = RowSnapshot::from_value(&value).unwrap();
        assert_eq!(snapshot.fields[1].name, "amount");
        assert_eq!(snapshot.fields[1].field_type, FieldType::Other);
    }

    #[test]
    fn test_nested_fields() {
        let value = json!({
            "schema": {"type": "struct", "fields": [
                {"name": "address", "index": 0, "schema": {"type": "struct", "optional": true, "fields": [
                    {"name": "city", "index": 0, "schema": {"type": "string"}}
                ]}}
            ]},
            "values": [{"values": ["Oslo"]}]
        });

        let snapshot = RowSnapshot::from_value(&value).unwrap();
        assert!(snapshot.fields[0].is_composite());
        let nested = snapshot.fields[0].fields.as_ref().unwrap();
        assert_eq!(nested[0].name, "city");
    }

    #[test]
    fn test_unknown_type_tag() {
        let field: FieldSchema = serde_json::from_value(
            json!({"name": "geo", "index": 0, "schema": {"type": "geometry"}}),
        )
        .unwrap();
        assert_eq!(field.field_type, FieldType::Other);
    }

    #[test]
    fn test_missing_values_is_serialization_error() {
        let err = RowSnapshot::from_value(&json!({"schema": []})).unwrap_err();
        assert!(matches!(err, CdcError::Json(_)));
        assert_eq!(err.category(), ErrorCategory::Serialization);
    }

    #[test]
    fn test_serialize_uses_struct_schema() {
        let snapshot = RowSnapshot::new(
            vec![FieldSchema::new("id", 0, FieldType::Int32)],
            vec![json!(5)],
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["schema"]["type"], "struct");
        assert_eq!(json["schema"]["fields"][0]["schema"]["type"], "int32");

        let parsed = RowSnapshot::from_value(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_field_builders() {
        let field = FieldSchema::composite(
            "address",
            2,
            vec![FieldSchema::new("zip", 0, FieldType::String)],
        )
        .optional();
        assert!(field.optional);
        assert!(field.is_composite());
        assert_eq!(field.field_type, FieldType::Struct);
        assert!(FieldType::Float32.is_numeric());
        assert!(!FieldType::Bytes.is_numeric());
    }
}
