//! Schema handling for the partitioned message dataset.
//!
//! A [`Schema`] is an ordered list of `(name, type)` fields: the unit the
//! registry versions, the compatibility classifier compares and the read
//! path merges. Conversions to and from Arrow schemas live here so the rest
//! of the workspace can stay on this compact representation.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema, TimeUnit};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod compat;
pub mod merge;
pub mod registry;

pub use compat::{check_compatibility, CompatibilityReport, CompatibilityType, FieldChange};
pub use merge::merge_schemas;
pub use registry::SchemaRegistry;

/// Logical field types the engine stores.
///
/// The serialized names are part of the registry document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// 8-bit signed integer (flags).
    Int8,
    /// 32-bit signed integer (type codes).
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// Boolean.
    Bool,
    /// Seconds-precision UTC timestamp.
    TimestampS,
}

impl FieldType {
    /// The Arrow type this logical type is stored as.
    pub fn to_arrow(self) -> DataType {
        match self {
            Self::String => DataType::Utf8,
            Self::Int8 => DataType::Int8,
            Self::Int32 => DataType::Int32,
            Self::Int64 => DataType::Int64,
            Self::Float64 => DataType::Float64,
            Self::Bool => DataType::Boolean,
            Self::TimestampS => DataType::Timestamp(TimeUnit::Second, Some("UTC".into())),
        }
    }

    /// Map an Arrow type back to the logical type.
    ///
    /// Anything the engine does not produce itself degrades to `String`,
    /// matching the permissive read policy (type conflicts widen to string).
    pub fn from_arrow(data_type: &DataType) -> Self {
        match data_type {
            DataType::Utf8 | DataType::LargeUtf8 => Self::String,
            DataType::Int8 => Self::Int8,
            DataType::Int32 => Self::Int32,
            DataType::Int64 => Self::Int64,
            DataType::Float64 => Self::Float64,
            DataType::Boolean => Self::Bool,
            DataType::Timestamp(TimeUnit::Second, _) => Self::TimestampS,
            _ => Self::String,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int8 => "int8",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::TimestampS => "timestamp_s",
        };
        write!(f, "{name}")
    }
}

/// A named, typed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Logical type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    /// Create a field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// An ordered set of fields.
///
/// Equality is order-sensitive on names and types, which is exactly the
/// "same schema" notion partition validation uses; nullability is not part
/// of the model (every stored column is nullable so reads can null-fill).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Create a schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// The fields, in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Build the equivalent Arrow schema. All columns are nullable.
    pub fn to_arrow(&self) -> Arc<ArrowSchema> {
        Arc::new(ArrowSchema::new(
            self.fields
                .iter()
                .map(|f| ArrowField::new(&f.name, f.field_type.to_arrow(), true))
                .collect::<Vec<_>>(),
        ))
    }

    /// Read the logical schema off an Arrow schema.
    pub fn from_arrow(schema: &ArrowSchema) -> Self {
        Self {
            fields: schema
                .fields()
                .iter()
                .map(|f| Field::new(f.name(), FieldType::from_arrow(f.data_type())))
                .collect(),
        }
    }
}

/// The default message-content schema: the canonical column set every
/// ingested record is encoded with, in storage order.
pub fn message_schema() -> Schema {
    Schema::new(vec![
        Field::new("record_id", FieldType::String),
        Field::new("sender", FieldType::String),
        Field::new("recipient", FieldType::String),
        Field::new("group_id", FieldType::String),
        Field::new("group_sender", FieldType::String),
        Field::new("kind", FieldType::Int32),
        Field::new("event_time", FieldType::TimestampS),
        Field::new("is_group", FieldType::Int8),
        Field::new("content", FieldType::String),
        Field::new("desc", FieldType::String),
        Field::new("source", FieldType::String),
        Field::new("event_id", FieldType::String),
        Field::new("notify_kind", FieldType::Int32),
        Field::new("ingestion_time", FieldType::TimestampS),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_schema_matches_record_columns() {
        let schema = message_schema();
        assert_eq!(schema.len(), 14);
        assert_eq!(
            schema.field_names(),
            data_types_columns(),
            "schema order must match the record column order"
        );
    }

    fn data_types_columns() -> Vec<&'static str> {
        vec![
            "record_id",
            "sender",
            "recipient",
            "group_id",
            "group_sender",
            "kind",
            "event_time",
            "is_group",
            "content",
            "desc",
            "source",
            "event_id",
            "notify_kind",
            "ingestion_time",
        ]
    }

    #[test]
    fn arrow_round_trip_preserves_names_and_types() {
        let schema = message_schema();
        let arrow = schema.to_arrow();
        assert_eq!(Schema::from_arrow(&arrow), schema);
    }

    #[test]
    fn timestamps_are_second_precision_utc() {
        let arrow = message_schema().to_arrow();
        let field = arrow.field_with_name("event_time").unwrap();
        assert_eq!(
            field.data_type(),
            &DataType::Timestamp(TimeUnit::Second, Some("UTC".into()))
        );
    }

    #[test]
    fn serde_uses_name_and_type_keys() {
        let schema = Schema::new(vec![Field::new("record_id", FieldType::String)]);
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"name": "record_id", "type": "string"}])
        );
        let back: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);
    }
}
