//! Read-side schema merging.

use crate::{Field, FieldType, Schema};
use indexmap::IndexMap;
use observability_deps::tracing::debug;
use snafu::{ensure, Snafu};

/// Errors for [`merge_schemas`].
#[derive(Debug, Snafu, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot merge an empty list of schemas"))]
    EmptyInput,
}

/// Result with a merge [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Merge schemas into the superset a reader can project every file onto.
///
/// Fields are unioned by name, keeping first-seen order. When the same name
/// appears with different types the merged field widens to `string`, the
/// permissive read policy that lets heterogeneous files coexist until
/// compaction rewrites them.
pub fn merge_schemas(schemas: &[Schema]) -> Result<Schema> {
    ensure!(!schemas.is_empty(), EmptyInputSnafu);

    let mut merged: IndexMap<String, FieldType> = IndexMap::new();

    for schema in schemas {
        for field in schema.fields() {
            match merged.get_mut(&field.name) {
                None => {
                    merged.insert(field.name.clone(), field.field_type);
                }
                Some(existing) if *existing != field.field_type => {
                    debug!(
                        field=%field.name,
                        left=%existing,
                        right=%field.field_type,
                        "type conflict during schema merge, widening to string",
                    );
                    *existing = FieldType::String;
                }
                Some(_) => {}
            }
        }
    }

    Ok(Schema::new(
        merged
            .into_iter()
            .map(|(name, field_type)| Field::new(name, field_type))
            .collect(),
    ))
}
