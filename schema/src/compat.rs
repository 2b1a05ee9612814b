//! Pure schema compatibility classification.
//!
//! Added fields are backward compatible (old files read fine with
//! null-fill); removed fields and type changes are breaking.

use crate::Schema;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Compatibility class between an old schema and a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityType {
    /// No change at all.
    Full,
    /// Only additions; existing readers keep working.
    Backward,
    /// Removals or type changes.
    Breaking,
}

impl fmt::Display for CompatibilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Full => "full",
            Self::Backward => "backward",
            Self::Breaking => "breaking",
        };
        write!(f, "{name}")
    }
}

/// A field present in both schemas whose type differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    /// Field name.
    pub field: String,
    /// Type in the old schema.
    pub old_type: String,
    /// Type in the candidate schema.
    pub new_type: String,
}

/// Outcome of [`check_compatibility`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityReport {
    /// True unless the change is breaking.
    pub is_compatible: bool,
    /// The classification.
    pub compatibility_type: CompatibilityType,
    /// Fields only in the candidate, in candidate order.
    pub added_fields: Vec<String>,
    /// Fields only in the old schema, in old-schema order.
    pub removed_fields: Vec<String>,
    /// Fields whose type changed.
    pub changed_fields: Vec<FieldChange>,
    /// Human-readable notes for non-breaking differences.
    pub warnings: Vec<String>,
    /// Human-readable notes for breaking differences.
    pub errors: Vec<String>,
}

impl CompatibilityReport {
    /// The report for a candidate with nothing to compare against
    /// (first registration of a name).
    pub fn unconstrained() -> Self {
        Self {
            is_compatible: true,
            compatibility_type: CompatibilityType::Full,
            added_fields: vec![],
            removed_fields: vec![],
            changed_fields: vec![],
            warnings: vec![],
            errors: vec![],
        }
    }
}

/// Classify the change from `old` to `new`.
pub fn check_compatibility(old: &Schema, new: &Schema) -> CompatibilityReport {
    let old_names: HashSet<&str> = old.fields().iter().map(|f| f.name.as_str()).collect();
    let new_names: HashSet<&str> = new.fields().iter().map(|f| f.name.as_str()).collect();

    let added_fields: Vec<String> = new
        .fields()
        .iter()
        .filter(|f| !old_names.contains(f.name.as_str()))
        .map(|f| f.name.clone())
        .collect();

    let removed_fields: Vec<String> = old
        .fields()
        .iter()
        .filter(|f| !new_names.contains(f.name.as_str()))
        .map(|f| f.name.clone())
        .collect();

    let changed_fields: Vec<FieldChange> = old
        .fields()
        .iter()
        .filter_map(|old_field| {
            let new_field = new.field(&old_field.name)?;
            (new_field.field_type != old_field.field_type).then(|| FieldChange {
                field: old_field.name.clone(),
                old_type: old_field.field_type.to_string(),
                new_type: new_field.field_type.to_string(),
            })
        })
        .collect();

    let mut warnings = vec![];
    let mut errors = vec![];

    if !added_fields.is_empty() {
        warnings.push(format!("added fields: {}", added_fields.join(", ")));
    }
    if !removed_fields.is_empty() {
        errors.push(format!(
            "removed fields (breaking): {}",
            removed_fields.join(", ")
        ));
    }
    for change in &changed_fields {
        errors.push(format!(
            "field '{}' changed type (breaking): {} -> {}",
            change.field, change.old_type, change.new_type
        ));
    }

    let compatibility_type = if !removed_fields.is_empty() || !changed_fields.is_empty() {
        CompatibilityType::Breaking
    } else if !added_fields.is_empty() {
        CompatibilityType::Backward
    } else {
        CompatibilityType::Full
    };

    CompatibilityReport {
        is_compatible: compatibility_type != CompatibilityType::Breaking,
        compatibility_type,
        added_fields,
        removed_fields,
        changed_fields,
        warnings,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Field, FieldType};

    fn schema(fields: &[(&str, FieldType)]) -> Schema {
        Schema::new(
            fields
                .iter()
                .map(|(name, t)| Field::new(*name, *t))
                .collect(),
        )
    }

    #[test]
    fn identical_schemas_are_fully_compatible() {
        let s = schema(&[
            ("record_id", FieldType::String),
            ("content", FieldType::String),
        ]);
        let report = check_compatibility(&s, &s);
        assert!(report.is_compatible);
        assert_eq!(report.compatibility_type, CompatibilityType::Full);
        assert!(report.added_fields.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn added_field_is_backward() {
        let old = schema(&[
            ("record_id", FieldType::String),
            ("content", FieldType::String),
        ]);
        let new = schema(&[
            ("record_id", FieldType::String),
            ("content", FieldType::String),
            ("event_time", FieldType::Int64),
        ]);

        let report = check_compatibility(&old, &new);
        assert!(report.is_compatible);
        assert_eq!(report.compatibility_type, CompatibilityType::Backward);
        assert_eq!(report.added_fields, vec!["event_time"]);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn removed_field_is_breaking() {
        let old = schema(&[
            ("record_id", FieldType::String),
            ("content", FieldType::String),
        ]);
        let new = schema(&[("record_id", FieldType::String)]);

        let report = check_compatibility(&old, &new);
        assert!(!report.is_compatible);
        assert_eq!(report.compatibility_type, CompatibilityType::Breaking);
        assert_eq!(report.removed_fields, vec!["content"]);
    }

    #[test]
    fn type_change_is_breaking() {
        let old = schema(&[("event_time", FieldType::Int64)]);
        let new = schema(&[("event_time", FieldType::String)]);

        let report = check_compatibility(&old, &new);
        assert!(!report.is_compatible);
        assert_eq!(report.changed_fields.len(), 1);
        assert_eq!(report.changed_fields[0].field, "event_time");
        assert_eq!(report.changed_fields[0].old_type, "int64");
        assert_eq!(report.changed_fields[0].new_type, "string");
    }

    #[test]
    fn mixed_changes_report_every_difference() {
        let old = schema(&[
            ("a", FieldType::String),
            ("b", FieldType::Int32),
            ("c", FieldType::String),
        ]);
        let new = schema(&[
            ("a", FieldType::Int64),
            ("c", FieldType::String),
            ("d", FieldType::Bool),
        ]);

        let report = check_compatibility(&old, &new);
        assert!(!report.is_compatible);
        assert_eq!(report.added_fields, vec!["d"]);
        assert_eq!(report.removed_fields, vec!["b"]);
        assert_eq!(report.changed_fields.len(), 1);
        assert_eq!(report.errors.len(), 2);
    }
}
