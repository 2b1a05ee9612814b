//! Integrity checks over the partitioned dataset.
//!
//! Everything here reports instead of failing: a validation run returns a
//! structured result with human-readable `errors`, and the caller decides
//! whether that fails the job. Only the filesystem itself can make these
//! functions unhappy, and even then unreadable files are reported, not
//! thrown.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use arrow::array::Array;
use observability_deps::tracing::{debug, warn};
use parquet_file::dataset::{list_parquet_files, walk_parquet_files};
use parquet_file::metadata::{file_stats, read_logical_schema};
use parquet_file::reader::read_file_filtered;
use schema::{check_compatibility, Schema};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Result of [`validate_partition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionValidation {
    /// True when every rule passed.
    pub is_valid: bool,
    /// Number of parquet files seen.
    pub file_count: u64,
    /// Total rows across readable files.
    pub total_records: u64,
    /// Total size of the files, bytes.
    pub total_bytes: u64,
    /// Rule violations, in evaluation order.
    pub errors: Vec<String>,
}

impl PartitionValidation {
    fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            file_count: 0,
            total_records: 0,
            total_bytes: 0,
            errors,
        }
    }
}

/// Validate one partition directory.
///
/// Rules, in order, each violation contributing an error: the directory
/// exists and is a directory; it holds at least one parquet file; every
/// file is non-empty; every file opens and decodes; all files share one
/// schema.
pub fn validate_partition(partition_dir: &Path) -> PartitionValidation {
    if !partition_dir.exists() {
        return PartitionValidation::invalid(vec![format!(
            "partition directory does not exist: {}",
            partition_dir.display()
        )]);
    }
    if !partition_dir.is_dir() {
        return PartitionValidation::invalid(vec![format!(
            "not a directory: {}",
            partition_dir.display()
        )]);
    }

    let files = match list_parquet_files(partition_dir) {
        Ok(files) => files,
        Err(e) => return PartitionValidation::invalid(vec![e.to_string()]),
    };
    if files.is_empty() {
        return PartitionValidation::invalid(vec![format!(
            "partition contains no parquet files: {}",
            partition_dir.display()
        )]);
    }

    let mut report = PartitionValidation {
        is_valid: true,
        file_count: files.len() as u64,
        total_records: 0,
        total_bytes: 0,
        errors: vec![],
    };
    let mut first_schema: Option<(String, Schema)> = None;

    for file in &files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            report.errors.push(format!("file has size 0: {name}"));
            continue;
        }
        report.total_bytes += size;

        let stats = match file_stats(file) {
            Ok(stats) => stats,
            Err(e) => {
                report.errors.push(format!("cannot read file {name}: {e}"));
                continue;
            }
        };
        report.total_records += stats.rows as u64;

        match read_logical_schema(file) {
            Ok(schema) => match &first_schema {
                None => first_schema = Some((name, schema)),
                Some((first_name, first)) => {
                    if &schema != first {
                        report.errors.push(format!(
                            "schema mismatch: {name} differs from {first_name}"
                        ));
                    }
                }
            },
            Err(e) => report.errors.push(format!("cannot read schema of {name}: {e}")),
        }
    }

    report.is_valid = report.errors.is_empty();
    report
}

/// One duplicated record id and how often it occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateRecord {
    /// The duplicated id.
    pub record_id: String,
    /// Occurrences across the dataset (always > 1).
    pub count: u64,
}

/// Count `record_id` occurrences across every file under `root` and return
/// the ids seen more than once, most frequent first.
///
/// Only the id column is decoded. A missing or empty root yields an empty
/// report, not an error; unreadable files are skipped.
pub fn detect_duplicates(root: &Path) -> Vec<DuplicateRecord> {
    if !root.is_dir() {
        return vec![];
    }
    let files = match walk_parquet_files(root) {
        Ok(files) => files,
        Err(e) => {
            warn!(error=%e, "cannot walk dataset for duplicate probe");
            return vec![];
        }
    };

    let id_column = vec!["record_id".to_string()];
    let mut counts: HashMap<String, u64> = HashMap::new();

    for file in files {
        let batches = match read_file_filtered(&file, Some(&id_column), &[]) {
            Ok(batches) => batches,
            Err(e) => {
                warn!(file=%file.display(), error=%e, "skipping unreadable file in duplicate probe");
                continue;
            }
        };
        for batch in batches {
            let Some(column) = batch.column_by_name("record_id") else {
                continue;
            };
            let Some(ids) = column
                .as_any()
                .downcast_ref::<arrow::array::StringArray>()
            else {
                continue;
            };
            for i in 0..ids.len() {
                if !ids.is_null(i) {
                    *counts.entry(ids.value(i).to_string()).or_insert(0) += 1;
                }
            }
        }
    }

    let mut duplicates: Vec<DuplicateRecord> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(record_id, count)| DuplicateRecord { record_id, count })
        .collect();
    duplicates.sort_by(|a, b| b.count.cmp(&a.count).then(a.record_id.cmp(&b.record_id)));
    debug!(duplicates = duplicates.len(), "duplicate probe finished");
    duplicates
}

/// A field whose stored type differs from the declared one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeMismatch {
    /// Field name.
    pub field: String,
    /// Declared type.
    pub expected: String,
    /// Stored type.
    pub actual: String,
}

/// Result of [`validate_schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaValidation {
    /// True when nothing required is missing or mistyped.
    pub is_valid: bool,
    /// Declared fields absent from the file.
    pub missing_fields: Vec<String>,
    /// File fields beyond the declaration (allowed: schema evolution).
    pub extra_fields: Vec<String>,
    /// Fields stored with a different type.
    pub type_mismatches: Vec<TypeMismatch>,
    /// Human-readable findings.
    pub errors: Vec<String>,
}

/// Compare one file against a declared schema. Extra fields are fine;
/// missing fields and type mismatches are not.
pub fn validate_schema(file: &Path, expected: &Schema) -> SchemaValidation {
    let mut report = SchemaValidation {
        is_valid: false,
        missing_fields: vec![],
        extra_fields: vec![],
        type_mismatches: vec![],
        errors: vec![],
    };

    if !file.exists() {
        report.errors.push(format!("file does not exist: {}", file.display()));
        return report;
    }

    let actual = match read_logical_schema(file) {
        Ok(actual) => actual,
        Err(e) => {
            report.errors.push(format!("cannot read schema: {e}"));
            return report;
        }
    };

    for field in expected.fields() {
        match actual.field(&field.name) {
            None => report.missing_fields.push(field.name.clone()),
            Some(actual_field) if actual_field.field_type != field.field_type => {
                report.type_mismatches.push(TypeMismatch {
                    field: field.name.clone(),
                    expected: field.field_type.to_string(),
                    actual: actual_field.field_type.to_string(),
                });
            }
            Some(_) => {}
        }
    }
    for field in actual.fields() {
        if expected.field(&field.name).is_none() {
            report.extra_fields.push(field.name.clone());
        }
    }

    if !report.missing_fields.is_empty() {
        report
            .errors
            .push(format!("missing required fields: {}", report.missing_fields.join(", ")));
    }
    for mismatch in &report.type_mismatches {
        report.errors.push(format!(
            "field '{}' type mismatch: expected {}, found {}",
            mismatch.field, mismatch.expected, mismatch.actual
        ));
    }

    report.is_valid = report.errors.is_empty();
    report
}

/// One observed schema variant across the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaVersionGroup {
    /// Fields in this variant.
    pub field_count: u64,
    /// Files carrying it.
    pub file_count: u64,
    /// One example file.
    pub sample_file: String,
}

/// A file that is break-level incompatible with the dataset baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompatibleFile {
    /// The offending file.
    pub file: String,
    /// Why it is incompatible.
    pub errors: Vec<String>,
}

/// Result of [`detect_schema_evolution`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct EvolutionReport {
    /// True when more than one schema variant exists.
    pub has_evolution: bool,
    /// The observed variants, baseline first.
    pub schema_versions: Vec<SchemaVersionGroup>,
    /// Files breaking against the baseline.
    pub incompatible_files: Vec<IncompatibleFile>,
    /// Non-fatal observations (read failures, variant count).
    pub warnings: Vec<String>,
}

/// Walk the dataset, bucket files by exact schema equality against the
/// first file's schema as baseline, and flag break-level divergence.
pub fn detect_schema_evolution(root: &Path) -> EvolutionReport {
    let mut report = EvolutionReport::default();

    if !root.is_dir() {
        report.warnings.push("dataset root does not exist".to_string());
        return report;
    }
    let files = match walk_parquet_files(root) {
        Ok(files) => files,
        Err(e) => {
            report.warnings.push(format!("cannot walk dataset: {e}"));
            return report;
        }
    };
    if files.is_empty() {
        report.warnings.push("no parquet files found".to_string());
        return report;
    }

    let baseline = match read_logical_schema(&files[0]) {
        Ok(baseline) => baseline,
        Err(e) => {
            report
                .warnings
                .push(format!("cannot read baseline schema of {}: {e}", files[0].display()));
            return report;
        }
    };

    // (schema, sample file, count), baseline bucket first.
    let mut versions: Vec<(Schema, String, u64)> =
        vec![(baseline.clone(), files[0].display().to_string(), 1)];

    for file in &files[1..] {
        let current = match read_logical_schema(file) {
            Ok(current) => current,
            Err(e) => {
                report
                    .warnings
                    .push(format!("cannot read schema of {}: {e}", file.display()));
                continue;
            }
        };

        match versions.iter_mut().find(|(schema, _, _)| *schema == current) {
            Some((_, _, count)) => *count += 1,
            None => {
                let compat = check_compatibility(&baseline, &current);
                if !compat.is_compatible {
                    report.incompatible_files.push(IncompatibleFile {
                        file: file.display().to_string(),
                        errors: compat.errors,
                    });
                }
                versions.push((current, file.display().to_string(), 1));
            }
        }
    }

    report.has_evolution = versions.len() > 1;
    if report.has_evolution {
        report
            .warnings
            .push(format!("detected {} distinct schema versions", versions.len()));
    }
    report.schema_versions = versions
        .into_iter()
        .map(|(schema, sample_file, file_count)| SchemaVersionGroup {
            field_count: schema.len() as u64,
            file_count,
            sample_file,
        })
        .collect();
    report
}
