//! File-backed versioned schema registry.
//!
//! One JSON document maps each schema name to its ordered version list.
//! Every mutation rewrites the whole document atomically while holding the
//! document's sibling `.lock`, so concurrent registrars serialize.

use crate::compat::{check_compatibility, CompatibilityReport};
use crate::Schema;
use file_util::{atomic_write, FileLock};
use observability_deps::tracing::info;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vault_time::TimeProvider;

/// Errors for [`SchemaRegistry`].
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot read schema registry {}: {}", path, source))]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Schema registry {} is not valid JSON: {}", path, source))]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },

    #[snafu(display("Cannot lock schema registry {}: {}", path, source))]
    Lock {
        path: String,
        source: file_util::lock::Error,
    },

    #[snafu(display("Cannot persist schema registry {}: {}", path, source))]
    Persist {
        path: String,
        source: file_util::atomic::Error,
    },
}

/// Result with a registry [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One registered version of a named schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Monotonic version number, starting at 1.
    pub version: u32,
    /// The registered field set.
    pub fields: Schema,
    /// Free-form registration note.
    #[serde(default)]
    pub note: String,
    /// RFC 3339 registration instant.
    pub registered_at: String,
}

/// Version metadata without the field set, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    /// Version number.
    pub version: u32,
    /// Registration note.
    pub note: String,
    /// RFC 3339 registration instant.
    pub registered_at: String,
}

type RegistryDoc = BTreeMap<String, Vec<SchemaVersion>>;

/// Handle to one persistent registry document.
#[derive(Debug)]
pub struct SchemaRegistry {
    path: PathBuf,
    time_provider: Arc<dyn TimeProvider>,
}

impl SchemaRegistry {
    /// Bind a registry handle to `path`. The document is created on the
    /// first registration.
    pub fn new(path: impl Into<PathBuf>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            path: path.into(),
            time_provider,
        }
    }

    /// Append a new version of `name` and return its version number.
    ///
    /// Registration itself never rejects a breaking change; callers that
    /// want gating ask [`Self::is_compatible`] first.
    pub fn register(&self, name: &str, schema: &Schema, note: &str) -> Result<u32> {
        let _lock = self.lock()?;

        let mut doc = self.load_doc()?;
        let versions = doc.entry(name.to_string()).or_default();
        let version = versions.last().map(|v| v.version).unwrap_or(0) + 1;

        versions.push(SchemaVersion {
            version,
            fields: schema.clone(),
            note: note.to_string(),
            registered_at: self.time_provider.now().to_rfc3339(),
        });

        self.store_doc(&doc)?;
        info!(schema=%name, version, "registered schema version");
        Ok(version)
    }

    /// Fetch a schema by name, latest version when `version` is `None`.
    pub fn get(&self, name: &str, version: Option<u32>) -> Result<Option<Schema>> {
        let doc = self.load_doc()?;
        let versions = match doc.get(name) {
            Some(v) => v,
            None => return Ok(None),
        };

        let found = match version {
            Some(wanted) => versions.iter().find(|v| v.version == wanted),
            None => versions.last(),
        };
        Ok(found.map(|v| v.fields.clone()))
    }

    /// The latest registered version number of `name`, if any.
    pub fn latest_version(&self, name: &str) -> Result<Option<u32>> {
        let doc = self.load_doc()?;
        Ok(doc
            .get(name)
            .and_then(|versions| versions.last())
            .map(|v| v.version))
    }

    /// Version metadata for `name`, oldest first. Unknown names list empty.
    pub fn list_versions(&self, name: &str) -> Result<Vec<VersionInfo>> {
        let doc = self.load_doc()?;
        Ok(doc
            .get(name)
            .map(|versions| {
                versions
                    .iter()
                    .map(|v| VersionInfo {
                        version: v.version,
                        note: v.note.clone(),
                        registered_at: v.registered_at.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Classify `candidate` against the latest version of `name`.
    ///
    /// An unregistered name is unconstrained: anything is compatible.
    pub fn is_compatible(&self, name: &str, candidate: &Schema) -> Result<CompatibilityReport> {
        let latest = self.get(name, None)?;
        Ok(match latest {
            Some(current) => check_compatibility(&current, candidate),
            None => CompatibilityReport::unconstrained(),
        })
    }

    fn lock(&self) -> Result<FileLock> {
        let mut lock_path = self.path.as_os_str().to_owned();
        lock_path.push(".lock");
        FileLock::acquire(Path::new(&lock_path)).context(LockSnafu {
            path: self.path.display().to_string(),
        })
    }

    fn load_doc(&self) -> Result<RegistryDoc> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RegistryDoc::new()),
            Err(e) => {
                return Err(e).context(ReadSnafu {
                    path: self.path.display().to_string(),
                })
            }
        };
        serde_json::from_slice(&bytes).context(CorruptSnafu {
            path: self.path.display().to_string(),
        })
    }

    fn store_doc(&self, doc: &RegistryDoc) -> Result<()> {
        let json = serde_json::to_vec_pretty(doc).expect("registry document serializes");
        atomic_write(&self.path, &json).context(PersistSnafu {
            path: self.path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompatibilityType, Field, FieldType};
    use vault_time::{MockProvider, Time};

    fn registry(dir: &Path) -> SchemaRegistry {
        let time_provider = Arc::new(MockProvider::new(
            Time::from_timestamp(1737590400).unwrap(),
        ));
        SchemaRegistry::new(dir.join("schemas.json"), time_provider)
    }

    fn msg_v1() -> Schema {
        Schema::new(vec![
            Field::new("record_id", FieldType::String),
            Field::new("content", FieldType::String),
        ])
    }

    #[test]
    fn versions_are_monotonic_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        assert_eq!(registry.register("msg", &msg_v1(), "initial").unwrap(), 1);
        assert_eq!(registry.register("msg", &msg_v1(), "again").unwrap(), 2);
        assert_eq!(registry.latest_version("msg").unwrap(), Some(2));
    }

    #[test]
    fn register_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry.register("msg", &msg_v1(), "initial").unwrap();
        assert_eq!(registry.get("msg", None).unwrap(), Some(msg_v1()));
        assert_eq!(registry.get("msg", Some(1)).unwrap(), Some(msg_v1()));
        assert_eq!(registry.get("msg", Some(9)).unwrap(), None);
        assert_eq!(registry.get("unknown", None).unwrap(), None);
    }

    #[test]
    fn get_without_version_returns_latest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let mut v2 = msg_v1();
        v2 = Schema::new(
            v2.fields()
                .iter()
                .cloned()
                .chain([Field::new("event_time", FieldType::Int64)])
                .collect(),
        );

        registry.register("msg", &msg_v1(), "v1").unwrap();
        registry.register("msg", &v2, "v2").unwrap();

        assert_eq!(registry.get("msg", None).unwrap(), Some(v2));
        assert_eq!(registry.get("msg", Some(1)).unwrap(), Some(msg_v1()));
    }

    #[test]
    fn list_versions_carries_notes_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry.register("msg", &msg_v1(), "first").unwrap();
        registry.register("msg", &msg_v1(), "second").unwrap();

        let versions = registry.list_versions("msg").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[0].note, "first");
        assert_eq!(versions[0].registered_at, "2025-01-23T00:00:00Z");
        assert_eq!(versions[1].version, 2);

        assert!(registry.list_versions("unknown").unwrap().is_empty());
    }

    #[test]
    fn compatibility_against_latest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        // Unregistered: unconstrained.
        let report = registry.is_compatible("msg", &msg_v1()).unwrap();
        assert!(report.is_compatible);

        registry.register("msg", &msg_v1(), "initial").unwrap();

        let widened = Schema::new(
            msg_v1()
                .fields()
                .iter()
                .cloned()
                .chain([Field::new("event_time", FieldType::Int64)])
                .collect(),
        );
        let report = registry.is_compatible("msg", &widened).unwrap();
        assert!(report.is_compatible);
        assert_eq!(report.compatibility_type, CompatibilityType::Backward);
        assert_eq!(report.added_fields, vec!["event_time"]);

        let narrowed = Schema::new(vec![Field::new("record_id", FieldType::String)]);
        let report = registry.is_compatible("msg", &narrowed).unwrap();
        assert!(!report.is_compatible);
        assert_eq!(report.compatibility_type, CompatibilityType::Breaking);
        assert_eq!(report.removed_fields, vec!["content"]);
    }

    #[test]
    fn state_survives_reopening_the_document() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = registry(dir.path());
            registry.register("msg", &msg_v1(), "initial").unwrap();
        }

        let reopened = registry(dir.path());
        assert_eq!(reopened.get("msg", None).unwrap(), Some(msg_v1()));
        assert_eq!(reopened.latest_version("msg").unwrap(), Some(1));
    }
}
