//! Mirror records and where they are stored.
//!
//! A record pairs a source folder with a target folder and an optional
//! search/replacement for redirect files. Records are identified by an opaque
//! id; the YAML store assigns UUIDs to records that lack one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use strm_mirror_core::SyncRule;

use crate::error::{Result, ServiceError};

/// One configured mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Opaque unique id.
    #[serde(default)]
    pub id: String,

    /// Folder being mirrored.
    pub source_folder: String,

    /// Mirror destination.
    pub target_folder: String,

    /// Text replaced in redirect files. Empty means mirror only.
    #[serde(default)]
    pub search_string: String,

    /// Replacement for the first match.
    #[serde(default)]
    pub replacement_string: String,
}

impl SyncRecord {
    /// Create a mirror-only record.
    pub fn new(
        id: impl Into<String>,
        source_folder: impl Into<String>,
        target_folder: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_folder: source_folder.into(),
            target_folder: target_folder.into(),
            search_string: String::new(),
            replacement_string: String::new(),
        }
    }

    /// Set the search/replacement pair.
    pub fn with_rewrite(mut self, search: impl Into<String>, replace: impl Into<String>) -> Self {
        self.search_string = search.into();
        self.replacement_string = replace.into();
        self
    }

    /// Build the rule the engine applies for this record.
    pub fn to_rule(&self, redirect_extension: &str) -> SyncRule {
        SyncRule::new(&self.source_folder, &self.target_folder)
            .with_rewrite(&self.search_string, &self.replacement_string)
            .with_redirect_extension(redirect_extension)
    }
}

/// Supplies records to the service.
pub trait RecordStore: Send + Sync {
    /// All configured records.
    fn records(&self) -> Result<Vec<SyncRecord>>;

    /// Look up one record by id.
    fn record(&self, id: &str) -> Result<Option<SyncRecord>> {
        Ok(self.records()?.into_iter().find(|r| r.id == id))
    }
}

/// A fixed, in-memory set of records.
#[derive(Debug, Clone, Default)]
pub struct StaticRecords {
    records: Vec<SyncRecord>,
}

impl StaticRecords {
    pub fn new(records: Vec<SyncRecord>) -> Self {
        Self { records }
    }
}

impl RecordStore for StaticRecords {
    fn records(&self) -> Result<Vec<SyncRecord>> {
        Ok(self.records.clone())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordsFile {
    #[serde(default)]
    records: Vec<SyncRecord>,
}

/// Records kept in a YAML file of the form `records: [...]`.
#[derive(Debug, Clone)]
pub struct YamlRecordStore {
    path: PathBuf,
}

impl YamlRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the records, creating an empty file if none exists.
    ///
    /// Records without an id get a fresh UUID, which is written back so ids
    /// stay stable across loads.
    pub fn load(&self) -> Result<Vec<SyncRecord>> {
        if !self.path.exists() {
            self.save(&[])?;
            info!("Created empty records file at {}", self.path.display());
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let file: RecordsFile = if content.trim().is_empty() {
            RecordsFile::default()
        } else {
            serde_yaml::from_str(&content)?
        };

        let mut records = file.records;
        let mut assigned = false;
        for record in &mut records {
            if record.id.is_empty() {
                record.id = Uuid::new_v4().to_string();
                assigned = true;
            }
            normalize_record(record);
        }

        if assigned {
            self.save(&records)?;
        }
        debug!(
            "Loaded {} records from {}",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }

    /// Write the records, replacing the file.
    pub fn save(&self, records: &[SyncRecord]) -> Result<()> {
        let mut records = records.to_vec();
        for record in &mut records {
            if record.id.is_empty() {
                record.id = Uuid::new_v4().to_string();
            }
            normalize_record(record);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_yaml::to_string(&RecordsFile { records })?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Load the file and check every record.
    pub fn validate(&self) -> Result<Vec<SyncRecord>> {
        let records = self.load()?;
        validate_records(&records)?;
        Ok(records)
    }

    /// Insert or replace a record by id. Returns the stored record.
    pub fn upsert(&self, mut record: SyncRecord) -> Result<SyncRecord> {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        validate_record(0, &record)?;

        let mut records = self.load()?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.save(&records)?;
        Ok(record)
    }

    /// Remove a record. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.save(&records)?;
        Ok(true)
    }
}

impl RecordStore for YamlRecordStore {
    fn records(&self) -> Result<Vec<SyncRecord>> {
        self.load()
    }
}

/// Check every record and report the first problem.
pub fn validate_records(records: &[SyncRecord]) -> Result<()> {
    let mut seen = HashSet::new();
    for (index, record) in records.iter().enumerate() {
        validate_record(index, record)?;
        if !seen.insert(record.id.as_str()) {
            return Err(ServiceError::Validation(format!(
                "record {index} reuses id {}",
                record.id
            )));
        }
    }
    Ok(())
}

fn validate_record(index: usize, record: &SyncRecord) -> Result<()> {
    if record.id.is_empty() {
        return Err(ServiceError::Validation(format!("record {index} has no id")));
    }
    if record.source_folder.trim().is_empty() {
        return Err(ServiceError::Validation(format!(
            "record {index} field 'source_folder' cannot be empty"
        )));
    }
    if record.target_folder.trim().is_empty() {
        return Err(ServiceError::Validation(format!(
            "record {index} field 'target_folder' cannot be empty"
        )));
    }
    Ok(())
}

fn normalize_record(record: &mut SyncRecord) {
    record.source_folder = normalize_separators(&record.source_folder, cfg!(windows));
    record.target_folder = normalize_separators(&record.target_folder, cfg!(windows));
}

/// Convert path separators to the host convention.
///
/// On Windows, Unix-style absolute paths (leading `/` but not `//`) are kept
/// as-is so container and network paths survive.
pub fn normalize_separators(path: &str, windows: bool) -> String {
    if windows {
        let is_unc = path.starts_with("\\\\") || path.starts_with("//");
        if path.starts_with('/') && !is_unc {
            return path.to_string();
        }
        path.replace('/', "\\")
    } else {
        path.replace('\\', "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_load_creates_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = YamlRecordStore::new(temp_dir.path().join("conf/records.yaml"));

        assert!(store.load().unwrap().is_empty());
        assert!(store.path().exists());
    }

    #[test]
    fn test_load_assigns_stable_ids() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("records.yaml");
        std::fs::write(
            &path,
            concat!(
                "records:\n",
                "  - source_folder: /media/src\n",
                "    target_folder: /media/dst\n",
                "    search_string: /mnt\n",
                "    replacement_string: http://nas\n",
            ),
        )
        .unwrap();
        let store = YamlRecordStore::new(&path);

        let first = store.load().unwrap();
        assert_eq!(first.len(), 1);
        assert!(!first[0].id.is_empty());
        assert_eq!(first[0].search_string, "/mnt");

        let second = store.load().unwrap();
        assert_eq!(second[0].id, first[0].id);
    }

    #[test]
    fn test_upsert_remove_and_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let store = YamlRecordStore::new(temp_dir.path().join("records.yaml"));

        let stored = store
            .upsert(SyncRecord::new("", "/a", "/b").with_rewrite("x", "y"))
            .unwrap();
        assert_eq!(store.record(&stored.id).unwrap(), Some(stored.clone()));

        let changed = SyncRecord::new(stored.id.clone(), "/a", "/c");
        store.upsert(changed.clone()).unwrap();
        assert_eq!(store.records().unwrap(), vec![changed]);

        assert!(store.remove(&stored.id).unwrap());
        assert!(!store.remove(&stored.id).unwrap());
        assert_eq!(store.record(&stored.id).unwrap(), None);
    }

    #[test]
    fn test_upsert_rejects_empty_paths() {
        let temp_dir = TempDir::new().unwrap();
        let store = YamlRecordStore::new(temp_dir.path().join("records.yaml"));
        assert!(store.upsert(SyncRecord::new("id", " ", "/b")).is_err());
    }

    #[test]
    fn test_store_validate_reports_empty_source() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("records.yaml");
        std::fs::write(
            &path,
            "records:\n  - id: one\n    source_folder: \"\"\n    target_folder: /dst\n",
        )
        .unwrap();

        let err = YamlRecordStore::new(&path).validate().unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(err.to_string().contains("source_folder"));
    }

    #[test]
    fn test_validate_records() {
        let ok = vec![SyncRecord::new("1", "/a", "/b"), SyncRecord::new("2", "/c", "/d")];
        assert!(validate_records(&ok).is_ok());

        let duplicate = vec![SyncRecord::new("1", "/a", "/b"), SyncRecord::new("1", "/c", "/d")];
        assert!(validate_records(&duplicate).is_err());

        let missing_target = vec![SyncRecord::new("1", "/a", "")];
        let err = validate_records(&missing_target).unwrap_err();
        assert!(err.to_string().contains("target_folder"));
    }

    #[test]
    fn test_normalize_separators() {
        assert_eq!(normalize_separators("C:\\media\\tv", false), "C:/media/tv");
        assert_eq!(normalize_separators("D:/media/tv", true), "D:\\media\\tv");
        assert_eq!(normalize_separators("/mnt/media", true), "/mnt/media");
        assert_eq!(normalize_separators("//nas/share", true), "\\\\nas\\share");
    }

    #[test]
    fn test_record_to_rule() {
        let rule = SyncRecord::new("1", "/src", "/dst")
            .with_rewrite("/mnt", "/srv")
            .to_rule("strm");
        assert_eq!(rule.source_root, Path::new("/src"));
        assert_eq!(rule.search, "/mnt");
        assert_eq!(rule.replace, "/srv");
    }
}
