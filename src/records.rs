//! Media record persistence.
//!
//! The pipeline needs three things from a store: load a record by id,
//! save a new one, and merge into an existing one atomically. The
//! [`RecordStore::update`] closure runs under the store's lock, so two
//! concurrent `process` runs on the same record both see each other's
//! derivative keys instead of clobbering them.
//!
//! Two implementations:
//!
//! - [`MemoryRecordStore`]: a locked map, used by tests and ephemeral
//!   libraries.
//! - [`JsonRecordStore`]: the same map mirrored to a versioned JSON file
//!   after every mutation (temp file + rename).

use crate::types::MediaRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

/// Version of the records file format.
const RECORDS_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Media record {0} not found")]
    NotFound(Uuid),
    #[error("Media record {0} already exists")]
    AlreadyExists(Uuid),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Records file {path} has unsupported version {found}")]
    Version { path: String, found: u32 },
    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

/// Load/save access to media records, atomic per record.
pub trait RecordStore: Send + Sync {
    fn load(&self, id: Uuid) -> Result<MediaRecord, RecordError>;

    /// Persist a new record. Fails with `AlreadyExists` for a known id.
    fn insert(&self, record: &MediaRecord) -> Result<(), RecordError>;

    /// Read-modify-write one record under the store lock.
    /// Returns the record as saved.
    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut MediaRecord),
    ) -> Result<MediaRecord, RecordError>;

    /// Remove a record, returning it.
    fn remove(&self, id: Uuid) -> Result<MediaRecord, RecordError>;

    /// Every record, oldest first.
    fn list(&self) -> Result<Vec<MediaRecord>, RecordError>;
}

type RecordMap = BTreeMap<Uuid, MediaRecord>;

fn lock(map: &Mutex<RecordMap>) -> MutexGuard<'_, RecordMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

fn sorted(records: &RecordMap) -> Vec<MediaRecord> {
    let mut all: Vec<MediaRecord> = records.values().cloned().collect();
    all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    all
}

fn apply_update(
    records: &mut RecordMap,
    id: Uuid,
    apply: &mut dyn FnMut(&mut MediaRecord),
) -> Result<MediaRecord, RecordError> {
    let record = records.get_mut(&id).ok_or(RecordError::NotFound(id))?;
    apply(record);
    // The id is the map key; an update must not re-key the record.
    record.id = id;
    Ok(record.clone())
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<RecordMap>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self, id: Uuid) -> Result<MediaRecord, RecordError> {
        lock(&self.records)
            .get(&id)
            .cloned()
            .ok_or(RecordError::NotFound(id))
    }

    fn insert(&self, record: &MediaRecord) -> Result<(), RecordError> {
        let mut records = lock(&self.records);
        if records.contains_key(&record.id) {
            return Err(RecordError::AlreadyExists(record.id));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut MediaRecord),
    ) -> Result<MediaRecord, RecordError> {
        apply_update(&mut lock(&self.records), id, apply)
    }

    fn remove(&self, id: Uuid) -> Result<MediaRecord, RecordError> {
        lock(&self.records)
            .remove(&id)
            .ok_or(RecordError::NotFound(id))
    }

    fn list(&self) -> Result<Vec<MediaRecord>, RecordError> {
        Ok(sorted(&lock(&self.records)))
    }
}

// =============================================================================
// JSON file store
// =============================================================================

/// On-disk layout of the records file.
#[derive(Debug, Serialize, Deserialize)]
struct RecordsFile {
    version: u32,
    records: RecordMap,
}

/// Records kept in memory and written through to a JSON file.
///
/// A failed write rolls the in-memory change back, so memory and disk
/// never disagree.
pub struct JsonRecordStore {
    path: PathBuf,
    records: Mutex<RecordMap>,
}

impl JsonRecordStore {
    /// Open the records file at `path`. A missing file is an empty store;
    /// a corrupt file or unknown version is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RecordError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let file: RecordsFile = serde_json::from_str(&content)?;
                if file.version != RECORDS_VERSION {
                    return Err(RecordError::Version {
                        path: path.display().to_string(),
                        found: file.version,
                    });
                }
                file.records
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => RecordMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, records: &RecordMap) -> Result<(), RecordError> {
        let file = RecordsFile {
            version: RECORDS_VERSION,
            records: records.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Apply `change` to the map and write it out, restoring the previous
    /// state if the write fails.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut RecordMap) -> Result<T, RecordError>,
    ) -> Result<T, RecordError> {
        let mut records = lock(&self.records);
        let before = records.clone();
        let out = change(&mut records)?;
        if let Err(e) = self.save(&records) {
            *records = before;
            return Err(e);
        }
        Ok(out)
    }
}

impl RecordStore for JsonRecordStore {
    fn load(&self, id: Uuid) -> Result<MediaRecord, RecordError> {
        lock(&self.records)
            .get(&id)
            .cloned()
            .ok_or(RecordError::NotFound(id))
    }

    fn insert(&self, record: &MediaRecord) -> Result<(), RecordError> {
        self.mutate(|records| {
            if records.contains_key(&record.id) {
                return Err(RecordError::AlreadyExists(record.id));
            }
            records.insert(record.id, record.clone());
            Ok(())
        })
    }

    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut MediaRecord),
    ) -> Result<MediaRecord, RecordError> {
        self.mutate(|records| apply_update(records, id, apply))
    }

    fn remove(&self, id: Uuid) -> Result<MediaRecord, RecordError> {
        self.mutate(|records| records.remove(&id).ok_or(RecordError::NotFound(id)))
    }

    fn list(&self) -> Result<Vec<MediaRecord>, RecordError> {
        Ok(sorted(&lock(&self.records)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::sample_record;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn stores(tmp: &TempDir) -> Vec<Box<dyn RecordStore>> {
        vec![
            Box::new(MemoryRecordStore::new()),
            Box::new(JsonRecordStore::open(tmp.path().join("records.json")).unwrap()),
        ]
    }

    #[test]
    fn insert_load_remove() {
        let tmp = TempDir::new().unwrap();
        for store in stores(&tmp) {
            let record = sample_record("a/cat.jpg", "image/jpeg");
            store.insert(&record).unwrap();
            assert_eq!(store.load(record.id).unwrap(), record);
            assert!(matches!(
                store.insert(&record),
                Err(RecordError::AlreadyExists(_))
            ));
            assert_eq!(store.remove(record.id).unwrap().id, record.id);
            assert!(matches!(
                store.load(record.id),
                Err(RecordError::NotFound(_))
            ));
        }
    }

    #[test]
    fn update_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        for store in stores(&tmp) {
            let result = store.update(Uuid::new_v4(), &mut |r| r.title = Some("x".into()));
            assert!(matches!(result, Err(RecordError::NotFound(_))));
        }
    }

    #[test]
    fn update_cannot_rekey() {
        let tmp = TempDir::new().unwrap();
        for store in stores(&tmp) {
            let record = sample_record("a/cat.jpg", "image/jpeg");
            store.insert(&record).unwrap();
            let saved = store
                .update(record.id, &mut |r| {
                    r.id = Uuid::new_v4();
                    r.title = Some("Cat".into());
                })
                .unwrap();
            assert_eq!(saved.id, record.id);
            assert_eq!(store.load(record.id).unwrap().title.as_deref(), Some("Cat"));
        }
    }

    #[test]
    fn list_is_oldest_first() {
        let tmp = TempDir::new().unwrap();
        for store in stores(&tmp) {
            let mut older = sample_record("a.jpg", "image/jpeg");
            older.created_at -= chrono::Duration::hours(1);
            let newer = sample_record("b.jpg", "image/jpeg");
            store.insert(&newer).unwrap();
            store.insert(&older).unwrap();
            let ids: Vec<Uuid> = store.list().unwrap().iter().map(|r| r.id).collect();
            assert_eq!(ids, vec![older.id, newer.id]);
        }
    }

    #[test]
    fn json_store_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/records.json");
        let record = sample_record("a/cat.jpg", "image/jpeg");
        {
            let store = JsonRecordStore::open(&path).unwrap();
            store.insert(&record).unwrap();
            store
                .update(record.id, &mut |r| r.alt_text = Some("a cat".into()))
                .unwrap();
        }
        let reopened = JsonRecordStore::open(&path).unwrap();
        assert_eq!(
            reopened.load(record.id).unwrap().alt_text.as_deref(),
            Some("a cat")
        );

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"version\": 1"));
        assert!(raw.contains("\"altText\": \"a cat\""));
    }

    #[test]
    fn json_store_rejects_corrupt_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("records.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonRecordStore::open(&path),
            Err(RecordError::Json(_))
        ));
    }

    #[test]
    fn json_store_rejects_unknown_version() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("records.json");
        std::fs::write(&path, r#"{"version": 99, "records": {}}"#).unwrap();
        assert!(matches!(
            JsonRecordStore::open(&path),
            Err(RecordError::Version { found: 99, .. })
        ));
    }

    #[test]
    fn concurrent_updates_are_merged() {
        let store = Arc::new(MemoryRecordStore::new());
        let record = sample_record("a/cat.jpg", "image/jpeg");
        store.insert(&record).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .update(record.id, &mut |r| {
                            r.tag_ids.insert(format!("tag-{i}"));
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.load(record.id).unwrap().tag_ids.len(), 8);
    }
}
