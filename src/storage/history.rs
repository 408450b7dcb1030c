use super::{read_doc, write_doc};
use crate::error::StoreError;
use crate::model::HistoryRecord;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Whole-document store of history records.
///
/// Clones share one lock, so every read-modify-write in the process is
/// serialized and concurrent writers cannot drop each other's changes.
#[derive(Debug, Clone)]
pub(crate) struct HistoryStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record in file order. A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        let _lease = self.lease();
        self.read()
    }

    pub fn append(&self, record: HistoryRecord) -> Result<usize, StoreError> {
        self.update(|records| {
            records.push(record);
            records.len()
        })
    }

    /// Delete one record by id. Returns whether anything was removed.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.update(|records| {
            let before = records.len();
            records.retain(|r| r.id != id);
            records.len() != before
        })
    }

    /// Remove every record. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, StoreError> {
        self.update(|records| {
            let n = records.len();
            records.clear();
            n
        })
    }

    /// Most recent records first, at most `limit`.
    pub fn load_recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut records = self.load()?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    /// Load, transform in memory, save, all under the lease.
    pub fn update<T>(&self, f: impl FnOnce(&mut Vec<HistoryRecord>) -> T) -> Result<T, StoreError> {
        let _lease = self.lease();
        let mut records = self.read()?;
        let out = f(&mut records);
        write_doc(&self.path, &records)?;
        Ok(out)
    }

    fn lease(&self) -> std::sync::MutexGuard<'_, ()> {
        // A panic while holding the lease leaves no partial state on disk.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut records: Vec<HistoryRecord> = read_doc(&self.path)?.unwrap_or_default();
        for (i, r) in records.iter_mut().enumerate() {
            if r.id.is_empty() {
                r.id = legacy_id(&r.timestamp, i);
            }
        }
        Ok(records)
    }
}

/// Stable id for records written before ids existed.
fn legacy_id(timestamp: &str, index: usize) -> String {
    format!("legacy-{index}-{timestamp}")
}
