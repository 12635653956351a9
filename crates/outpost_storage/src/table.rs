//! Key/value tables of stored records.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::log::{LogConfig, RecordLog};
use crate::record::{LogEntry, StoredRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// A persistent table of [`StoredRecord`]s keyed by [`StoredRecord::key`].
///
/// Tables are shared between a store, its sync passes and tooling, so every
/// method takes `&self`.
pub trait Table: Send + Sync {
    /// Table name.
    fn name(&self) -> &str;

    /// All records, ordered by key.
    fn all(&self) -> StorageResult<Vec<StoredRecord>>;

    /// The record under `key`.
    fn get(&self, key: &str) -> StorageResult<Option<StoredRecord>>;

    /// Inserts or overwrites one record.
    fn put(&self, record: StoredRecord) -> StorageResult<()> {
        self.put_many(vec![record])
    }

    /// Inserts or overwrites records in one write.
    fn put_many(&self, records: Vec<StoredRecord>) -> StorageResult<()>;

    /// Removes the record under `key`. Missing keys are ignored.
    fn delete(&self, key: &str) -> StorageResult<()> {
        self.delete_many(&[key.to_string()])
    }

    /// Removes records in one write.
    fn delete_many(&self, keys: &[String]) -> StorageResult<()>;

    /// Removes every record.
    fn clear(&self) -> StorageResult<()>;

    /// Number of records.
    fn len(&self) -> StorageResult<usize>;

    /// Whether the table is empty.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reclaims space held by overwritten records, if the table keeps any.
    fn compact(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// A table living only in memory.
///
/// Writes can be made to fail with [`MemoryTable::set_failing`] to exercise
/// the paths where local durability is lost.
#[derive(Debug)]
pub struct MemoryTable {
    name: String,
    records: RwLock<BTreeMap<String, StoredRecord>>,
    failing: AtomicBool,
}

impl MemoryTable {
    /// Creates an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(BTreeMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Creates a table holding `records`.
    pub fn with_records(name: impl Into<String>, records: Vec<StoredRecord>) -> Self {
        let table = Self::new(name);
        table
            .records
            .write()
            .extend(records.into_iter().map(|r| (r.key.clone(), r)));
        table
    }

    /// Makes writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::injected());
        }
        Ok(())
    }
}

impl Table for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn all(&self) -> StorageResult<Vec<StoredRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn get(&self, key: &str) -> StorageResult<Option<StoredRecord>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn put_many(&self, records: Vec<StoredRecord>) -> StorageResult<()> {
        self.check_writable()?;
        let mut map = self.records.write();
        for record in records {
            map.insert(record.key.clone(), record);
        }
        Ok(())
    }

    fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        self.check_writable()?;
        let mut map = self.records.write();
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.check_writable()?;
        self.records.write().clear();
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.records.read().len())
    }
}

/// A table persisted as a [`RecordLog`].
#[derive(Debug)]
pub struct LogTable<B: StorageBackend> {
    name: String,
    log: Mutex<RecordLog<B>>,
}

impl<B: StorageBackend> LogTable<B> {
    /// Replays `backend` into a table.
    pub fn open(name: impl Into<String>, backend: B, config: LogConfig) -> StorageResult<Self> {
        Ok(Self {
            name: name.into(),
            log: Mutex::new(RecordLog::open(backend, config)?),
        })
    }

    /// Entries in the log that no longer describe a live record.
    #[must_use]
    pub fn dead_entries(&self) -> usize {
        self.log.lock().dead_entries()
    }
}

impl<B: StorageBackend> Table for LogTable<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn all(&self) -> StorageResult<Vec<StoredRecord>> {
        Ok(self.log.lock().records().cloned().collect())
    }

    fn get(&self, key: &str) -> StorageResult<Option<StoredRecord>> {
        Ok(self.log.lock().get(key).cloned())
    }

    fn put_many(&self, records: Vec<StoredRecord>) -> StorageResult<()> {
        self.log
            .lock()
            .write(records.into_iter().map(LogEntry::Put).collect())
    }

    fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        let mut log = self.log.lock();
        let batch: Vec<_> = keys
            .iter()
            .filter(|key| log.get(key).is_some())
            .map(|key| LogEntry::Delete(key.clone()))
            .collect();
        log.write(batch)
    }

    fn clear(&self) -> StorageResult<()> {
        let mut log = self.log.lock();
        if log.is_empty() {
            return Ok(());
        }
        log.write(vec![LogEntry::Clear])
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.log.lock().len())
    }

    fn compact(&self) -> StorageResult<()> {
        self.log.lock().compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn exercise(table: &dyn Table) {
        table.put(StoredRecord::created("b", json!(2))).unwrap();
        table
            .put_many(vec![
                StoredRecord::pristine("a", json!(1)),
                StoredRecord::tombstone("c", json!(3)),
            ])
            .unwrap();
        assert_eq!(table.len().unwrap(), 3);

        let keys: Vec<_> = table.all().unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(table.get("c").unwrap().unwrap().deleted_locally);

        table.delete("b").unwrap();
        table.delete("missing").unwrap();
        assert!(table.get("b").unwrap().is_none());

        table.delete_many(&["a".into(), "c".into()]).unwrap();
        assert!(table.is_empty().unwrap());

        table.put(StoredRecord::pristine("z", json!(0))).unwrap();
        table.clear().unwrap();
        assert_eq!(table.len().unwrap(), 0);
    }

    #[test]
    fn memory_table_operations() {
        exercise(&MemoryTable::new("tags"));
    }

    #[test]
    fn log_table_operations() {
        let table = LogTable::open("tags", InMemoryBackend::new(), LogConfig::new()).unwrap();
        exercise(&table);
        assert_eq!(table.name(), "tags");
    }

    #[test]
    fn failing_memory_table_rejects_writes() {
        let table = MemoryTable::with_records("tags", vec![StoredRecord::pristine("a", json!(1))]);
        table.set_failing(true);
        assert!(table.put(StoredRecord::pristine("b", json!(2))).is_err());
        assert!(table.clear().is_err());
        assert_eq!(table.len().unwrap(), 1);
    }

    #[test]
    fn log_table_compacts_on_demand() {
        let backend = InMemoryBackend::new();
        let table = LogTable::open("t", backend.clone(), LogConfig::new().without_compaction()).unwrap();
        for n in 0..4 {
            table.put(StoredRecord::pristine("k", json!(n))).unwrap();
        }
        assert_eq!(table.dead_entries(), 3);
        let before = backend.data().len();

        table.compact().unwrap();
        assert_eq!(table.dead_entries(), 0);
        assert!(backend.data().len() < before);
    }

    #[test]
    fn tables_are_object_safe() {
        let tables: Vec<Arc<dyn Table>> = vec![
            Arc::new(MemoryTable::new("m")),
            Arc::new(LogTable::open("l", InMemoryBackend::new(), LogConfig::new()).unwrap()),
        ];
        for table in tables {
            table.put(StoredRecord::pristine("k", json!(null))).unwrap();
            assert_eq!(table.len().unwrap(), 1);
        }
    }
}
