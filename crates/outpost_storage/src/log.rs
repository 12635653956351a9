//! Append-only record log backing one table.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::record::{LogEntry, StoredRecord};
use std::collections::BTreeMap;

/// Compaction settings for record logs.
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Share of dead entries above which the log is rewritten.
    pub compaction_ratio: f64,
    /// Logs with fewer entries than this are never compacted automatically.
    pub min_compaction_entries: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            compaction_ratio: 0.5,
            min_compaction_entries: 256,
        }
    }
}

impl LogConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the dead entry ratio that triggers compaction.
    #[must_use]
    pub fn with_compaction_ratio(mut self, ratio: f64) -> Self {
        self.compaction_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Sets the minimum number of entries before automatic compaction.
    #[must_use]
    pub fn with_min_compaction_entries(mut self, entries: usize) -> Self {
        self.min_compaction_entries = entries;
        self
    }

    /// Disables automatic compaction.
    #[must_use]
    pub fn without_compaction(mut self) -> Self {
        self.min_compaction_entries = usize::MAX;
        self
    }
}

/// Records of one table: a replayed index over an append-only entry log.
///
/// Writes append framed entries; the live view is a `BTreeMap` rebuilt at
/// open. A damaged tail (torn write, checksum mismatch) is cut off during
/// replay so later appends extend a valid log.
#[derive(Debug)]
pub struct RecordLog<B: StorageBackend> {
    backend: B,
    index: BTreeMap<String, StoredRecord>,
    entries: usize,
    config: LogConfig,
}

impl<B: StorageBackend> RecordLog<B> {
    /// Replays `backend` and returns the log positioned after its last
    /// valid entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or truncated.
    pub fn open(mut backend: B, config: LogConfig) -> StorageResult<Self> {
        let bytes = backend.read_all()?;
        let mut index = BTreeMap::new();
        let mut entries = 0;
        let mut offset = 0;

        while offset < bytes.len() {
            match LogEntry::decode(&bytes[offset..]) {
                Ok((entry, used)) => {
                    apply(&mut index, entry);
                    entries += 1;
                    offset += used;
                }
                Err(err) => {
                    tracing::warn!(
                        offset,
                        dropped = bytes.len() - offset,
                        error = %err,
                        "discarding damaged table log tail"
                    );
                    backend.truncate(offset as u64)?;
                    backend.sync()?;
                    break;
                }
            }
        }

        Ok(Self {
            backend,
            index,
            entries,
            config,
        })
    }

    /// The record stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&StoredRecord> {
        self.index.get(key)
    }

    /// Live records ordered by key.
    pub fn records(&self) -> impl Iterator<Item = &StoredRecord> {
        self.index.values()
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the log holds no live record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entries in the log that no longer describe a live record.
    #[must_use]
    pub fn dead_entries(&self) -> usize {
        self.entries.saturating_sub(self.index.len())
    }

    /// Size of the log in bytes.
    pub fn byte_size(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    /// Appends `entries` as one write and applies them to the index.
    ///
    /// Nothing is applied when the write fails.
    pub fn write(&mut self, batch: Vec<LogEntry>) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for entry in &batch {
            entry.encode_into(&mut buf)?;
        }
        self.backend.append(&buf)?;
        self.backend.flush()?;

        self.entries += batch.len();
        for entry in batch {
            apply(&mut self.index, entry);
        }
        self.maybe_compact()
    }

    /// Rewrites the log so it holds exactly one entry per live record.
    pub fn compact(&mut self) -> StorageResult<()> {
        let mut buf = Vec::new();
        for record in self.index.values() {
            LogEntry::Put(record.clone()).encode_into(&mut buf)?;
        }
        self.backend.replace(&buf)?;
        tracing::debug!(
            live = self.index.len(),
            dropped = self.dead_entries(),
            bytes = buf.len(),
            "compacted table log"
        );
        self.entries = self.index.len();
        Ok(())
    }

    fn maybe_compact(&mut self) -> StorageResult<()> {
        if self.entries < self.config.min_compaction_entries {
            return Ok(());
        }
        let dead_share = self.dead_entries() as f64 / self.entries as f64;
        if dead_share > self.config.compaction_ratio {
            self.compact()?;
        }
        Ok(())
    }

    /// Consumes the log and returns its backend.
    pub fn into_backend(self) -> B {
        self.backend
    }
}

fn apply(index: &mut BTreeMap<String, StoredRecord>, entry: LogEntry) {
    match entry {
        LogEntry::Put(record) => {
            index.insert(record.key.clone(), record);
        }
        LogEntry::Delete(key) => {
            index.remove(&key);
        }
        LogEntry::Clear => index.clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use serde_json::json;

    fn put(key: &str, n: i64) -> LogEntry {
        LogEntry::Put(StoredRecord::pristine(key, json!({ "n": n })))
    }

    fn open(backend: &InMemoryBackend) -> RecordLog<InMemoryBackend> {
        RecordLog::open(backend.clone(), LogConfig::new().without_compaction()).unwrap()
    }

    #[test]
    fn replay_restores_last_state() {
        let backend = InMemoryBackend::new();
        {
            let mut log = open(&backend);
            log.write(vec![put("a", 1), put("b", 1)]).unwrap();
            log.write(vec![put("a", 2), LogEntry::Delete("b".into())]).unwrap();
        }
        let log = open(&backend);
        assert_eq!(log.len(), 1);
        assert_eq!(log.get("a").unwrap().item, json!({"n": 2}));
        assert_eq!(log.dead_entries(), 3);
    }

    #[test]
    fn clear_entry_empties_index() {
        let backend = InMemoryBackend::new();
        let mut log = open(&backend);
        log.write(vec![put("a", 1), LogEntry::Clear, put("c", 1)]).unwrap();
        let keys: Vec<_> = log.records().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["c"]);
    }

    #[test]
    fn torn_tail_is_cut_and_appends_continue() {
        let backend = InMemoryBackend::new();
        {
            let mut log = open(&backend);
            log.write(vec![put("a", 1)]).unwrap();
        }
        let valid_len = backend.data().len();
        let mut torn = Vec::new();
        put("b", 1).encode_into(&mut torn).unwrap();
        torn.truncate(torn.len() / 2);
        let mut raw = backend.clone();
        raw.append(&torn).unwrap();

        let mut log = open(&backend);
        assert_eq!(log.len(), 1);
        assert_eq!(backend.data().len(), valid_len);

        log.write(vec![put("c", 1)]).unwrap();
        drop(log);
        assert_eq!(open(&backend).len(), 2);
    }

    #[test]
    fn failed_write_leaves_index_untouched() {
        let backend = InMemoryBackend::new();
        let mut log = open(&backend);
        log.write(vec![put("a", 1)]).unwrap();
        backend.set_fail_writes(true);
        assert!(log.write(vec![put("a", 2)]).is_err());
        assert_eq!(log.get("a").unwrap().item, json!({"n": 1}));
    }

    #[test]
    fn compaction_drops_dead_entries() {
        let backend = InMemoryBackend::new();
        let config = LogConfig::new()
            .with_min_compaction_entries(8)
            .with_compaction_ratio(0.5);
        let mut log = RecordLog::open(backend.clone(), config).unwrap();
        for n in 0..7 {
            log.write(vec![put("hot", n)]).unwrap();
        }
        assert_eq!(log.dead_entries(), 6);

        log.write(vec![put("hot", 7)]).unwrap();
        assert_eq!(log.dead_entries(), 0);
        drop(log);

        let log = open(&backend);
        assert_eq!(log.get("hot").unwrap().item, json!({"n": 7}));
        assert_eq!(log.dead_entries(), 0);
    }

    #[test]
    fn config_builder() {
        let config = LogConfig::new()
            .with_compaction_ratio(1.5)
            .with_min_compaction_entries(10);
        assert_eq!(config.compaction_ratio, 1.0);
        assert_eq!(config.min_compaction_entries, 10);
    }
}
