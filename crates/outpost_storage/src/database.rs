//! The per-user device database.
//!
//! ```text
//! <db_path>/
//! ├─ LOCK            # advisory lock, one process per directory
//! ├─ _meta.tbl       # table versions
//! ├─ dependencies.tbl
//! └─ <table>.tbl     # one record log per store
//! ```

use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::log::LogConfig;
use crate::record::StoredRecord;
use crate::table::{LogTable, MemoryTable, Table};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const LOCK_FILE: &str = "LOCK";
const TABLE_EXTENSION: &str = "tbl";

/// Name of the table holding database metadata.
pub const META_TABLE: &str = "_meta";

#[derive(Debug)]
enum Location {
    Memory,
    Dir(PathBuf),
}

/// The set of tables belonging to one signed-in user on this device.
///
/// Tables are opened on first use and cached, so every caller asking for the
/// same name shares one handle.
pub struct DeviceDatabase {
    location: Location,
    config: LogConfig,
    tables: Mutex<HashMap<String, Arc<dyn Table>>>,
    lock: Mutex<Option<File>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for DeviceDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDatabase")
            .field("location", &self.location)
            .field("open_tables", &self.tables.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DeviceDatabase {
    /// Opens (creating if needed) the database stored in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] when another process holds the
    /// directory.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        Self::open_with_config(dir, LogConfig::default())
    }

    /// Opens the database in `dir` with explicit log settings.
    pub fn open_with_config(dir: &Path, config: LogConfig) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }
        tracing::debug!(path = %dir.display(), "opened device database");

        Ok(Self {
            location: Location::Dir(dir.to_path_buf()),
            config,
            tables: Mutex::new(HashMap::new()),
            lock: Mutex::new(Some(lock_file)),
            closed: AtomicBool::new(false),
        })
    }

    /// Creates a database whose tables live in memory.
    #[must_use]
    pub fn open_in_memory() -> Self {
        Self {
            location: Location::Memory,
            config: LogConfig::default(),
            tables: Mutex::new(HashMap::new()),
            lock: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Directory of the database, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::Memory => None,
            Location::Dir(path) => Some(path),
        }
    }

    /// The table called `name`, opened on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] after [`close`](Self::close) and
    /// [`StorageError::InvalidTableName`] for names that cannot be file names.
    pub fn table(&self, name: &str) -> StorageResult<Arc<dyn Table>> {
        self.ensure_open()?;
        validate_table_name(name)?;

        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table));
        }
        let table: Arc<dyn Table> = match &self.location {
            Location::Memory => Arc::new(MemoryTable::new(name)),
            Location::Dir(dir) => {
                let path = dir.join(format!("{name}.{TABLE_EXTENSION}"));
                let backend = FileBackend::open(&path)?;
                Arc::new(LogTable::open(name, backend, self.config.clone())?)
            }
        };
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Names of every table of the database, sorted.
    ///
    /// For directory databases this includes tables not opened yet.
    pub fn table_names(&self) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        if let Location::Dir(dir) = &self.location {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(TABLE_EXTENSION) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Schema version recorded for `table`, 0 when never set.
    pub fn table_version(&self, table: &str) -> StorageResult<u32> {
        let meta = self.table(META_TABLE)?;
        let version = meta
            .get(&version_key(table))?
            .and_then(|record| record.item.as_u64())
            .unwrap_or(0);
        u32::try_from(version).map_err(StorageError::codec)
    }

    /// Records the schema version of `table`.
    pub fn set_table_version(&self, table: &str, version: u32) -> StorageResult<()> {
        self.table(META_TABLE)?
            .put(StoredRecord::pristine(version_key(table), version.into()))
    }

    /// Compacts every table, opening them as needed.
    pub fn compact_all(&self) -> StorageResult<()> {
        for name in self.table_names()? {
            self.table(&name)?.compact()?;
        }
        Ok(())
    }

    /// Drops cached tables and releases the directory lock.
    ///
    /// Later calls to [`table`](Self::table) fail with
    /// [`StorageError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tables.lock().clear();
        if let Some(lock) = self.lock.lock().take() {
            if let Err(err) = FileExt::unlock(&lock) {
                tracing::warn!(error = %err, "failed to release database lock");
            }
        }
        tracing::debug!("closed device database");
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

fn version_key(table: &str) -> String {
    format!("version:{table}")
}

fn validate_table_name(name: &str) -> StorageResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidTableName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn tables_are_cached_per_name() {
        let db = DeviceDatabase::open_in_memory();
        let first = db.table("tags").unwrap();
        first.put(StoredRecord::pristine("k", json!(1))).unwrap();
        let second = db.table("tags").unwrap();
        assert_eq!(second.len().unwrap(), 1);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let db = DeviceDatabase::open_in_memory();
        for name in ["", "../escape", "a/b", ".hidden", "sp ace"] {
            assert!(matches!(
                db.table(name),
                Err(StorageError::InvalidTableName(_))
            ));
        }
        assert!(db.table("trail-tags_v2").is_ok());
    }

    #[test]
    fn table_versions_default_to_zero() {
        let db = DeviceDatabase::open_in_memory();
        assert_eq!(db.table_version("tags").unwrap(), 0);
        db.set_table_version("tags", 3).unwrap();
        assert_eq!(db.table_version("tags").unwrap(), 3);
    }

    #[test]
    fn directory_is_locked_while_open() {
        let dir = tempdir().unwrap();
        let db = DeviceDatabase::open(dir.path()).unwrap();
        assert!(matches!(
            DeviceDatabase::open(dir.path()),
            Err(StorageError::Locked)
        ));
        db.close();
        assert!(DeviceDatabase::open(dir.path()).is_ok());
    }

    #[test]
    fn closed_database_refuses_tables() {
        let db = DeviceDatabase::open_in_memory();
        db.close();
        db.close();
        assert!(matches!(db.table("tags"), Err(StorageError::Closed)));
    }

    #[test]
    fn table_names_include_unopened_files() {
        let dir = tempdir().unwrap();
        {
            let db = DeviceDatabase::open(dir.path()).unwrap();
            db.table("tags").unwrap();
            db.set_table_version("tags", 1).unwrap();
            db.close();
        }
        let db = DeviceDatabase::open(dir.path()).unwrap();
        db.table("trails").unwrap();
        assert_eq!(db.table_names().unwrap(), vec!["_meta", "tags", "trails"]);
        assert_eq!(db.path(), Some(dir.path()));
    }
}
