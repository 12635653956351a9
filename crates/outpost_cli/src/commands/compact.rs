//! Compact command implementation.

use crate::commands::{dir_size, format_size, open_existing};
use crate::error::CliResult;
use std::path::Path;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Tables rewritten.
    pub tables: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Compacting tables at {:?}", path);
    let stats = compact(path)?;

    let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
    println!("  Tables:      {}", stats.tables);
    println!("  Size before: {}", format_size(stats.bytes_before));
    println!("  Size after:  {}", format_size(stats.bytes_after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(saved),
        if stats.bytes_before > 0 {
            saved as f64 / stats.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
    Ok(())
}

/// Rewrites every table log of the database in `path`.
pub fn compact(path: &Path) -> CliResult<CompactStats> {
    let db = open_existing(path)?;
    let bytes_before = dir_size(path)?;
    let tables = db.table_names()?.len();
    db.compact_all()?;
    db.close();
    Ok(CompactStats {
        tables,
        bytes_before,
        bytes_after: dir_size(path)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_storage::{DeviceDatabase, StoredRecord};
    use serde_json::json;

    #[test]
    fn rewriting_drops_overwritten_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = DeviceDatabase::open(dir.path()).unwrap();
            let tags = db.table("tags").unwrap();
            for i in 0..50 {
                tags.put(StoredRecord::created("t1#a", json!({ "name": format!("rev {i}") })))
                    .unwrap();
            }
            db.close();
        }

        let stats = compact(dir.path()).unwrap();
        assert!(stats.bytes_after < stats.bytes_before);

        let db = DeviceDatabase::open(dir.path()).unwrap();
        let records = db.table("tags").unwrap().all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].item["name"], "rev 49");
    }
}
