//! Inspect command implementation.

use crate::commands::{dir_size, format_size, open_existing};
use crate::error::CliResult;
use outpost_storage::DeviceDatabase;
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Size of the directory in bytes.
    pub total_size: u64,
    /// Per table statistics.
    pub tables: Vec<TableStats>,
}

/// Statistics for a single table.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Schema version recorded by the store.
    pub schema_version: u32,
    /// Number of records, tombstones included.
    pub records: usize,
    /// Records created on the device.
    pub created: usize,
    /// Records changed on the device.
    pub updated: usize,
    /// Tombstones.
    pub deleted: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CliResult<()> {
    let db = open_existing(path)?;
    let result = InspectResult {
        path: path.display().to_string(),
        total_size: dir_size(path)?,
        tables: collect(&db)?,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Statistics of every table of `db`.
pub fn collect(db: &DeviceDatabase) -> CliResult<Vec<TableStats>> {
    let mut tables = Vec::new();
    for name in db.table_names()? {
        let mut stats = TableStats {
            schema_version: db.table_version(&name)?,
            ..TableStats::default()
        };
        for record in db.table(&name)?.all()? {
            stats.records += 1;
            stats.created += usize::from(record.created_locally);
            stats.updated += usize::from(record.updated_locally);
            stats.deleted += usize::from(record.deleted_locally);
        }
        stats.name = name;
        tables.push(stats);
    }
    Ok(tables)
}

fn print_text_output(result: &InspectResult) {
    println!("Outpost Device Database");
    println!("=======================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {}", format_size(result.total_size));
    println!();
    println!("Tables:");
    for table in &result.tables {
        println!(
            "  {} (v{}): {} records, {} created, {} updated, {} deleted",
            table.name, table.schema_version, table.records, table.created, table.updated, table.deleted
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_storage::StoredRecord;
    use serde_json::json;

    #[test]
    fn counts_pending_flags_per_table() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = DeviceDatabase::open(dir.path()).unwrap();
            let tags = db.table("tags").unwrap();
            tags.put(StoredRecord::pristine("t1#a", json!({"uuid": "t1"}))).unwrap();
            tags.put(StoredRecord::created("t2#a", json!({"uuid": "t2"}))).unwrap();
            tags.put(StoredRecord::tombstone("t3#a", json!({"uuid": "t3"}))).unwrap();
            db.set_table_version("tags", 2).unwrap();
            db.close();
        }

        let db = open_existing(dir.path()).unwrap();
        let tables = collect(&db).unwrap();
        let tags = tables.iter().find(|t| t.name == "tags").unwrap();
        assert_eq!(
            *tags,
            TableStats {
                name: "tags".into(),
                schema_version: 2,
                records: 3,
                created: 1,
                updated: 0,
                deleted: 1,
            }
        );
    }
}
