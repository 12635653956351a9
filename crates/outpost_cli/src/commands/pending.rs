//! Pending command implementation.

use crate::commands::open_existing;
use crate::error::CliResult;
use outpost_storage::{DeviceDatabase, StoredRecord};
use std::path::Path;

/// Runs the pending command.
pub fn run(path: &Path, table: Option<&str>) -> CliResult<()> {
    let db = open_existing(path)?;
    let pending = collect(&db, table)?;

    if pending.is_empty() {
        println!("No pending work");
        return Ok(());
    }
    for (table, records) in &pending {
        println!("{} ({} records)", table, records.len());
        for record in records {
            println!("  [{}] {}", flag(record), record.key);
        }
    }
    Ok(())
}

/// Records owing work to the server, grouped by table. Tables without
/// pending work are left out.
pub fn collect(db: &DeviceDatabase, table: Option<&str>) -> CliResult<Vec<(String, Vec<StoredRecord>)>> {
    let names = match table {
        Some(name) => vec![name.to_string()],
        None => db.table_names()?,
    };
    let mut pending = Vec::new();
    for name in names {
        let mut records: Vec<StoredRecord> = db
            .table(&name)?
            .all()?
            .into_iter()
            .filter(StoredRecord::has_pending_work)
            .collect();
        if records.is_empty() {
            continue;
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        pending.push((name, records));
    }
    Ok(pending)
}

fn flag(record: &StoredRecord) -> &'static str {
    if record.created_locally {
        "created"
    } else if record.deleted_locally {
        "deleted"
    } else {
        "updated"
    }
}
