//! Dependencies command implementation.

use crate::commands::open_existing;
use crate::error::CliResult;
use outpost_store::DependenciesService;
use std::path::Path;

/// Runs the dependencies command.
pub fn run(path: &Path) -> CliResult<()> {
    let db = open_existing(path)?;
    let records = DependenciesService::open(&db)?.pending(None)?;

    if records.is_empty() {
        println!("No dependencies");
        return Ok(());
    }
    for record in &records {
        println!("{}", record.key);
        for operation in &record.operations {
            println!("  {:?} waits for:", operation.operation);
            for target in &operation.dependencies {
                println!(
                    "    {:?} of {} in {}",
                    target.operation, target.item_key, target.store_name
                );
            }
        }
    }
    Ok(())
}
