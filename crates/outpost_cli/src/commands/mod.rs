//! CLI command implementations.

pub mod compact;
pub mod dependencies;
pub mod inspect;
pub mod pending;

use crate::error::{CliError, CliResult};
use outpost_storage::DeviceDatabase;
use std::path::Path;

/// Opens an existing device database. Unlike [`DeviceDatabase::open`]
/// this never creates the directory.
pub fn open_existing(path: &Path) -> CliResult<DeviceDatabase> {
    if !path.is_dir() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    Ok(DeviceDatabase::open(path)?)
}

/// Total size of the files directly inside `path`.
pub fn dir_size(path: &Path) -> CliResult<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let metadata = entry?.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Human readable byte count.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        assert!(matches!(open_existing(&path), Err(CliError::NotFound(_))));
        assert!(!path.exists());
    }

    #[test]
    fn sizes_are_readable() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
