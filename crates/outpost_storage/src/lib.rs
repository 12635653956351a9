//! # Outpost Storage
//!
//! On-device tables for Outpost stores.
//!
//! Every store mirrors its entities into one [`Table`] of [`StoredRecord`]s.
//! A record carries the entity DTO plus the flags describing work still owed
//! to the server (pending create, update or delete), so nothing queued on the
//! device is lost across restarts.
//!
//! ## Layers
//!
//! - [`StorageBackend`]: opaque byte stores ([`InMemoryBackend`],
//!   [`FileBackend`])
//! - [`RecordLog`]: append-only CBOR entry log with CRC32 framing, replayed
//!   into an ordered index at open and compacted when mostly dead
//! - [`Table`]: the key/value view used by stores ([`MemoryTable`],
//!   [`LogTable`])
//! - [`DeviceDatabase`]: one directory per user, one log file per table
//!
//! ## Example
//!
//! ```rust
//! use outpost_storage::{DeviceDatabase, StoredRecord};
//! use serde_json::json;
//!
//! let db = DeviceDatabase::open_in_memory();
//! let tags = db.table("tags").unwrap();
//! tags.put(StoredRecord::created("t1#alice", json!({"name": "summit"}))).unwrap();
//! assert!(tags.get("t1#alice").unwrap().unwrap().created_locally);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod database;
mod error;
mod file;
mod log;
mod memory;
mod record;
mod table;

pub use backend::StorageBackend;
pub use database::{DeviceDatabase, META_TABLE};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use log::{LogConfig, RecordLog};
pub use memory::InMemoryBackend;
pub use record::{compute_crc32, EntryKind, LogEntry, StoredRecord, ENTRY_MAGIC};
pub use table::{LogTable, MemoryTable, Table};
