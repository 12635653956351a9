//! Stored records and the framing of table log entries.
//!
//! Every entry in a table log has the layout:
//!
//! ```text
//! | magic "OPRL" (4) | kind (1) | payload len (4, LE) | CBOR payload | crc32 (4, LE) |
//! ```
//!
//! The checksum covers kind, length and payload.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};

/// Magic bytes opening every log entry.
pub const ENTRY_MAGIC: [u8; 4] = *b"OPRL";

const HEADER_LEN: usize = 4 + 1 + 4;
const TRAILER_LEN: usize = 4;

/// One row of a device table.
///
/// A record is pristine or carries exactly the flags describing the work
/// still owed to the server. `created_locally` and `deleted_locally` are
/// never both set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// Identity key of the entity (`<uuid>#<owner>` for owned stores).
    pub key: String,
    /// The entity DTO.
    pub item: serde_json::Value,
    /// The server has never seen this entity.
    #[serde(default)]
    pub created_locally: bool,
    /// Tombstone: deleted on the device, not yet on the server.
    #[serde(default)]
    pub deleted_locally: bool,
    /// Changed on the device after the server confirmed it.
    #[serde(default)]
    pub updated_locally: bool,
}

impl StoredRecord {
    /// A record mirroring server state.
    pub fn pristine(key: impl Into<String>, item: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            item,
            created_locally: false,
            deleted_locally: false,
            updated_locally: false,
        }
    }

    /// A record for an entity created on the device.
    pub fn created(key: impl Into<String>, item: serde_json::Value) -> Self {
        Self {
            created_locally: true,
            ..Self::pristine(key, item)
        }
    }

    /// A record for a server entity changed on the device.
    pub fn updated(key: impl Into<String>, item: serde_json::Value) -> Self {
        Self {
            updated_locally: true,
            ..Self::pristine(key, item)
        }
    }

    /// A tombstone for a server entity deleted on the device.
    pub fn tombstone(key: impl Into<String>, item: serde_json::Value) -> Self {
        Self {
            deleted_locally: true,
            ..Self::pristine(key, item)
        }
    }

    /// Whether the record still owes anything to the server.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        self.created_locally || self.deleted_locally || self.updated_locally
    }
}

/// Kind byte of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    /// Insert or overwrite a record.
    Put = 1,
    /// Remove a record by key.
    Delete = 2,
    /// Remove every record.
    Clear = 3,
}

impl EntryKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Delete),
            3 => Some(Self::Clear),
            _ => None,
        }
    }
}

/// A mutation recorded in a table log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// Insert or overwrite a record.
    Put(StoredRecord),
    /// Remove the record with this key.
    Delete(String),
    /// Remove every record.
    Clear,
}

impl LogEntry {
    /// Kind byte of this entry.
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Put(_) => EntryKind::Put,
            Self::Delete(_) => EntryKind::Delete,
            Self::Clear => EntryKind::Clear,
        }
    }

    /// Appends the framed entry to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Codec`] if the payload cannot be encoded or
    /// does not fit a 32-bit length.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> StorageResult<()> {
        let mut payload = Vec::new();
        match self {
            Self::Put(record) => {
                ciborium::into_writer(record, &mut payload).map_err(StorageError::codec)?
            }
            Self::Delete(key) => {
                ciborium::into_writer(key, &mut payload).map_err(StorageError::codec)?
            }
            Self::Clear => {}
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::codec(format!("entry of {} bytes", payload.len())))?;

        let start = out.len();
        out.extend_from_slice(&ENTRY_MAGIC);
        out.push(self.kind() as u8);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&payload);
        let crc = compute_crc32(&out[start + ENTRY_MAGIC.len()..]);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    /// Decodes the entry at the start of `bytes`.
    ///
    /// Returns the entry and the number of bytes it occupies.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] when the bytes are incomplete or
    /// fail the magic or checksum checks, [`StorageError::Codec`] when the
    /// payload is not a valid record.
    pub fn decode(bytes: &[u8]) -> StorageResult<(Self, usize)> {
        if bytes.len() < HEADER_LEN {
            return Err(StorageError::corrupted(format!(
                "incomplete entry header: {} bytes",
                bytes.len()
            )));
        }
        if bytes[..4] != ENTRY_MAGIC {
            return Err(StorageError::corrupted("bad entry magic"));
        }
        let kind = EntryKind::from_byte(bytes[4])
            .ok_or_else(|| StorageError::corrupted(format!("unknown entry kind {}", bytes[4])))?;
        let len = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
        let total = HEADER_LEN + len + TRAILER_LEN;
        if bytes.len() < total {
            return Err(StorageError::corrupted(format!(
                "incomplete entry: need {total} bytes, have {}",
                bytes.len()
            )));
        }

        let body_end = HEADER_LEN + len;
        let stored = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        let actual = compute_crc32(&bytes[4..body_end]);
        if stored != actual {
            return Err(StorageError::corrupted(format!(
                "checksum mismatch: stored {stored:#010x}, computed {actual:#010x}"
            )));
        }

        let payload = &bytes[HEADER_LEN..body_end];
        let entry = match kind {
            EntryKind::Put => Self::Put(ciborium::from_reader(payload).map_err(StorageError::codec)?),
            EntryKind::Delete => {
                Self::Delete(ciborium::from_reader(payload).map_err(StorageError::codec)?)
            }
            EntryKind::Clear => Self::Clear,
        };
        Ok((entry, total))
    }
}

/// CRC32 (IEEE polynomial) of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}
