//! Byte backends underneath table logs.

use crate::error::StorageResult;

/// An opaque byte store holding one table log.
///
/// Backends never interpret their content; framing and replay belong to
/// [`crate::RecordLog`]. Offsets returned by `append` stay valid until the
/// backend is truncated or replaced.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] when the range is not
    /// fully inside the backend.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes appended bytes to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Current size in bytes, which is also the next append offset.
    fn size(&self) -> StorageResult<u64>;

    /// Makes appended bytes and metadata durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the backend down to `new_size` bytes.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole content.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }

    /// Replaces the whole content with `data`.
    ///
    /// Used by log compaction. Implementations that can swap content
    /// atomically should override this.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.truncate(0)?;
        self.append(data)?;
        self.sync()
    }
}
