//! Env file handles
//!
//! Each handle routes to the managed (cached, engine-backed) implementation
//! or the POSIX fallback, decided once at open time by the adapter.

use crate::posix::{PosixLock, PosixRandom, PosixSequential, PosixWritable};
use bytes::Bytes;
use tidefs_cache::{CachedReader, CachedWriter, Priority};
use tidefs_common::Result;
use tidefs_engine::EngineFile;
use tidefs_reactor::CallSlot;

/// File read sequentially from a cursor.
pub enum SequentialFile {
    Managed { reader: CachedReader, offset: u64 },
    Posix(PosixSequential),
}

impl std::fmt::Debug for SequentialFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Managed { offset, .. } => {
                f.debug_struct("SequentialFile::Managed").field("offset", offset).finish()
            }
            Self::Posix(_) => f.write_str("SequentialFile::Posix"),
        }
    }
}

impl SequentialFile {
    /// Read up to `n` bytes and advance the cursor by the bytes actually
    /// read. Short or empty at end of file, never an error.
    pub fn read(&mut self, slot: &mut CallSlot, n: usize) -> Result<Bytes> {
        match self {
            Self::Managed { reader, offset } => {
                let data = reader.read(slot, *offset, n)?;
                *offset += data.len() as u64;
                Ok(data)
            }
            Self::Posix(file) => file.read(n),
        }
    }

    /// Advance the cursor by `n` bytes. The cursor only ever moves forward.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        match self {
            Self::Managed { offset, .. } => {
                *offset += n;
                Ok(())
            }
            Self::Posix(file) => file.skip(n),
        }
    }

    /// Cache-invalidation hint; accepted and intentionally a no-op.
    pub fn invalidate_cache(&self, _offset: u64, _len: usize) {}

    pub fn close(&mut self, slot: &mut CallSlot) -> Result<()> {
        match self {
            Self::Managed { reader, .. } => reader.close(slot),
            Self::Posix(_) => Ok(()),
        }
    }
}

/// File read at arbitrary offsets.
pub enum RandomAccessFile {
    Managed(CachedReader),
    Posix(PosixRandom),
}

impl RandomAccessFile {
    /// Read up to `n` bytes at `offset`; short or empty at end of file.
    pub fn read_at(&self, slot: &mut CallSlot, offset: u64, n: usize) -> Result<Bytes> {
        match self {
            Self::Managed(reader) => reader.read(slot, offset, n),
            Self::Posix(file) => file.read_at(offset, n),
        }
    }

    /// Cache-invalidation hint; accepted and intentionally a no-op.
    pub fn invalidate_cache(&self, _offset: u64, _len: usize) {}

    pub fn close(&mut self, slot: &mut CallSlot) -> Result<()> {
        match self {
            Self::Managed(reader) => reader.close(slot),
            Self::Posix(_) => Ok(()),
        }
    }
}

/// Append-only writable file.
pub enum WritableFile {
    Managed(CachedWriter),
    Posix(PosixWritable),
}

impl WritableFile {
    pub fn append(&mut self, slot: &mut CallSlot, data: &[u8]) -> Result<()> {
        match self {
            Self::Managed(writer) => writer.append(slot, data),
            Self::Posix(file) => file.append(data),
        }
    }

    /// No-op: buffering is the cache's job on the managed path and the OS's
    /// on the fallback path.
    pub fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    pub fn sync(&mut self, slot: &mut CallSlot) -> Result<()> {
        match self {
            Self::Managed(writer) => writer.sync(slot),
            Self::Posix(file) => file.sync(),
        }
    }

    pub fn fsync(&mut self, slot: &mut CallSlot) -> Result<()> {
        match self {
            Self::Managed(writer) => writer.fsync(slot),
            Self::Posix(file) => file.fsync(),
        }
    }

    pub fn truncate(&mut self, slot: &mut CallSlot, size: u64) -> Result<()> {
        match self {
            Self::Managed(writer) => writer.truncate(slot, size),
            Self::Posix(file) => file.truncate(size),
        }
    }

    /// Extend-only preallocation; never shrinks the file.
    pub fn allocate(&mut self, slot: &mut CallSlot, offset: u64, len: u64) -> Result<()> {
        match self {
            Self::Managed(writer) => writer.allocate(slot, offset, len),
            Self::Posix(file) => file.allocate(offset, len),
        }
    }

    /// Raise the cache priority of the backing entry. Ignored on the
    /// fallback path, which has no cache entry.
    pub fn set_io_priority(&self, priority: Priority) {
        if let Self::Managed(writer) = self {
            writer.set_priority(priority);
        }
    }

    /// Logical file size, including bytes still buffered.
    pub fn file_size(&self) -> Result<u64> {
        match self {
            Self::Managed(writer) => Ok(writer.file_size()),
            Self::Posix(file) => file.file_size(),
        }
    }

    /// Flush remaining bytes and release the handle.
    pub fn close(&mut self, slot: &mut CallSlot) -> Result<()> {
        match self {
            Self::Managed(writer) => writer.close(slot),
            Self::Posix(_) => Ok(()),
        }
    }
}

/// Directory handle, only good for `fsync`.
pub enum Directory {
    /// Engine metadata is durable per operation; nothing to sync.
    Managed,
    Posix(std::fs::File),
}

impl Directory {
    pub fn fsync(&self) -> Result<()> {
        match self {
            Self::Managed => Ok(()),
            Self::Posix(file) => {
                file.sync_all()?;
                Ok(())
            }
        }
    }
}

/// Opaque token proving a lock is held.
pub enum FileLock {
    /// Engine handle held open as the lock token.
    Managed { file: EngineFile, name: String },
    Posix(PosixLock),
}
