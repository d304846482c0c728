//! Cached file handles
//!
//! A handle owns its cache entry for the duration of its life. Handles are
//! not meant to be shared across threads without external synchronization;
//! every blocking method takes the calling thread's slot.

use crate::cache::{EntryKind, EntrySlot, FileCache, Priority};
use bytes::{Bytes, BytesMut};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tidefs_common::{Error, Result};
use tidefs_reactor::CallSlot;
use tracing::warn;

/// Read-through handle with a buffered window of file content.
pub struct CachedReader {
    cache: Arc<FileCache>,
    id: u64,
    entry: Arc<EntrySlot>,
    len: u64,
    closed: bool,
}

impl std::fmt::Debug for CachedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedReader")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("closed", &self.closed)
            .finish()
    }
}

impl CachedReader {
    pub(crate) fn new(cache: Arc<FileCache>, id: u64, entry: Arc<EntrySlot>, len: u64) -> Self {
        Self {
            cache,
            id,
            entry,
            len,
            closed: false,
        }
    }

    /// File length as observed at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read up to `len` bytes at `offset`.
    ///
    /// Served from the resident window when possible, refilling it through
    /// the bridge on out-of-window access. Short or empty at end of file,
    /// never an error.
    pub fn read(&self, slot: &mut CallSlot, offset: u64, len: usize) -> Result<Bytes> {
        let mut state = self.entry.state.lock();
        self.cache.touch(&self.entry.meta);

        let entry = &mut *state;
        let EntryKind::Read {
            window_off,
            window,
            file_len,
        } = &mut entry.kind
        else {
            return Err(Error::internal("read on a write entry"));
        };

        if offset >= *file_len {
            return Ok(Bytes::new());
        }
        let len = len.min((*file_len - offset) as usize);

        let in_window =
            offset >= *window_off && offset + len as u64 <= *window_off + window.len() as u64;
        if in_window {
            self.cache.stats().hits.fetch_add(1, Ordering::Relaxed);
            let start = (offset - *window_off) as usize;
            return Ok(window.slice(start..start + len));
        }

        // Refill the window at the requested offset.
        self.cache.stats().misses.fetch_add(1, Ordering::Relaxed);
        let want = len
            .max(self.cache.config().read_window_bytes)
            .min((*file_len - offset) as usize);
        let (buf, n) =
            self.cache
                .client()
                .read(slot, entry.file, BytesMut::with_capacity(want), offset, want)?;

        let old = window.len() as u64;
        *window_off = offset;
        *window = buf.freeze().slice(..n);
        let new = window.len() as u64;
        if new > old {
            self.cache.add_resident(&self.entry.meta, new - old);
        } else {
            self.cache.sub_resident(&self.entry.meta, old - new);
        }

        let serve = len.min(n);
        let result = window.slice(..serve);
        drop(state);

        self.cache.enforce_capacity(slot);
        Ok(result)
    }

    /// Cache-invalidation hint. Accepted but intentionally a no-op: the
    /// window is refreshed on the next out-of-window access anyway.
    pub fn invalidate(&self, _offset: u64, _len: usize) {}

    /// Release the engine handle and the cache entry.
    pub fn close(&mut self, slot: &mut CallSlot) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let file = self.entry.state.lock().file;
        self.cache.client().close(slot, file)?;
        self.cache.remove(self.id);
        self.closed = true;
        Ok(())
    }
}

impl Drop for CachedReader {
    fn drop(&mut self) {
        if !self.closed {
            let name = self.entry.state.lock().name.clone();
            warn!(name = %name, "reader dropped without close; engine handle leaks");
            self.cache.remove(self.id);
        }
    }
}

/// Write-back handle accumulating appends in a buffer.
pub struct CachedWriter {
    cache: Arc<FileCache>,
    id: u64,
    entry: Arc<EntrySlot>,
    closed: bool,
}

impl CachedWriter {
    pub(crate) fn new(cache: Arc<FileCache>, id: u64, entry: Arc<EntrySlot>) -> Self {
        Self {
            cache,
            id,
            entry,
            closed: false,
        }
    }

    /// Append `data` to the buffer and advance the logical size. No engine
    /// round trip unless the buffer reaches the write-back threshold.
    pub fn append(&self, slot: &mut CallSlot, data: &[u8]) -> Result<()> {
        let mut state = self.entry.state.lock();
        self.cache.touch(&self.entry.meta);

        let EntryKind::Write { buf, logical, .. } = &mut state.kind else {
            return Err(Error::internal("append on a read entry"));
        };

        buf.extend_from_slice(data);
        *logical += data.len() as u64;
        self.cache.add_resident(&self.entry.meta, data.len() as u64);

        if buf.len() >= self.cache.config().writeback_threshold_bytes {
            self.cache.flush_entry(slot, &mut state, &self.entry.meta)?;
        }
        drop(state);

        self.cache.enforce_capacity(slot);
        Ok(())
    }

    /// Flush buffered bytes to the engine.
    pub fn sync(&self, slot: &mut CallSlot) -> Result<()> {
        let mut state = self.entry.state.lock();
        self.cache.flush_entry(slot, &mut state, &self.entry.meta)
    }

    /// Same flush point as `sync`; the engine persists on write.
    pub fn fsync(&self, slot: &mut CallSlot) -> Result<()> {
        self.sync(slot)
    }

    /// Flush, then set the engine file length to `size`.
    pub fn truncate(&self, slot: &mut CallSlot, size: u64) -> Result<()> {
        let mut state = self.entry.state.lock();
        self.cache.flush_entry(slot, &mut state, &self.entry.meta)?;
        self.cache.client().truncate(slot, state.file, size)?;
        let EntryKind::Write { flushed, logical, .. } = &mut state.kind else {
            return Err(Error::internal("truncate on a read entry"));
        };
        *flushed = size;
        *logical = size;
        Ok(())
    }

    /// Extend-only preallocation: grows the engine file to `offset + len`
    /// when that extends it, and never shrinks. The logical append position
    /// is unaffected.
    pub fn allocate(&self, slot: &mut CallSlot, offset: u64, len: u64) -> Result<()> {
        let state = self.entry.state.lock();
        let EntryKind::Write { logical, .. } = &state.kind else {
            return Err(Error::internal("allocate on a read entry"));
        };
        let end = offset + len;
        if end <= *logical {
            return Ok(());
        }
        self.cache.client().truncate(slot, state.file, end)
    }

    /// Mark the entry eviction-exempt until all normal-priority entries are
    /// exhausted. Does not affect flush ordering.
    pub fn set_priority(&self, priority: Priority) {
        self.entry
            .meta
            .priority
            .store(priority as u8, Ordering::Relaxed);
    }

    /// Logical size: flushed plus buffered bytes.
    pub fn file_size(&self) -> u64 {
        match &self.entry.state.lock().kind {
            EntryKind::Write { logical, .. } => *logical,
            EntryKind::Read { file_len, .. } => *file_len,
        }
    }

    /// Bytes currently buffered and not yet flushed.
    pub fn buffered_bytes(&self) -> u64 {
        self.entry.meta.resident.load(Ordering::Relaxed)
    }

    /// Flush remaining bytes, release the engine handle, destroy the entry.
    pub fn close(&mut self, slot: &mut CallSlot) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let mut state = self.entry.state.lock();
        self.cache.flush_entry(slot, &mut state, &self.entry.meta)?;
        let file = state.file;
        drop(state);
        self.cache.client().close(slot, file)?;
        self.cache.remove(self.id);
        self.closed = true;
        Ok(())
    }
}

impl Drop for CachedWriter {
    fn drop(&mut self) {
        if !self.closed {
            let state = self.entry.state.lock();
            let buffered = match &state.kind {
                EntryKind::Write { buf, .. } => buf.len(),
                EntryKind::Read { .. } => 0,
            };
            warn!(
                name = %state.name,
                buffered,
                "writer dropped without close; buffered bytes discarded"
            );
            drop(state);
            self.cache.remove(self.id);
        }
    }
}
