//! File cache in front of the engine
//!
//! Read entries keep a buffered window of file content; write entries keep
//! an append-only buffer that is flushed to the engine on sync/close and on
//! buffer pressure. Total resident bytes are bounded by the configured
//! capacity: victims are reclaimed least-recently-used first among
//! normal-priority entries, and high-priority entries are touched only once
//! no normal entry remains evictable.

use crate::handle::{CachedReader, CachedWriter};
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tidefs_common::{CacheConfig, Result};
use tidefs_engine::{EngineFile, OpenFlags};
use tidefs_reactor::{CallSlot, EngineClient};
use tracing::{debug, warn};

/// Eviction priority of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Priority {
    Normal = 0,
    High = 1,
}

impl Priority {
    fn from_u8(v: u8) -> Self {
        if v == 1 { Self::High } else { Self::Normal }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Reads served from a resident window
    pub hits: AtomicU64,
    /// Window refills and engine opens
    pub misses: AtomicU64,
    /// Entries reclaimed under capacity pressure
    pub evictions: AtomicU64,
    /// Write-buffer flushes to the engine
    pub flushes: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

/// Entry payload, guarded by the entry mutex.
pub(crate) enum EntryKind {
    Read {
        window_off: u64,
        window: Bytes,
        file_len: u64,
    },
    Write {
        buf: BytesMut,
        /// Bytes already written to the engine; the next flush lands here.
        flushed: u64,
        /// Logical append position, monotonically increasing.
        logical: u64,
    },
}

pub(crate) struct CacheEntry {
    pub(crate) file: EngineFile,
    pub(crate) name: String,
    pub(crate) kind: EntryKind,
}

/// LRU bookkeeping readable without the entry mutex.
pub(crate) struct EntryMeta {
    pub(crate) last_access: AtomicU64,
    pub(crate) priority: AtomicU8,
    pub(crate) resident: AtomicU64,
}

pub(crate) struct EntrySlot {
    pub(crate) meta: EntryMeta,
    pub(crate) state: Mutex<CacheEntry>,
}

/// Read-through / write-back cache keyed per handle.
pub struct FileCache {
    client: EngineClient,
    config: CacheConfig,
    entries: RwLock<HashMap<u64, Arc<EntrySlot>>>,
    next_id: AtomicU64,
    clock: AtomicU64,
    resident: AtomicU64,
    stats: CacheStats,
}

impl FileCache {
    pub fn new(client: EngineClient, config: CacheConfig) -> Self {
        Self {
            client,
            config,
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            resident: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    /// Open `name` for reading. The engine open counts as the miss that
    /// populates the entry; subsequent in-window reads are hits.
    pub fn open_read(cache: &Arc<Self>, slot: &mut CallSlot, name: &str) -> Result<CachedReader> {
        let (file, len) = cache.client.open(slot, name, OpenFlags::default())?;
        cache.stats.misses.fetch_add(1, Ordering::Relaxed);
        let (id, entry) = cache.register(CacheEntry {
            file,
            name: name.to_string(),
            kind: EntryKind::Read {
                window_off: 0,
                window: Bytes::new(),
                file_len: len,
            },
        });
        Ok(CachedReader::new(Arc::clone(cache), id, entry, len))
    }

    /// Open `name` for writing, creating it and starting from length zero.
    pub fn open_write(cache: &Arc<Self>, slot: &mut CallSlot, name: &str) -> Result<CachedWriter> {
        let (file, len) = cache.client.open(slot, name, OpenFlags::CREATE)?;
        if len > 0 {
            cache.client.truncate(slot, file, 0)?;
        }
        let (id, entry) = cache.register(CacheEntry {
            file,
            name: name.to_string(),
            kind: EntryKind::Write {
                buf: BytesMut::new(),
                flushed: 0,
                logical: 0,
            },
        });
        Ok(CachedWriter::new(Arc::clone(cache), id, entry))
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident.load(Ordering::Relaxed)
    }

    pub(crate) fn client(&self) -> &EngineClient {
        &self.client
    }

    pub(crate) fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Advance the logical clock and stamp `meta` with it.
    pub(crate) fn touch(&self, meta: &EntryMeta) {
        let clock = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        meta.last_access.store(clock, Ordering::Relaxed);
    }

    pub(crate) fn add_resident(&self, meta: &EntryMeta, bytes: u64) {
        meta.resident.fetch_add(bytes, Ordering::Relaxed);
        self.resident.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn sub_resident(&self, meta: &EntryMeta, bytes: u64) {
        meta.resident.fetch_sub(bytes, Ordering::Relaxed);
        self.resident.fetch_sub(bytes, Ordering::Relaxed);
    }

    fn register(&self, entry: CacheEntry) -> (u64, Arc<EntrySlot>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let slot = Arc::new(EntrySlot {
            meta: EntryMeta {
                last_access: AtomicU64::new(0),
                priority: AtomicU8::new(Priority::Normal as u8),
                resident: AtomicU64::new(0),
            },
            state: Mutex::new(entry),
        });
        self.touch(&slot.meta);
        self.entries.write().insert(id, Arc::clone(&slot));
        (id, slot)
    }

    /// Drop an entry from the registry, releasing its resident bytes.
    pub(crate) fn remove(&self, id: u64) {
        if let Some(slot) = self.entries.write().remove(&id) {
            let resident = slot.meta.resident.swap(0, Ordering::Relaxed);
            self.resident.fetch_sub(resident, Ordering::Relaxed);
        }
    }

    /// Flush a write entry's buffered bytes to the engine.
    ///
    /// On failure the buffer is restored intact and the error surfaces to
    /// the caller; nothing is retried here.
    pub(crate) fn flush_entry(
        &self,
        slot: &mut CallSlot,
        state: &mut CacheEntry,
        meta: &EntryMeta,
    ) -> Result<()> {
        let EntryKind::Write { buf, flushed, .. } = &mut state.kind else {
            return Ok(());
        };
        if buf.is_empty() {
            return Ok(());
        }

        let data = buf.split().freeze();
        match self.client.write(slot, state.file, data.clone(), *flushed) {
            Ok(()) => {
                *flushed += data.len() as u64;
                self.sub_resident(meta, data.len() as u64);
                self.stats.flushes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                let mut restored = BytesMut::with_capacity(data.len() + buf.len());
                restored.extend_from_slice(&data);
                restored.extend_from_slice(buf);
                *buf = restored;
                Err(e)
            }
        }
    }

    /// Reclaim entries until resident bytes fit the configured capacity.
    ///
    /// Victim order: least-recently-used among Normal entries first; High
    /// entries only once no Normal entry holds resident bytes. Eviction is
    /// housekeeping: a victim whose flush fails is left dirty with a
    /// warning, and the sweep stops rather than spin on it.
    pub(crate) fn enforce_capacity(&self, slot: &mut CallSlot) {
        while self.resident.load(Ordering::Relaxed) > self.config.capacity_bytes {
            let victim = self
                .pick_victim(Priority::Normal)
                .or_else(|| self.pick_victim(Priority::High));
            let Some((id, entry)) = victim else {
                break;
            };
            let Some(mut state) = entry.state.try_lock() else {
                // Owner mid-call; revisit on the next sweep.
                debug!(id, "eviction victim busy, deferring sweep");
                break;
            };

            let victim = &mut *state;
            if let EntryKind::Read { window, .. } = &mut victim.kind {
                let dropped = window.len() as u64;
                *window = Bytes::new();
                self.sub_resident(&entry.meta, dropped);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(id, name = %victim.name, dropped, "evicted read window");
            } else {
                let name = victim.name.clone();
                match self.flush_entry(slot, victim, &entry.meta) {
                    Ok(()) => {
                        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                        debug!(id, name = %name, "evicted write buffer");
                    }
                    Err(e) => {
                        warn!(id, name = %name, error = %e, "eviction flush failed");
                        break;
                    }
                }
            }
        }
    }

    /// Least-recently-used entry with resident bytes at the given priority.
    fn pick_victim(&self, priority: Priority) -> Option<(u64, Arc<EntrySlot>)> {
        let entries = self.entries.read();
        let mut victim: Option<(u64, u64)> = None;

        for (id, slot) in entries.iter() {
            if slot.meta.resident.load(Ordering::Relaxed) == 0 {
                continue;
            }
            if Priority::from_u8(slot.meta.priority.load(Ordering::Relaxed)) != priority {
                continue;
            }
            let access = slot.meta.last_access.load(Ordering::Relaxed);
            match victim {
                None => victim = Some((*id, access)),
                Some((_, min_access)) if access < min_access => victim = Some((*id, access)),
                _ => {}
            }
        }

        victim.map(|(id, _)| (id, Arc::clone(&entries[&id])))
    }
}
