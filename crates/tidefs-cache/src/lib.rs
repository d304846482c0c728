//! TideFS file cache
//!
//! Read-through window caching and write-back append buffering in front of
//! the engine, with priority-aware LRU eviction bounded by a configured
//! capacity. The cache only reaches the engine through the bridge: on
//! window misses, flushes, and open/close/metadata operations.

pub mod cache;
pub mod handle;

pub use cache::{CacheStats, FileCache, Priority};
pub use handle::{CachedReader, CachedWriter};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tidefs_common::CacheConfig;
    use tidefs_engine::{MemDeviceProvider, MemEngine, MemEngineState};
    use tidefs_reactor::{CallSlot, EngineClient, Lifecycle};

    fn setup(config: CacheConfig) -> (Lifecycle, Arc<FileCache>, MemEngineState) {
        let engine = MemEngine::new();
        let state = engine.state();
        let lifecycle = Lifecycle::start(
            Box::new(MemDeviceProvider::new(1 << 24)),
            Box::new(engine),
            Duration::from_secs(5),
        )
        .unwrap();
        let cache = Arc::new(FileCache::new(
            EngineClient::new(lifecycle.bridge()),
            config,
        ));
        (lifecycle, cache, state)
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let (_lifecycle, cache, _state) = setup(CacheConfig::default());
        let mut slot = CallSlot::new();

        let mut writer = FileCache::open_write(&cache, &mut slot, "x").unwrap();
        writer.append(&mut slot, b"hello").unwrap();
        writer.append(&mut slot, b"world").unwrap();
        assert_eq!(writer.file_size(), 10);
        writer.close(&mut slot).unwrap();

        let mut reader = FileCache::open_read(&cache, &mut slot, "x").unwrap();
        assert_eq!(reader.len(), 10);
        let data = reader.read(&mut slot, 0, 10).unwrap();
        assert_eq!(&data[..], b"helloworld");

        // Past end of file: empty result, no error.
        let tail = reader.read(&mut slot, 10, 1).unwrap();
        assert!(tail.is_empty());
        reader.close(&mut slot).unwrap();
    }

    #[test]
    fn test_append_buffers_until_sync() {
        let (_lifecycle, cache, state) = setup(CacheConfig::default());
        let mut slot = CallSlot::new();

        let mut writer = FileCache::open_write(&cache, &mut slot, "wal").unwrap();
        writer.append(&mut slot, b"buffered").unwrap();

        // Nothing reached the engine yet.
        assert_eq!(state.file_len("wal"), Some(0));
        assert_eq!(writer.buffered_bytes(), 8);

        writer.sync(&mut slot).unwrap();
        assert_eq!(state.file_len("wal"), Some(8));
        assert_eq!(writer.buffered_bytes(), 0);
        writer.close(&mut slot).unwrap();
    }

    #[test]
    fn test_threshold_forces_flush() {
        let config = CacheConfig {
            writeback_threshold_bytes: 16,
            ..CacheConfig::default()
        };
        let (_lifecycle, cache, state) = setup(config);
        let mut slot = CallSlot::new();

        let mut writer = FileCache::open_write(&cache, &mut slot, "big").unwrap();
        writer.append(&mut slot, &[7u8; 20]).unwrap();

        // Buffer crossed the threshold and was flushed without sync.
        assert_eq!(state.file_len("big"), Some(20));
        assert_eq!(writer.buffered_bytes(), 0);
        writer.close(&mut slot).unwrap();
    }

    #[test]
    fn test_window_refill_and_hits() {
        let config = CacheConfig {
            read_window_bytes: 8,
            ..CacheConfig::default()
        };
        let (_lifecycle, cache, _state) = setup(config);
        let mut slot = CallSlot::new();

        let mut writer = FileCache::open_write(&cache, &mut slot, "seq").unwrap();
        let payload: Vec<u8> = (0..32u8).collect();
        writer.append(&mut slot, &payload).unwrap();
        writer.close(&mut slot).unwrap();

        let mut reader = FileCache::open_read(&cache, &mut slot, "seq").unwrap();
        // First read fills the window at offset 0.
        assert_eq!(&reader.read(&mut slot, 0, 4).unwrap()[..], &payload[0..4]);
        // Second read within the window is a hit.
        assert_eq!(&reader.read(&mut slot, 4, 4).unwrap()[..], &payload[4..8]);
        // Out-of-window read refills.
        assert_eq!(
            &reader.read(&mut slot, 16, 8).unwrap()[..],
            &payload[16..24]
        );
        assert!(cache.stats().hits.load(std::sync::atomic::Ordering::Relaxed) >= 1);
        reader.close(&mut slot).unwrap();
    }

    #[test]
    fn test_priority_eviction_order() {
        let config = CacheConfig {
            capacity_bytes: 1000,
            // Keep the threshold out of the way so only eviction flushes.
            writeback_threshold_bytes: 1 << 20,
            ..CacheConfig::default()
        };
        let (_lifecycle, cache, state) = setup(config);
        let mut slot = CallSlot::new();

        let mut a = FileCache::open_write(&cache, &mut slot, "a").unwrap();
        let mut b = FileCache::open_write(&cache, &mut slot, "b").unwrap();
        let mut c = FileCache::open_write(&cache, &mut slot, "c").unwrap();
        b.set_priority(Priority::High);

        a.append(&mut slot, &[1u8; 400]).unwrap();
        b.append(&mut slot, &[2u8; 400]).unwrap();
        // Pushes resident bytes to 1200: A is the LRU normal victim.
        c.append(&mut slot, &[3u8; 400]).unwrap();

        assert_eq!(state.file_len("a"), Some(400), "A flushed under pressure");
        assert_eq!(state.file_len("b"), Some(0), "B (high) survives");
        assert_eq!(a.buffered_bytes(), 0);
        assert_eq!(b.buffered_bytes(), 400);

        // More pressure: C itself is the remaining normal victim; B still
        // survives because a normal entry remains evictable.
        c.append(&mut slot, &[3u8; 400]).unwrap();
        assert_eq!(state.file_len("b"), Some(0), "B survives A and C");
        assert_eq!(state.file_len("c"), Some(800));

        for w in [&mut a, &mut b, &mut c] {
            w.close(&mut slot).unwrap();
        }
        assert_eq!(state.file_len("b"), Some(400));
    }

    #[test]
    fn test_failed_flush_is_surfaced_and_buffer_survives() {
        let (_lifecycle, cache, state) = setup(CacheConfig::default());
        let mut slot = CallSlot::new();

        let mut writer = FileCache::open_write(&cache, &mut slot, "flaky").unwrap();
        writer.append(&mut slot, b"payload").unwrap();

        state.inject_write_error(-libc::EIO);
        let err = writer.sync(&mut slot).unwrap_err();
        assert!(matches!(
            err,
            tidefs_common::Error::Engine { code, .. } if code == -libc::EIO
        ));

        // The buffer survived the failure; a later sync lands everything.
        assert_eq!(writer.buffered_bytes(), 7);
        writer.sync(&mut slot).unwrap();
        assert_eq!(state.file_len("flaky"), Some(7));
        writer.close(&mut slot).unwrap();
    }

    #[test]
    fn test_truncate_resets_logical_size() {
        let (_lifecycle, cache, state) = setup(CacheConfig::default());
        let mut slot = CallSlot::new();

        let mut writer = FileCache::open_write(&cache, &mut slot, "t").unwrap();
        writer.append(&mut slot, b"abcdef").unwrap();
        writer.truncate(&mut slot, 3).unwrap();
        assert_eq!(state.file_len("t"), Some(3));
        assert_eq!(writer.file_size(), 3);

        writer.append(&mut slot, b"xyz").unwrap();
        writer.close(&mut slot).unwrap();
        assert_eq!(state.file_len("t"), Some(6));
    }

    #[test]
    fn test_allocate_never_shrinks() {
        let (_lifecycle, cache, state) = setup(CacheConfig::default());
        let mut slot = CallSlot::new();

        let mut writer = FileCache::open_write(&cache, &mut slot, "pre").unwrap();
        writer.append(&mut slot, &[9u8; 10]).unwrap();
        writer.sync(&mut slot).unwrap();

        // Request ending inside the current size: no-op.
        writer.allocate(&mut slot, 0, 4).unwrap();
        assert_eq!(state.file_len("pre"), Some(10));

        // Request extending the file: grows, never shrinks.
        writer.allocate(&mut slot, 0, 64).unwrap();
        assert_eq!(state.file_len("pre"), Some(64));
        writer.close(&mut slot).unwrap();
    }

    #[test]
    fn test_open_read_missing_is_not_found() {
        let (_lifecycle, cache, _state) = setup(CacheConfig::default());
        let mut slot = CallSlot::new();
        assert!(FileCache::open_read(&cache, &mut slot, "absent")
            .unwrap_err()
            .is_not_found());
    }
}
