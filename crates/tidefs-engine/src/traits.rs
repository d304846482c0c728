//! Collaborator boundary traits
//!
//! The engine is an asynchronous, callback-completed filesystem: every
//! mutating operation takes a completion that the engine must invoke exactly
//! once. All trait methods here are called only from the reactor thread, and
//! completions run only on the reactor thread: either inline before the
//! method returns, or later from a task the engine scheduled through its
//! [`Scheduler`].

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tidefs_common::Result;

/// Completion callback for an engine operation.
pub type Done<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// A deferred task an engine schedules back onto the reactor.
pub type DeferredTask = Box<dyn FnOnce() + Send>;

/// Handle engines use to schedule deferred completions onto the reactor
/// thread. Cloning is cheap. Scheduling after the reactor has stopped is a
/// silent no-op; the dropped task's completion then reports shutdown
/// through the slot it was bound to.
#[derive(Clone)]
pub struct Scheduler {
    post: Arc<dyn Fn(DeferredTask) + Send + Sync>,
}

impl Scheduler {
    pub fn new(post: impl Fn(DeferredTask) + Send + Sync + 'static) -> Self {
        Self {
            post: Arc::new(post),
        }
    }

    /// Schedule `task` to run on the reactor thread.
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        (self.post)(Box::new(task));
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Scheduler")
    }
}

/// Opaque handle to an engine-owned file.
///
/// The engine owns the underlying object; wrappers only reference it. The
/// handle stays valid until `close` completes for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineFile(u64);

impl EngineFile {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Flags for [`Engine::open`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Create the file if it does not exist.
    pub create: bool,
}

impl OpenFlags {
    pub const CREATE: Self = Self { create: true };
}

/// Per-reactor I/O channel token.
///
/// Allocated once after load, freed before unload. Not clonable: exactly one
/// channel exists per reactor.
#[derive(Debug)]
pub struct IoChannel(u64);

impl IoChannel {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// A block device backing the engine's store.
pub trait BackingDev: Send {
    fn name(&self) -> &str;
    fn size_bytes(&self) -> u64;
}

/// Probes for block devices at startup.
pub trait DeviceProvider: Send {
    /// Open the first available device. `None` is fatal: the reactor cannot
    /// start without a device.
    fn open_first(&mut self) -> Option<Box<dyn BackingDev>>;
}

/// The asynchronous filesystem engine.
///
/// Contract: every `done` is invoked exactly once, on the reactor thread.
/// Completion codes are negative errno values; `-ENOENT` is the only code
/// the bridge translates (to `Error::NotFound`).
pub trait Engine: Send {
    /// Create the backing store on `dev` and load the filesystem. The
    /// engine keeps `sched` for any deferred completion it needs later.
    fn load(&mut self, dev: Box<dyn BackingDev>, sched: Scheduler, done: Done<()>);

    /// Flush metadata and release the backing store. Called at most once,
    /// after all other outstanding operations completed.
    fn unload(&mut self, done: Done<()>);

    /// Open `name`, creating it when `flags.create` is set. Completes with
    /// the handle and the file's current length.
    fn open(&mut self, name: &str, flags: OpenFlags, done: Done<(EngineFile, u64)>);

    fn close(&mut self, file: EngineFile, done: Done<()>);

    fn delete(&mut self, name: &str, done: Done<()>);

    fn rename(&mut self, old_name: &str, new_name: &str, done: Done<()>);

    /// Set the file length to `new_len`, zero-filling on extension.
    fn truncate(&mut self, file: EngineFile, new_len: u64, done: Done<()>);

    /// Read up to `len` bytes at `offset` into `buf`. Buffer ownership rides
    /// through the completion; the engine fills it from the start and
    /// completes with the byte count, which is short at end of file.
    fn read(
        &mut self,
        file: EngineFile,
        channel: &IoChannel,
        buf: BytesMut,
        offset: u64,
        len: usize,
        done: Done<(BytesMut, usize)>,
    );

    /// Write `data` at `offset`, extending the file as needed.
    fn write(
        &mut self,
        file: EngineFile,
        channel: &IoChannel,
        data: Bytes,
        offset: u64,
        done: Done<()>,
    );

    /// Enumerate every file as `(name, length)`. Metadata-only and
    /// synchronous, matching the engine's iterator interface.
    fn iterate(&self) -> Vec<(String, u64)>;

    fn alloc_channel(&mut self) -> IoChannel;

    fn free_channel(&mut self, channel: IoChannel);
}
