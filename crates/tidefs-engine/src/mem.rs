//! In-memory reference engine
//!
//! Backs the test suites and the smoke binary. Completions run inline on
//! the calling (reactor) thread by default; `with_deferred_completions`
//! routes every completion through the [`Scheduler`] instead, which
//! exercises the bridge's deferred wake-up path the way a real engine
//! driving hardware would.

use crate::traits::{
    BackingDev, DeviceProvider, Done, Engine, EngineFile, IoChannel, OpenFlags, Scheduler,
};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tidefs_common::{Error, Result};
use tracing::debug;

/// Memory-backed block device.
pub struct MemDevice {
    name: String,
    size: u64,
}

impl MemDevice {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

impl BackingDev for MemDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn size_bytes(&self) -> u64 {
        self.size
    }
}

/// Provider exposing at most one [`MemDevice`].
pub struct MemDeviceProvider {
    device: Option<MemDevice>,
}

impl MemDeviceProvider {
    pub fn new(size_bytes: u64) -> Self {
        Self {
            device: Some(MemDevice::new("mem0", size_bytes)),
        }
    }

    /// A provider with no devices, for exercising the fatal startup path.
    pub fn empty() -> Self {
        Self { device: None }
    }
}

impl DeviceProvider for MemDeviceProvider {
    fn open_first(&mut self) -> Option<Box<dyn BackingDev>> {
        self.device.take().map(|d| Box::new(d) as Box<dyn BackingDev>)
    }
}

#[derive(Default)]
struct Inner {
    files: HashMap<String, Vec<u8>>,
    handles: HashMap<u64, String>,
    next_handle: u64,
    next_channel: u64,
    loaded: bool,
    fail_next_write: Option<i32>,
    fail_load: Option<i32>,
}

impl Inner {
    fn resolve(&self, op: &'static str, file: EngineFile) -> Result<String> {
        self.handles.get(&file.raw()).cloned().ok_or(Error::Engine {
            op,
            code: -libc::EBADF,
        })
    }
}

/// Shared view of a [`MemEngine`]'s state, for tests and tooling.
///
/// The reactor owns the engine box; this handle lets the rest of the
/// process observe files and inject faults without going through it.
#[derive(Clone)]
pub struct MemEngineState {
    inner: Arc<Mutex<Inner>>,
}

impl MemEngineState {
    pub fn file_len(&self, name: &str) -> Option<u64> {
        self.inner.lock().files.get(name).map(|d| d.len() as u64)
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().files.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn open_handles(&self) -> usize {
        self.inner.lock().handles.len()
    }

    /// Make the next `write` complete with `code` instead of succeeding.
    pub fn inject_write_error(&self, code: i32) {
        self.inner.lock().fail_next_write = Some(code);
    }

    /// Make `load` complete with `code`.
    pub fn inject_load_error(&self, code: i32) {
        self.inner.lock().fail_load = Some(code);
    }
}

/// In-memory [`Engine`] implementation.
pub struct MemEngine {
    inner: Arc<Mutex<Inner>>,
    defer: bool,
    sched: Option<Scheduler>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            defer: false,
            sched: None,
        }
    }

    /// Route every completion through the reactor's scheduler instead of
    /// invoking it inline.
    pub fn with_deferred_completions() -> Self {
        Self {
            defer: true,
            ..Self::new()
        }
    }

    pub fn state(&self) -> MemEngineState {
        MemEngineState {
            inner: Arc::clone(&self.inner),
        }
    }

    fn complete<T: Send + 'static>(&self, done: Done<T>, result: Result<T>) {
        match (&self.sched, self.defer) {
            (Some(sched), true) => sched.defer(move || done(result)),
            _ => done(result),
        }
    }
}

impl Default for MemEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MemEngine {
    fn load(&mut self, dev: Box<dyn BackingDev>, sched: Scheduler, done: Done<()>) {
        debug!(device = dev.name(), size = dev.size_bytes(), "engine load");
        self.sched = Some(sched);
        let result = {
            let mut inner = self.inner.lock();
            match inner.fail_load.take() {
                Some(code) => Err(Error::Engine { op: "load", code }),
                None => {
                    inner.loaded = true;
                    Ok(())
                }
            }
        };
        self.complete(done, result);
    }

    fn unload(&mut self, done: Done<()>) {
        let result = {
            let mut inner = self.inner.lock();
            inner.loaded = false;
            inner.handles.clear();
            Ok(())
        };
        self.complete(done, result);
    }

    fn open(&mut self, name: &str, flags: OpenFlags, done: Done<(EngineFile, u64)>) {
        let result = {
            let mut inner = self.inner.lock();
            if !inner.loaded {
                Err(Error::Engine {
                    op: "open",
                    code: -libc::ENXIO,
                })
            } else if !inner.files.contains_key(name) && !flags.create {
                Err(Error::from_completion("open", -libc::ENOENT, name))
            } else {
                let len = inner
                    .files
                    .entry(name.to_string())
                    .or_default()
                    .len() as u64;
                inner.next_handle += 1;
                let handle = inner.next_handle;
                inner.handles.insert(handle, name.to_string());
                Ok((EngineFile::from_raw(handle), len))
            }
        };
        self.complete(done, result);
    }

    fn close(&mut self, file: EngineFile, done: Done<()>) {
        let result = {
            let mut inner = self.inner.lock();
            match inner.handles.remove(&file.raw()) {
                Some(_) => Ok(()),
                None => Err(Error::Engine {
                    op: "close",
                    code: -libc::EBADF,
                }),
            }
        };
        self.complete(done, result);
    }

    fn delete(&mut self, name: &str, done: Done<()>) {
        let result = {
            let mut inner = self.inner.lock();
            match inner.files.remove(name) {
                Some(_) => Ok(()),
                None => Err(Error::from_completion("delete", -libc::ENOENT, name)),
            }
        };
        self.complete(done, result);
    }

    fn rename(&mut self, old_name: &str, new_name: &str, done: Done<()>) {
        let result = {
            let mut inner = self.inner.lock();
            match inner.files.remove(old_name) {
                Some(data) => {
                    inner.files.insert(new_name.to_string(), data);
                    // Handles keep pointing at the name they were opened
                    // under; the engine resolves them again per operation.
                    for target in inner.handles.values_mut() {
                        if target == old_name {
                            *target = new_name.to_string();
                        }
                    }
                    Ok(())
                }
                None => Err(Error::from_completion("rename", -libc::ENOENT, old_name)),
            }
        };
        self.complete(done, result);
    }

    fn truncate(&mut self, file: EngineFile, new_len: u64, done: Done<()>) {
        let result = {
            let mut inner = self.inner.lock();
            match inner.resolve("truncate", file) {
                Ok(name) => {
                    inner.files.entry(name).or_default().resize(new_len as usize, 0);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };
        self.complete(done, result);
    }

    fn read(
        &mut self,
        file: EngineFile,
        _channel: &IoChannel,
        mut buf: BytesMut,
        offset: u64,
        len: usize,
        done: Done<(BytesMut, usize)>,
    ) {
        let result = {
            let inner = self.inner.lock();
            match inner.resolve("read", file) {
                Ok(name) => match inner.files.get(&name) {
                    Some(data) => {
                        let start = (offset as usize).min(data.len());
                        let n = len.min(data.len() - start);
                        buf.clear();
                        buf.extend_from_slice(&data[start..start + n]);
                        Ok((buf, n))
                    }
                    // Deleted while the handle was open.
                    None => Err(Error::from_completion("read", -libc::ENOENT, &name)),
                },
                Err(e) => Err(e),
            }
        };
        self.complete(done, result);
    }

    fn write(
        &mut self,
        file: EngineFile,
        _channel: &IoChannel,
        data: Bytes,
        offset: u64,
        done: Done<()>,
    ) {
        let result = {
            let mut inner = self.inner.lock();
            if let Some(code) = inner.fail_next_write.take() {
                Err(Error::Engine { op: "write", code })
            } else {
                match inner.resolve("write", file) {
                    Ok(name) => {
                        let node = inner.files.entry(name).or_default();
                        let end = offset as usize + data.len();
                        if node.len() < end {
                            node.resize(end, 0);
                        }
                        node[offset as usize..end].copy_from_slice(&data);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        };
        self.complete(done, result);
    }

    fn iterate(&self) -> Vec<(String, u64)> {
        let inner = self.inner.lock();
        let mut listing: Vec<(String, u64)> = inner
            .files
            .iter()
            .map(|(name, data)| (name.clone(), data.len() as u64))
            .collect();
        listing.sort();
        listing
    }

    fn alloc_channel(&mut self) -> IoChannel {
        let mut inner = self.inner.lock();
        inner.next_channel += 1;
        IoChannel::from_raw(inner.next_channel)
    }

    fn free_channel(&mut self, _channel: IoChannel) {}
}
