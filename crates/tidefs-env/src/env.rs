//! Managed-namespace routing
//!
//! `TideEnv` fronts the whole filesystem surface. Paths under the managed
//! mount are stripped to a bare name and served by the engine through the
//! cache and bridge; everything else goes to the POSIX fallback. Metadata
//! operations (exists/size/delete/rename) consult the engine first and fall
//! back to POSIX when it reports not-found.

use crate::file::{Directory, FileLock, RandomAccessFile, SequentialFile, WritableFile};
use crate::posix::{self, PosixLock, PosixRandom, PosixSequential, PosixWritable};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tidefs_cache::FileCache;
use tidefs_common::{EnvConfig, Result};
use tidefs_engine::{DeviceProvider, Engine, OpenFlags};
use tidefs_reactor::{CallSlot, EngineClient, Lifecycle, ReactorState};
use tracing::{debug, info};

/// The synchronous Env facade.
pub struct TideEnv {
    config: EnvConfig,
    lifecycle: Mutex<Lifecycle>,
    client: EngineClient,
    cache: Arc<FileCache>,
}

impl TideEnv {
    /// Start the reactor on `provider`/`engine` and wait for readiness.
    /// Engine-load failure and readiness timeout are fatal and surface here.
    pub fn start(
        provider: Box<dyn DeviceProvider>,
        engine: Box<dyn Engine>,
        config: EnvConfig,
    ) -> Result<Self> {
        config.validate()?;
        let lifecycle = Lifecycle::start(provider, engine, config.ready_timeout())?;
        let client = EngineClient::new(lifecycle.bridge());
        let cache = Arc::new(FileCache::new(client.clone(), config.cache.clone()));
        info!(mount = %config.mount_dir.display(), "environment ready");
        Ok(Self {
            config,
            lifecycle: Mutex::new(lifecycle),
            client,
            cache,
        })
    }

    /// Request engine shutdown and join the reactor. After this returns no
    /// engine activity remains and every further call fails fast.
    pub fn shutdown(&self) {
        self.lifecycle.lock().stop();
    }

    pub fn reactor_state(&self) -> ReactorState {
        self.lifecycle.lock().state()
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    /// Allocate a call slot for the current thread. Every thread issuing
    /// calls needs its own, created before its first call.
    pub fn thread_slot(&self) -> CallSlot {
        CallSlot::new()
    }

    /// Spawn a thread that will issue synchronous calls: its slot is
    /// provisioned before `f` runs.
    pub fn spawn_io_thread<F>(&self, f: F) -> std::thread::JoinHandle<()>
    where
        F: FnOnce(&mut CallSlot) + Send + 'static,
    {
        std::thread::spawn(move || {
            let mut slot = CallSlot::new();
            f(&mut slot);
        })
    }

    /// Bare engine name for managed paths, `None` outside the mount.
    fn bare_name(&self, path: &Path) -> Option<String> {
        if !path.starts_with(&self.config.mount_dir) {
            return None;
        }
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    pub fn new_sequential_file(
        &self,
        slot: &mut CallSlot,
        path: impl AsRef<Path>,
    ) -> Result<SequentialFile> {
        let path = path.as_ref();
        match self.bare_name(path) {
            Some(name) => {
                // Resolve through metadata first so a missing file surfaces
                // as not-found rather than being created.
                self.client.stat(slot, &name)?;
                Ok(SequentialFile::Managed {
                    reader: FileCache::open_read(&self.cache, slot, &name)?,
                    offset: 0,
                })
            }
            None => Ok(SequentialFile::Posix(PosixSequential::open(path)?)),
        }
    }

    pub fn new_random_access_file(
        &self,
        slot: &mut CallSlot,
        path: impl AsRef<Path>,
    ) -> Result<RandomAccessFile> {
        let path = path.as_ref();
        match self.bare_name(path) {
            Some(name) => Ok(RandomAccessFile::Managed(
                FileCache::open_read(&self.cache, slot, &name)?,
            )),
            None => Ok(RandomAccessFile::Posix(PosixRandom::open(path)?)),
        }
    }

    pub fn new_writable_file(
        &self,
        slot: &mut CallSlot,
        path: impl AsRef<Path>,
    ) -> Result<WritableFile> {
        let path = path.as_ref();
        match self.bare_name(path) {
            Some(name) => Ok(WritableFile::Managed(FileCache::open_write(
                &self.cache,
                slot,
                &name,
            )?)),
            None => Ok(WritableFile::Posix(PosixWritable::create(path)?)),
        }
    }

    /// Reuse `old_path` as `path`. Always served by the fallback, matching
    /// the log-recycling expectations of POSIX callers.
    pub fn reuse_writable_file(
        &self,
        _slot: &mut CallSlot,
        path: impl AsRef<Path>,
        old_path: impl AsRef<Path>,
    ) -> Result<WritableFile> {
        posix::rename(old_path, &path)?;
        Ok(WritableFile::Posix(PosixWritable::reopen(path)?))
    }

    pub fn new_directory(&self, path: impl AsRef<Path>) -> Result<Directory> {
        let path = path.as_ref();
        if path.starts_with(&self.config.mount_dir) {
            Ok(Directory::Managed)
        } else {
            Ok(Directory::Posix(std::fs::File::open(path)?))
        }
    }

    /// Engine metadata first; not-found falls back to the local filesystem.
    pub fn file_exists(&self, slot: &mut CallSlot, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        match self.stat_engine(slot, path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(posix::exists(path)),
            Err(e) => Err(e),
        }
    }

    /// Engine metadata first; not-found falls back to the local filesystem.
    pub fn get_file_size(&self, slot: &mut CallSlot, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        match self.stat_engine(slot, path) {
            Ok(len) => Ok(len),
            Err(e) if e.is_not_found() => posix::file_size(path),
            Err(e) => Err(e),
        }
    }

    pub fn delete_file(&self, slot: &mut CallSlot, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let name = base(path);
        match self.client.delete(slot, &name) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => posix::delete(path),
            Err(e) => Err(e),
        }
    }

    /// Rename inside the engine namespace; a source the engine does not
    /// know falls through to the local filesystem, succeeding or failing
    /// exactly as it would.
    pub fn rename_file(
        &self,
        slot: &mut CallSlot,
        old_path: impl AsRef<Path>,
        new_path: impl AsRef<Path>,
    ) -> Result<()> {
        let old_path = old_path.as_ref();
        let new_path = new_path.as_ref();
        match self
            .client
            .rename(slot, &base(old_path), &base(new_path))
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(old = %old_path.display(), "rename falling back to POSIX");
                posix::rename(old_path, new_path)
            }
            Err(e) => Err(e),
        }
    }

    /// Take an exclusive lock: on the managed path the open engine handle
    /// is the lock token, on the fallback path a `flock`ed lock file is.
    pub fn lock_file(&self, slot: &mut CallSlot, path: impl AsRef<Path>) -> Result<FileLock> {
        let path = path.as_ref();
        match self.bare_name(path) {
            Some(name) => {
                let (file, _) = self.client.open(slot, &name, OpenFlags::CREATE)?;
                Ok(FileLock::Managed { file, name })
            }
            None => Ok(FileLock::Posix(PosixLock::acquire(path)?)),
        }
    }

    pub fn unlock_file(&self, slot: &mut CallSlot, lock: FileLock) -> Result<()> {
        match lock {
            FileLock::Managed { file, name } => {
                debug!(name = %name, "releasing managed lock");
                self.client.close(slot, file)
            }
            FileLock::Posix(lock) => {
                drop(lock);
                Ok(())
            }
        }
    }

    pub fn get_children(
        &self,
        slot: &mut CallSlot,
        dir: impl AsRef<Path>,
    ) -> Result<Vec<String>> {
        let dir = dir.as_ref();
        if dir.starts_with(&self.config.mount_dir) {
            self.client.list(slot)
        } else {
            posix::list_dir(dir)
        }
    }

    fn stat_engine(&self, slot: &mut CallSlot, path: &Path) -> Result<u64> {
        self.client.stat(slot, &base(path))
    }
}

impl Drop for TideEnv {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Final path component as the engine name: the managed namespace is flat.
fn base(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
