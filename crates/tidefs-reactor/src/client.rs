//! Typed operation wrappers over the bridge
//!
//! Each wrapper builds the work item for one engine operation, performs the
//! blocking call, and unpacks the reply variant that operation produces.
//! Name lookups go through the engine's metadata iterator, which is the
//! engine's own interface for resolving a name to a file.

use crate::reactor::SyncBridge;
use crate::slot::{CallSlot, Reply};
use bytes::{Bytes, BytesMut};
use tidefs_common::{Error, Result};
use tidefs_engine::{EngineFile, OpenFlags};

fn reply_mismatch(op: &'static str, got: &Reply) -> Error {
    Error::internal(format!("unexpected {} reply for {op}", got.kind()))
}

/// Cloneable client for synchronous engine calls.
#[derive(Clone)]
pub struct EngineClient {
    bridge: SyncBridge,
}

impl EngineClient {
    pub fn new(bridge: SyncBridge) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &SyncBridge {
        &self.bridge
    }

    /// Open `name`, returning the engine handle and current length.
    pub fn open(
        &self,
        slot: &mut CallSlot,
        name: &str,
        flags: OpenFlags,
    ) -> Result<(EngineFile, u64)> {
        let name = name.to_string();
        match self.bridge.call(slot, move |ctx, done| {
            ctx.fs.open(
                &name,
                flags,
                Box::new(move |res| {
                    done.finish(res.map(|(file, len)| Reply::Opened { file, len }));
                }),
            );
        })? {
            Reply::Opened { file, len } => Ok((file, len)),
            other => Err(reply_mismatch("open", &other)),
        }
    }

    pub fn close(&self, slot: &mut CallSlot, file: EngineFile) -> Result<()> {
        match self.bridge.call(slot, move |ctx, done| {
            ctx.fs
                .close(file, Box::new(move |res| done.finish(res.map(|()| Reply::Unit))));
        })? {
            Reply::Unit => Ok(()),
            other => Err(reply_mismatch("close", &other)),
        }
    }

    pub fn delete(&self, slot: &mut CallSlot, name: &str) -> Result<()> {
        let name = name.to_string();
        match self.bridge.call(slot, move |ctx, done| {
            ctx.fs
                .delete(&name, Box::new(move |res| done.finish(res.map(|()| Reply::Unit))));
        })? {
            Reply::Unit => Ok(()),
            other => Err(reply_mismatch("delete", &other)),
        }
    }

    pub fn rename(&self, slot: &mut CallSlot, old_name: &str, new_name: &str) -> Result<()> {
        let old_name = old_name.to_string();
        let new_name = new_name.to_string();
        match self.bridge.call(slot, move |ctx, done| {
            ctx.fs.rename(
                &old_name,
                &new_name,
                Box::new(move |res| done.finish(res.map(|()| Reply::Unit))),
            );
        })? {
            Reply::Unit => Ok(()),
            other => Err(reply_mismatch("rename", &other)),
        }
    }

    pub fn truncate(&self, slot: &mut CallSlot, file: EngineFile, new_len: u64) -> Result<()> {
        match self.bridge.call(slot, move |ctx, done| {
            ctx.fs.truncate(
                file,
                new_len,
                Box::new(move |res| done.finish(res.map(|()| Reply::Unit))),
            );
        })? {
            Reply::Unit => Ok(()),
            other => Err(reply_mismatch("truncate", &other)),
        }
    }

    /// Read up to `len` bytes at `offset` into `buf`; short at end of file.
    pub fn read(
        &self,
        slot: &mut CallSlot,
        file: EngineFile,
        buf: BytesMut,
        offset: u64,
        len: usize,
    ) -> Result<(BytesMut, usize)> {
        match self.bridge.call(slot, move |ctx, done| {
            ctx.fs.read(
                file,
                &ctx.channel,
                buf,
                offset,
                len,
                Box::new(move |res| done.finish(res.map(|(buf, n)| Reply::Data { buf, n }))),
            );
        })? {
            Reply::Data { buf, n } => Ok((buf, n)),
            other => Err(reply_mismatch("read", &other)),
        }
    }

    pub fn write(
        &self,
        slot: &mut CallSlot,
        file: EngineFile,
        data: Bytes,
        offset: u64,
    ) -> Result<()> {
        match self.bridge.call(slot, move |ctx, done| {
            ctx.fs.write(
                file,
                &ctx.channel,
                data,
                offset,
                Box::new(move |res| done.finish(res.map(|()| Reply::Unit))),
            );
        })? {
            Reply::Unit => Ok(()),
            other => Err(reply_mismatch("write", &other)),
        }
    }

    /// Resolve `name` to its length through the metadata iterator.
    pub fn stat(&self, slot: &mut CallSlot, name: &str) -> Result<u64> {
        let name = name.to_string();
        match self.bridge.call(slot, move |ctx, done| {
            let found = ctx
                .fs
                .iterate()
                .into_iter()
                .find(|(candidate, _)| *candidate == name);
            match found {
                Some((_, len)) => done.finish(Ok(Reply::Size(len))),
                None => done.finish(Err(Error::NotFound(name))),
            }
        })? {
            Reply::Size(len) => Ok(len),
            other => Err(reply_mismatch("stat", &other)),
        }
    }

    /// Enumerate every file name the engine knows.
    pub fn list(&self, slot: &mut CallSlot) -> Result<Vec<String>> {
        match self.bridge.call(slot, move |ctx, done| {
            let names = ctx.fs.iterate().into_iter().map(|(name, _)| name).collect();
            done.finish(Ok(Reply::Names(names)));
        })? {
            Reply::Names(names) => Ok(names),
            other => Err(reply_mismatch("list", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;
    use std::time::Duration;
    use tidefs_engine::{MemDeviceProvider, MemEngine};

    fn started(engine: MemEngine) -> (Lifecycle, EngineClient) {
        let lifecycle = Lifecycle::start(
            Box::new(MemDeviceProvider::new(1 << 24)),
            Box::new(engine),
            Duration::from_secs(5),
        )
        .unwrap();
        let client = EngineClient::new(lifecycle.bridge());
        (lifecycle, client)
    }

    #[test]
    fn test_open_write_read_through_bridge() {
        let (_lifecycle, client) = started(MemEngine::new());
        let mut slot = CallSlot::new();

        let (file, len) = client.open(&mut slot, "000001.log", OpenFlags::CREATE).unwrap();
        assert_eq!(len, 0);

        client
            .write(&mut slot, file, Bytes::from_static(b"helloworld"), 0)
            .unwrap();

        let (buf, n) = client
            .read(&mut slot, file, BytesMut::with_capacity(16), 0, 10)
            .unwrap();
        assert_eq!(n, 10);
        assert_eq!(&buf[..n], b"helloworld");

        client.close(&mut slot, file).unwrap();
    }

    #[test]
    fn test_deferred_engine_completions() {
        let (_lifecycle, client) = started(MemEngine::with_deferred_completions());
        let mut slot = CallSlot::new();

        let (file, _) = client.open(&mut slot, "deferred", OpenFlags::CREATE).unwrap();
        client
            .write(&mut slot, file, Bytes::from_static(b"abc"), 0)
            .unwrap();
        assert_eq!(client.stat(&mut slot, "deferred").unwrap(), 3);
        client.close(&mut slot, file).unwrap();
    }

    #[test]
    fn test_stat_missing_is_not_found() {
        let (_lifecycle, client) = started(MemEngine::new());
        let mut slot = CallSlot::new();
        assert!(client.stat(&mut slot, "nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_names() {
        let (_lifecycle, client) = started(MemEngine::new());
        let mut slot = CallSlot::new();
        for name in ["b", "a", "c"] {
            let (file, _) = client.open(&mut slot, name, OpenFlags::CREATE).unwrap();
            client.close(&mut slot, file).unwrap();
        }
        assert_eq!(client.list(&mut slot).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_slot_isolation_across_threads() {
        let (_lifecycle, client) = started(MemEngine::new());

        std::thread::scope(|scope| {
            for t in 0..4u8 {
                let client = client.clone();
                scope.spawn(move || {
                    let mut slot = CallSlot::new();
                    let name = format!("file-{t}");
                    let payload = vec![t; 1000];

                    let (file, _) = client.open(&mut slot, &name, OpenFlags::CREATE).unwrap();
                    for round in 0..50u64 {
                        client
                            .write(
                                &mut slot,
                                file,
                                Bytes::copy_from_slice(&payload),
                                round * 1000,
                            )
                            .unwrap();
                    }
                    let (buf, n) = client
                        .read(&mut slot, file, BytesMut::with_capacity(50_000), 0, 50_000)
                        .unwrap();
                    assert_eq!(n, 50_000);
                    assert!(buf[..n].iter().all(|b| *b == t));
                    client.close(&mut slot, file).unwrap();
                });
            }
        });
    }
}
