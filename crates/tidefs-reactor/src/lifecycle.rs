//! Reactor startup and teardown
//!
//! `Lifecycle::start` spawns the reactor thread and blocks until the engine
//! reports ready (bounded by a timeout). `stop` requests engine shutdown,
//! joins the reactor thread, and returns only once nothing engine-related
//! can run anymore.

use crate::reactor::{self, ReactorState, StateCell, SyncBridge, Task};
use crossbeam_channel::{bounded, unbounded, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tidefs_common::{Error, Result};
use tidefs_engine::{DeviceProvider, Engine};
use tracing::{debug, warn};

/// Owns the reactor thread.
pub struct Lifecycle {
    bridge: SyncBridge,
    tx: Sender<Task>,
    state: StateCell,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl Lifecycle {
    /// Spawn the reactor and wait for engine readiness.
    ///
    /// Device-probe or engine-load failure is fatal and comes back as the
    /// error the engine reported. A readiness wait that exceeds
    /// `ready_timeout` surfaces [`Error::EngineNotReady`]; the reactor is
    /// told to bail and is left to wind itself down.
    pub fn start(
        provider: Box<dyn DeviceProvider>,
        engine: Box<dyn Engine>,
        ready_timeout: Duration,
    ) -> Result<Self> {
        let (tx, rx) = unbounded();
        let state = StateCell::new();
        let (ready_tx, ready_rx) = bounded(1);

        let thread = std::thread::Builder::new()
            .name("tidefs-reactor".to_string())
            .spawn({
                let state = state.clone();
                let queue_tx = tx.clone();
                move || reactor::run(provider, engine, queue_tx, rx, state, ready_tx)
            })
            .map_err(Error::from)?;

        match ready_rx.recv_timeout(ready_timeout) {
            Ok(Ok(())) => Ok(Self {
                bridge: SyncBridge::new(tx.clone(), state.clone()),
                tx,
                state,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                warn!(
                    timeout_ms = ready_timeout.as_millis() as u64,
                    "engine readiness timed out"
                );
                state.set(ReactorState::Draining);
                let _ = tx.send(Task::Shutdown);
                Err(Error::EngineNotReady)
            }
        }
    }

    /// Bridge callers use to reach the reactor. Cheap to clone.
    pub fn bridge(&self) -> SyncBridge {
        self.bridge.clone()
    }

    pub fn state(&self) -> ReactorState {
        self.state.get()
    }

    /// Request shutdown and join the reactor thread.
    ///
    /// New calls fail fast from the moment this begins; work already queued
    /// still completes before the engine unloads. Idempotent.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        debug!("stopping reactor");
        self.state.set(ReactorState::Draining);
        let _ = self.tx.send(Task::Shutdown);
        if thread.join().is_err() {
            warn!("reactor thread panicked during shutdown");
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EngineClient;
    use crate::slot::CallSlot;
    use tidefs_engine::{
        BackingDev, Done, EngineFile, IoChannel, MemDeviceProvider, MemEngine, OpenFlags,
        Scheduler,
    };

    #[test]
    fn test_start_and_stop() {
        let mut lifecycle = Lifecycle::start(
            Box::new(MemDeviceProvider::new(1 << 24)),
            Box::new(MemEngine::new()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(lifecycle.state(), ReactorState::Running);

        lifecycle.stop();
        assert_eq!(lifecycle.state(), ReactorState::Stopped);
        // Idempotent.
        lifecycle.stop();
    }

    #[test]
    fn test_call_after_stop_is_rejected() {
        let mut lifecycle = Lifecycle::start(
            Box::new(MemDeviceProvider::new(1 << 24)),
            Box::new(MemEngine::new()),
            Duration::from_secs(5),
        )
        .unwrap();
        let client = EngineClient::new(lifecycle.bridge());
        let mut slot = CallSlot::new();

        lifecycle.stop();

        let err = client
            .open(&mut slot, "late", OpenFlags::CREATE)
            .unwrap_err();
        assert!(err.is_shutdown());
        // The slot survives a rejected call.
        assert!(client
            .open(&mut slot, "later", OpenFlags::CREATE)
            .unwrap_err()
            .is_shutdown());
    }

    #[test]
    fn test_no_device_is_fatal() {
        let err = Lifecycle::start(
            Box::new(MemDeviceProvider::empty()),
            Box::new(MemEngine::new()),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Engine { op: "device_probe", .. }));
    }

    #[test]
    fn test_load_failure_is_fatal() {
        let engine = MemEngine::new();
        engine.state().inject_load_error(-libc::EIO);
        let err = Lifecycle::start(
            Box::new(MemDeviceProvider::new(1 << 24)),
            Box::new(engine),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Engine { op: "load", .. }));
    }

    /// Engine that swallows its load completion forever.
    struct StallEngine;

    impl Engine for StallEngine {
        fn load(&mut self, _dev: Box<dyn BackingDev>, _sched: Scheduler, done: Done<()>) {
            std::mem::forget(done);
        }
        fn unload(&mut self, done: Done<()>) {
            done(Ok(()));
        }
        fn open(&mut self, _: &str, _: OpenFlags, _: Done<(EngineFile, u64)>) {
            unreachable!()
        }
        fn close(&mut self, _: EngineFile, _: Done<()>) {
            unreachable!()
        }
        fn delete(&mut self, _: &str, _: Done<()>) {
            unreachable!()
        }
        fn rename(&mut self, _: &str, _: &str, _: Done<()>) {
            unreachable!()
        }
        fn truncate(&mut self, _: EngineFile, _: u64, _: Done<()>) {
            unreachable!()
        }
        fn read(
            &mut self,
            _: EngineFile,
            _: &IoChannel,
            _: bytes::BytesMut,
            _: u64,
            _: usize,
            _: Done<(bytes::BytesMut, usize)>,
        ) {
            unreachable!()
        }
        fn write(&mut self, _: EngineFile, _: &IoChannel, _: bytes::Bytes, _: u64, _: Done<()>) {
            unreachable!()
        }
        fn iterate(&self) -> Vec<(String, u64)> {
            unreachable!()
        }
        fn alloc_channel(&mut self) -> IoChannel {
            IoChannel::from_raw(1)
        }
        fn free_channel(&mut self, _: IoChannel) {}
    }

    #[test]
    fn test_readiness_timeout_surfaces_not_ready() {
        let err = Lifecycle::start(
            Box::new(MemDeviceProvider::new(1 << 24)),
            Box::new(StallEngine),
            Duration::from_millis(50),
        )
        .unwrap_err();
        assert!(matches!(err, Error::EngineNotReady));
    }
}
