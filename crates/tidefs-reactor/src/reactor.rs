//! Reactor thread and synchronous bridge
//!
//! One dedicated thread owns the engine. It is the only thread that ever
//! invokes engine operations or runs engine completions; every other thread
//! reaches the engine by posting a work item through [`SyncBridge`] and
//! blocking on its own [`CallSlot`]. Work items execute in FIFO arrival
//! order.

use crate::slot::{CallSlot, Completion, Reply};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tidefs_common::{Error, Result};
use tidefs_engine::{DeferredTask, DeviceProvider, Engine, IoChannel, Scheduler};
use tracing::{debug, info, warn};

/// Reactor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReactorState {
    /// Thread created, engine load requested.
    Starting = 0,
    /// Executing posted work items.
    Running = 1,
    /// Shutdown requested: new posts rejected, outstanding work completes.
    Draining = 2,
    /// Terminal: engine unloaded, thread exited.
    Stopped = 3,
}

impl ReactorState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Shared view of the reactor state.
#[derive(Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ReactorState::Starting as u8)))
    }

    pub(crate) fn get(&self) -> ReactorState {
        ReactorState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ReactorState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Engine state as seen by work items: only the reactor thread ever holds
/// one of these.
pub struct EngineCtx {
    pub fs: Box<dyn Engine>,
    pub channel: IoChannel,
}

/// A unit of work executed on the reactor thread.
pub type WorkItem = Box<dyn FnOnce(&mut EngineCtx) + Send>;

pub(crate) enum Task {
    /// Posted by a caller through the bridge.
    External(WorkItem),
    /// Scheduled by the engine itself (deferred completions).
    Engine(DeferredTask),
    /// Sentinel from `Lifecycle::stop`; everything queued before it still
    /// runs, nothing after it does.
    Shutdown,
}

/// The blocking call convention: post a work item, sleep on the calling
/// thread's slot, wake on the completion the reactor delivers.
#[derive(Clone)]
pub struct SyncBridge {
    tx: Sender<Task>,
    state: StateCell,
}

impl SyncBridge {
    pub(crate) fn new(tx: Sender<Task>, state: StateCell) -> Self {
        Self { tx, state }
    }

    pub fn state(&self) -> ReactorState {
        self.state.get()
    }

    fn post(&self, item: WorkItem) -> Result<()> {
        match self.state.get() {
            ReactorState::Starting => Err(Error::EngineNotReady),
            ReactorState::Running => self
                .tx
                .send(Task::External(item))
                .map_err(|_| Error::ShuttingDown),
            ReactorState::Draining | ReactorState::Stopped => Err(Error::ShuttingDown),
        }
    }

    /// Post `op` and block until its completion finishes `slot`.
    ///
    /// `op` runs on the reactor thread and must hand the [`Completion`] to
    /// exactly one engine callback (or finish it itself). Engine-reported
    /// errors come back verbatim.
    pub fn call(
        &self,
        slot: &mut CallSlot,
        op: impl FnOnce(&mut EngineCtx, Completion) + Send + 'static,
    ) -> Result<Reply> {
        let done = slot.completion();
        if let Err(e) = self.post(Box::new(move |ctx| op(ctx, done))) {
            // The rejected item was dropped along with its completion,
            // which left a shutdown notice in the slot.
            slot.drain();
            return Err(e);
        }
        slot.wait()
    }
}

/// Reactor thread body.
pub(crate) fn run(
    mut provider: Box<dyn DeviceProvider>,
    mut engine: Box<dyn Engine>,
    queue_tx: Sender<Task>,
    queue_rx: Receiver<Task>,
    state: StateCell,
    ready_tx: Sender<Result<()>>,
) {
    let dev = match provider.open_first() {
        Some(dev) => dev,
        None => {
            state.set(ReactorState::Stopped);
            let _ = ready_tx.send(Err(Error::Engine {
                op: "device_probe",
                code: -libc::ENODEV,
            }));
            return;
        }
    };
    info!(device = dev.name(), size = dev.size_bytes(), "reactor starting");

    let sched = Scheduler::new(move |task| {
        let _ = queue_tx.send(Task::Engine(task));
    });

    let (loaded_tx, loaded_rx) = bounded(1);
    engine.load(
        dev,
        sched,
        Box::new(move |res| {
            let _ = loaded_tx.send(res);
        }),
    );

    // Service engine-scheduled tasks until the load completion lands. A
    // shutdown request racing in here (readiness timed out on the caller
    // side) aborts as soon as the engine settles.
    let mut abort = false;
    let load_result = loop {
        crossbeam_channel::select! {
            recv(loaded_rx) -> msg => {
                break msg.unwrap_or_else(|_| Err(Error::internal("engine dropped its load completion")));
            }
            recv(queue_rx) -> task => match task {
                Ok(Task::Engine(f)) => f(),
                Ok(Task::External(item)) => drop(item),
                Ok(Task::Shutdown) => abort = true,
                Err(_) => return,
            }
        }
    };

    match load_result {
        Ok(()) if abort => {
            debug!("shutdown requested before readiness; unloading");
            unload(&mut engine, &queue_rx);
            state.set(ReactorState::Stopped);
            return;
        }
        Ok(()) => {}
        Err(e) => {
            state.set(ReactorState::Stopped);
            let _ = ready_tx.send(Err(e));
            return;
        }
    }

    let channel = engine.alloc_channel();
    let mut ctx = EngineCtx {
        fs: engine,
        channel,
    };
    state.set(ReactorState::Running);
    let _ = ready_tx.send(Ok(()));
    info!("reactor running");

    // FIFO main loop. Everything queued before the shutdown sentinel was
    // accepted while running and still executes; items that race in after
    // it are dropped, which wakes their callers with a shutdown error.
    loop {
        match queue_rx.recv() {
            Ok(Task::External(item)) => item(&mut ctx),
            Ok(Task::Engine(task)) => task(),
            Ok(Task::Shutdown) => break,
            Err(_) => break,
        }
    }

    state.set(ReactorState::Draining);
    debug!("reactor draining");

    let EngineCtx { mut fs, channel } = ctx;
    fs.free_channel(channel);
    unload(&mut fs, &queue_rx);

    state.set(ReactorState::Stopped);
    info!("reactor stopped");
}

/// Request engine unload and service deferred tasks until it confirms.
fn unload(engine: &mut Box<dyn Engine>, queue_rx: &Receiver<Task>) {
    let (unloaded_tx, unloaded_rx) = bounded(1);
    engine.unload(Box::new(move |res| {
        let _ = unloaded_tx.send(res);
    }));

    loop {
        crossbeam_channel::select! {
            recv(unloaded_rx) -> msg => {
                match msg {
                    Ok(Err(e)) => warn!(error = %e, "engine unload reported failure"),
                    Ok(Ok(())) => {}
                    Err(_) => warn!("engine dropped its unload completion"),
                }
                return;
            }
            recv(queue_rx) -> task => match task {
                Ok(Task::Engine(f)) => f(),
                Ok(Task::External(item)) => drop(item),
                Ok(Task::Shutdown) => {}
                Err(_) => return,
            }
        }
    }
}
