//! TideFS engine boundary
//!
//! Traits for the asynchronous filesystem engine and its block-device
//! provider, plus [`MemEngine`], the in-memory reference engine used by the
//! test suites and the smoke binary. Everything here is invoked only from
//! the reactor thread; see `tidefs-reactor` for the bridge that makes the
//! engine reachable from ordinary threads.

pub mod mem;
pub mod traits;

pub use mem::{MemDevice, MemDeviceProvider, MemEngine, MemEngineState};
pub use traits::{
    BackingDev, DeferredTask, DeviceProvider, Done, Engine, EngineFile, IoChannel, OpenFlags,
    Scheduler,
};
