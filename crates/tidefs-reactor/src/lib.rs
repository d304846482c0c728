//! TideFS reactor
//!
//! The sync-over-async core: a single reactor thread owns the asynchronous
//! engine, caller threads post work items and block on per-thread call
//! slots, and completions deliver exactly one wake-up per call.
//!
//! ```text
//! caller thread ──SyncBridge::call──▶ queue ──▶ reactor thread ──▶ engine
//!       ▲                                            │
//!       └────────────── CallSlot ◀── Completion ◀────┘
//! ```

pub mod client;
pub mod lifecycle;
pub mod reactor;
pub mod slot;

pub use client::EngineClient;
pub use lifecycle::Lifecycle;
pub use reactor::{EngineCtx, ReactorState, SyncBridge, WorkItem};
pub use slot::{CallSlot, Completion, Reply};
