//! Per-thread call slots
//!
//! A [`CallSlot`] is the mailbox one thread blocks on while the reactor
//! executes its call. Each thread owns exactly one slot and passes it by
//! `&mut` into every bridged call; the exclusive borrow is what guarantees
//! a thread can never have two calls in flight through the same slot.

use bytes::BytesMut;
use crossbeam_channel::{bounded, Receiver, Sender};
use tidefs_common::{Error, Result};
use tidefs_engine::EngineFile;

/// Result payload of one bridged call.
///
/// One variant per call shape; the typed wrappers in
/// [`EngineClient`](crate::EngineClient) unpack the variant they produced.
#[derive(Debug)]
pub enum Reply {
    Unit,
    Opened { file: EngineFile, len: u64 },
    Data { buf: BytesMut, n: usize },
    Size(u64),
    Names(Vec<String>),
}

impl Reply {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Opened { .. } => "opened",
            Self::Data { .. } => "data",
            Self::Size(_) => "size",
            Self::Names(_) => "names",
        }
    }
}

/// One thread's reusable mailbox for bridged calls.
pub struct CallSlot {
    tx: Sender<Result<Reply>>,
    rx: Receiver<Result<Reply>>,
}

impl CallSlot {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    pub(crate) fn completion(&self) -> Completion {
        Completion {
            tx: Some(self.tx.clone()),
        }
    }

    /// Block until the in-flight call's completion arrives.
    pub(crate) fn wait(&mut self) -> Result<Reply> {
        match self.rx.recv() {
            Ok(result) => result,
            // The reactor is gone and took the completion with it.
            Err(_) => Err(Error::ShuttingDown),
        }
    }

    /// Discard a stale message left by a completion that was dropped after
    /// its work item failed to post.
    pub(crate) fn drain(&mut self) {
        let _ = self.rx.try_recv();
    }
}

impl Default for CallSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Write-once handle that finishes a bridged call.
///
/// Exactly one wake-up per call: `finish` consumes the handle, and a
/// handle dropped unfinished (its work item was discarded) reports
/// `ShuttingDown` so the blocked caller can never hang.
pub struct Completion {
    tx: Option<Sender<Result<Reply>>>,
}

impl Completion {
    pub fn finish(mut self, result: Result<Reply>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.try_send(result);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.try_send(Err(Error::ShuttingDown));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_wakes_once() {
        let mut slot = CallSlot::new();
        let done = slot.completion();
        done.finish(Ok(Reply::Size(7)));
        match slot.wait().unwrap() {
            Reply::Size(n) => assert_eq!(n, 7),
            other => panic!("unexpected reply: {other:?}"),
        }
        // Slot is clean for the next call.
        let done = slot.completion();
        done.finish(Ok(Reply::Unit));
        assert!(matches!(slot.wait().unwrap(), Reply::Unit));
    }

    #[test]
    fn test_dropped_completion_reports_shutdown() {
        let mut slot = CallSlot::new();
        let done = slot.completion();
        drop(done);
        assert!(slot.wait().unwrap_err().is_shutdown());
    }

    #[test]
    fn test_drain_clears_stale_message() {
        let mut slot = CallSlot::new();
        drop(slot.completion());
        slot.drain();
        // No message left: a fresh completion produces the next wake-up.
        let done = slot.completion();
        done.finish(Ok(Reply::Unit));
        assert!(matches!(slot.wait().unwrap(), Reply::Unit));
    }
}
