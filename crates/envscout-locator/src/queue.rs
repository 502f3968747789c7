//! Single-concurrency FIFO queue for discovery passes.
//!
//! The locator streams results for exactly one `refresh` at a time, so
//! passes must never overlap. Tasks acquire a fair mutex, which grants
//! access in arrival order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

const QUEUE_TARGET: &str = "envscout_locator::queue";

/// Runs refresh tasks one at a time in arrival order.
#[derive(Debug, Default)]
pub struct RefreshQueue {
    gate: tokio::sync::Mutex<()>,
    waiting: AtomicUsize,
}

impl RefreshQueue {
    /// Creates an idle queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks waiting for their turn.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Waits for every earlier task to finish, then runs `task`.
    ///
    /// Dropping the returned future before its turn leaves the queue.
    pub async fn run<F, Fut, T>(&self, label: &str, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let position = self.waiting.fetch_add(1, Ordering::SeqCst);
        trace!(target: QUEUE_TARGET, label, position, "refresh task queued");
        let turn = {
            let _waiting = WaitingGuard(&self.waiting);
            self.gate.lock().await
        };
        trace!(target: QUEUE_TARGET, label, "refresh task started");
        let output = task().await;
        drop(turn);
        trace!(target: QUEUE_TARGET, label, "refresh task finished");
        output
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
