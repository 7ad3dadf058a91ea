//! Completion barrier for reader tasks across every connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct ReaderTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl ReaderTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Counts one reader until the returned guard is dropped.
    pub fn register(self: &Arc<Self>) -> ReaderGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ReaderGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Resolves once no reader is registered.
    pub async fn wait(&self) {
        loop {
            let idle = self.idle.notified();
            if self.active() == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Held by a running reader task.
#[derive(Debug)]
pub struct ReaderGuard {
    tracker: Arc<ReaderTracker>,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        if self.tracker.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}
