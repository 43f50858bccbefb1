//! Shared FIFO work queue with a drain barrier.
//!
//! Workers pull items with `get`, and call `task_done` once an item has
//! been fully processed, including any follow-up items it enqueued.
//! `join` resolves when every item ever put has been marked done.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};

pub struct WorkQueue<T> {
    sender: mpsc::UnboundedSender<T>,
    receiver: Mutex<mpsc::UnboundedReceiver<T>>,
    pending: AtomicUsize,
    idle: Notify,
}

impl<T: Send> WorkQueue<T> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Append an item. Never blocks.
    pub fn put(&self, item: T) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(item).is_err() {
            // Receiver gone: nothing will ever process the item.
            self.task_done();
        }
    }

    /// Wait for the next item. Items are handed out in insertion order.
    pub async fn get(&self) -> Option<T> {
        self.receiver.lock().await.recv().await
    }

    /// Mark one previously retrieved item as fully processed.
    pub fn task_done(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "task_done called more times than put");
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Items put but not yet marked done.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolve once every item put so far has been marked done.
    pub async fn join(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl<T: Send> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
