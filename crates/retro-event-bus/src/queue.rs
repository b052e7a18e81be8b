//! FIFO work queue with an outstanding-task join signal
//!
//! Each background worker owns one queue. Producers push without blocking;
//! the worker acknowledges every item it pops with `task_done`, and anyone
//! holding a `WorkQueue` can wait until everything pushed so far has been
//! acknowledged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Default)]
struct Outstanding {
    count: AtomicUsize,
    idle: Notify,
}

impl Outstanding {
    fn done(&self) {
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "task_done called more times than items pushed");
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Producer half, cheap to clone
#[derive(Debug)]
pub struct WorkQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    outstanding: Arc<Outstanding>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            outstanding: self.outstanding.clone(),
        }
    }
}

/// Consumer half, owned by exactly one worker
#[derive(Debug)]
pub struct WorkReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    outstanding: Arc<Outstanding>,
}

/// Create a connected queue pair
pub fn work_queue<T>() -> (WorkQueue<T>, WorkReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let outstanding = Arc::new(Outstanding::default());
    (
        WorkQueue {
            tx,
            outstanding: outstanding.clone(),
        },
        WorkReceiver { rx, outstanding },
    )
}

impl<T> WorkQueue<T> {
    /// Enqueue an item; returns false if the worker is gone
    pub fn push(&self, item: T) -> bool {
        self.outstanding.count.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(item).is_err() {
            self.outstanding.done();
            return false;
        }
        true
    }

    /// Items pushed but not yet acknowledged
    pub fn outstanding(&self) -> usize {
        self.outstanding.count.load(Ordering::Acquire)
    }

    /// Wait until every pushed item has been acknowledged
    pub async fn join(&self) {
        loop {
            let idle = self.outstanding.idle.notified();
            if self.outstanding() == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> WorkReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking pop, used to fill batches
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Acknowledge one popped item
    pub fn task_done(&self) {
        self.outstanding.done();
    }
}
