//! Shared in-process work queue.
//!
//! Every worker pulls from the same FIFO channel. Items are handed out in
//! enumeration order and no item is special-cased. The sending half is
//! dropped once every item is enqueued, so `dequeue` returns `None` only
//! when the queue is really drained.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, Mutex};

use super::job::WorkItem;

#[derive(Debug)]
pub struct WorkQueue {
    receiver: Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    remaining: AtomicUsize,
}

impl WorkQueue {
    pub fn new(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut count = 0;
        for item in items {
            // The receiver is alive, so sending cannot fail.
            if sender.send(item).is_ok() {
                count += 1;
            }
        }

        Self {
            receiver: Mutex::new(receiver),
            remaining: AtomicUsize::new(count),
        }
    }

    /// Takes the next item, or `None` once the queue is drained.
    pub async fn dequeue(&self) -> Option<WorkItem> {
        let item = self.receiver.lock().await.recv().await?;
        self.remaining.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }

    /// Returns the number of items still waiting.
    pub fn len(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
