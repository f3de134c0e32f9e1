//! In-process priority queue of job ids.
//!
//! Higher priority first, then submission order. Workers wait on
//! [`JobQueue::pop`] until a job arrives or the queue is closed.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use super::model::JobPriority;

#[derive(Debug, PartialEq, Eq)]
struct QueuedJob {
    priority: JobPriority,
    seq: u64,
    job_id: String,
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct JobQueue {
    heap: Mutex<BinaryHeap<QueuedJob>>,
    notify: Notify,
    seq: AtomicU64,
    closed: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a job. Returns false once the queue is closed.
    pub fn push(&self, job_id: &str, priority: JobPriority) -> bool {
        if self.is_closed() {
            return false;
        }
        let entry = QueuedJob {
            priority,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            job_id: job_id.to_string(),
        };
        match self.heap.lock() {
            Ok(mut heap) => heap.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        self.notify.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<String> {
        let mut heap = match self.heap.lock() {
            Ok(heap) => heap,
            Err(poisoned) => poisoned.into_inner(),
        };
        heap.pop().map(|entry| entry.job_id)
    }

    /// Waits for the next job. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return None;
            }
            if let Some(job_id) = self.try_pop() {
                return Some(job_id);
            }
            notified.await;
        }
    }

    /// Wakes every waiting worker and rejects further pushes. Jobs still
    /// queued stay persisted and are picked up again on resume.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        match self.heap.lock() {
            Ok(heap) => heap.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
