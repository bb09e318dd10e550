//! Persistence Queue - FIFO buffer of accepted, not yet persisted messages

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

use crate::domain::Message;

/// Outcome of a worker dequeue
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued {
    /// Messages in insertion order
    Batch(Vec<Message>),
    /// Nothing queued, appends still accepted
    Idle,
    /// Nothing queued and closed; nothing more can arrive
    Exhausted,
}

#[derive(Debug)]
struct QueueInner {
    items: VecDeque<Message>,
    accepting: bool,
    enqueued_count: u64,
    dequeued_count: u64,
    discarded_count: u64,
    rejected_count: u64,
}

/// Unbounded FIFO queue shared between producers and the single worker.
///
/// Every operation goes through one mutex; the worker is woken through a
/// `Notify` permit, so an append that happens while the worker is busy is
/// never missed.
#[derive(Debug)]
pub struct PersistenceQueue {
    inner: Mutex<QueueInner>,
    work: Notify,
}

impl PersistenceQueue {
    /// Create an empty queue that accepts appends
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                accepting: true,
                enqueued_count: 0,
                dequeued_count: 0,
                discarded_count: 0,
                rejected_count: 0,
            }),
            work: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // A panic while holding the lock cannot leave the deque half-updated,
        // so a poisoned guard is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a message if the queue is still accepting.
    ///
    /// # Returns
    /// - `Ok(())` appended
    /// - `Err(message)` the queue is closed; the message is handed back untouched
    pub fn try_append(&self, message: Message) -> Result<(), Message> {
        {
            let mut inner = self.lock();
            if !inner.accepting {
                inner.rejected_count += 1;
                return Err(message);
            }
            inner.items.push_back(message);
            inner.enqueued_count += 1;
        }
        self.work.notify_one();
        Ok(())
    }

    /// Remove and return every queued message in insertion order
    pub fn drain(&self) -> Vec<Message> {
        self.drain_up_to(0)
    }

    /// Remove and return at most `max` messages (0 = all) in insertion order
    pub fn drain_up_to(&self, max: usize) -> Vec<Message> {
        Self::take(&mut self.lock(), max)
    }

    /// Take the next batch (at most `max`, 0 = all) for the worker.
    ///
    /// Emptiness and the accepting flag are read under the same lock, so
    /// `Exhausted` is only reported once no append can still land.
    pub fn dequeue(&self, max: usize) -> Dequeued {
        let batch = {
            let mut inner = self.lock();
            if inner.items.is_empty() {
                return if inner.accepting {
                    Dequeued::Idle
                } else {
                    Dequeued::Exhausted
                };
            }
            Self::take(&mut inner, max)
        };
        Dequeued::Batch(batch)
    }

    fn take(inner: &mut QueueInner, max: usize) -> Vec<Message> {
        let take = if max == 0 {
            inner.items.len()
        } else {
            max.min(inner.items.len())
        };
        let batch: Vec<Message> = inner.items.drain(..take).collect();
        inner.dequeued_count += batch.len() as u64;
        batch
    }

    /// Stop accepting appends; queued messages stay until drained
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            if inner.accepting {
                inner.accepting = false;
                debug!("Persistence queue closed with {} pending", inner.items.len());
            }
        }
        self.work.notify_one();
    }

    /// Stop accepting appends and drop everything still queued.
    ///
    /// Returns the number of messages dropped by this call.
    pub fn discard(&self) -> usize {
        let dropped = {
            let mut inner = self.lock();
            inner.accepting = false;
            let dropped = inner.items.len();
            inner.items.clear();
            inner.discarded_count += dropped as u64;
            dropped
        };
        if dropped > 0 {
            debug!("Persistence queue discarded {} messages", dropped);
        }
        self.work.notify_one();
        dropped
    }

    /// Suspend until an append, close or discard has happened since the last wait
    pub async fn wait_for_work(&self) {
        self.work.notified().await;
    }

    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        QueueStats {
            current_size: inner.items.len(),
            accepting: inner.accepting,
            enqueued_total: inner.enqueued_count,
            dequeued_total: inner.dequeued_count,
            discarded_total: inner.discarded_count,
            rejected_total: inner.rejected_count,
        }
    }
}

impl Default for PersistenceQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub current_size: usize,
    pub accepting: bool,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    pub discarded_total: u64,
    pub rejected_total: u64,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queue[{}{}, enq={}, deq={}, disc={}, rej={}]",
            self.current_size,
            if self.accepting { "" } else { " closed" },
            self.enqueued_total,
            self.dequeued_total,
            self.discarded_total,
            self.rejected_total
        )
    }
}
