//! In-memory min-priority check queue.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::CheckQueue;
use crate::check::Check;
use crate::error::Result;

#[derive(Default)]
struct Inner {
    /// Checks bucketed by priority (unix seconds of their due time),
    /// FIFO within a bucket. The map's first key is the live minimum.
    buckets: BTreeMap<i64, VecDeque<Check>>,
    total: u64,
}

/// A min-priority queue holding its checks in memory.
///
/// Priorities are derived from each check's `due_at()` timestamp so
/// the oldest-due checks come out first. Ties are broken by insertion
/// order.
#[derive(Default)]
pub struct MemoryQueue {
    inner: RwLock<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a check at its current due-time priority and clear its
    /// executed flag.
    pub fn enqueue(&self, mut check: Check) {
        check.executed = false;
        let priority = check.due_at().timestamp();

        let mut inner = self.inner.write();
        inner.buckets.entry(priority).or_default().push_back(check);
        inner.total += 1;
    }

    /// Remove and return the head of the earliest bucket, or `None`.
    ///
    /// Only the earliest bucket's head is consulted: priorities are
    /// monotone in due time, so if the earliest-due check is not yet
    /// due, nothing in the queue is. Never scan later buckets for a
    /// due check.
    pub fn dequeue(&self) -> Option<Check> {
        let mut inner = self.inner.write();

        let mut entry = inner.buckets.first_entry()?;
        if !entry.get().front()?.is_due() {
            return None;
        }

        let check = entry.get_mut().pop_front()?;
        if entry.get().is_empty() {
            entry.remove();
        }
        inner.total -= 1;

        Some(check)
    }

    pub fn count(&self) -> u64 {
        self.inner.read().total
    }

    /// Reset the queue to empty.
    pub fn flush(&self) {
        let mut inner = self.inner.write();
        inner.buckets.clear();
        inner.total = 0;
    }

    /// Remove and return every queued check in priority order.
    ///
    /// Used on shutdown to hand unexecuted checks back to an external
    /// enqueuer; the queue is empty afterwards.
    pub fn drain(&self) -> Vec<Check> {
        let mut inner = self.inner.write();
        let buckets = std::mem::take(&mut inner.buckets);
        inner.total = 0;

        buckets.into_values().flatten().collect()
    }
}

#[async_trait]
impl CheckQueue for MemoryQueue {
    async fn enqueue(&self, check: Check) {
        MemoryQueue::enqueue(self, check);
    }

    async fn dequeue(&self) -> Result<Option<Check>> {
        Ok(MemoryQueue::dequeue(self))
    }

    async fn count(&self) -> u64 {
        MemoryQueue::count(self)
    }

    async fn flush(&self) -> Result<()> {
        MemoryQueue::flush(self);
        Ok(())
    }
}
