//! Buffered queue backed by an external check store.
//!
//! Persistent stores are slow, so writes are batched: `enqueue` only
//! appends to a pending buffer that a background task hands to the
//! [`CheckEnqueuer`] on an interval, and `dequeue` refills the
//! in-memory queue from the [`CheckProvider`] only when it runs empty.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CheckQueue, MemoryQueue};
use crate::check::Check;
use crate::error::Result;

/// Fetches checks from a backing store.
///
/// Returned checks must have their `last_check`, `last_result` and
/// `incident` restored from persistent storage.
#[async_trait]
pub trait CheckProvider: Send + Sync {
    async fn provide(&self) -> Result<Vec<Check>>;
}

/// Persists checks into a backing store.
///
/// Implementations must persist each check's `last_check`,
/// `last_result` and `incident` so a future [`CheckProvider::provide`]
/// call can reconstruct it. On shutdown the queue hands back checks
/// that were provided but never ran, without deduplication, so
/// `enqueue` must be idempotent with respect to re-persisting a check.
#[async_trait]
pub trait CheckEnqueuer: Send + Sync {
    async fn enqueue(&self, checks: Vec<Check>) -> Result<()>;
}

/// A buffered [`CheckQueue`] decoupling the poller from a slow
/// external check store.
pub struct BufferedQueue {
    queue: MemoryQueue,
    /// Checks awaiting persistence by the enqueuer.
    pending: Mutex<Vec<Check>>,
    provider: Arc<dyn CheckProvider>,
    enqueuer: Arc<dyn CheckEnqueuer>,
    flush_interval: Duration,
}

impl BufferedQueue {
    pub fn new(
        provider: Arc<dyn CheckProvider>,
        enqueuer: Arc<dyn CheckEnqueuer>,
        flush_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: MemoryQueue::new(),
            pending: Mutex::new(Vec::new()),
            provider,
            enqueuer,
            flush_interval,
        })
    }

    /// Start the background task that flushes pending checks to the
    /// enqueuer on the configured interval. Runs until the token is
    /// cancelled.
    pub fn start_flusher(self: &Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("pending-check flusher shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(queue.flush_interval) => {
                        if let Err(e) = queue.flush_pending().await {
                            warn!(error = %e, "failed to flush pending checks to store");
                        }
                    }
                }
            }
        })
    }

    /// Hand the accumulated pending checks to the enqueuer.
    ///
    /// The buffer is swapped out under the lock and replaced with a
    /// fresh allocation at half its previous length, so the (slow)
    /// enqueuer call happens without holding the lock and concurrent
    /// `enqueue` calls land in the new buffer.
    async fn flush_pending(&self) -> Result<()> {
        let batch = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return Ok(());
            }
            let next_capacity = pending.len() / 2;
            std::mem::replace(&mut *pending, Vec::with_capacity(next_capacity))
        };

        debug!(count = batch.len(), "persisting pending checks");
        self.enqueuer.enqueue(batch).await
    }
}

#[async_trait]
impl CheckQueue for BufferedQueue {
    async fn enqueue(&self, check: Check) {
        self.pending.lock().push(check);
    }

    async fn dequeue(&self) -> Result<Option<Check>> {
        if self.queue.count() == 0 {
            let provided = self.provider.provide().await?;
            for check in provided {
                self.queue.enqueue(check);
            }
        }

        Ok(self.queue.dequeue())
    }

    async fn count(&self) -> u64 {
        self.queue.count()
    }

    /// Persist the pending buffer, then drain the in-memory queue and
    /// hand those never-ran checks back to the enqueuer as well.
    async fn flush(&self) -> Result<()> {
        self.flush_pending().await?;

        let never_ran = self.queue.drain();
        if !never_ran.is_empty() {
            debug!(count = never_ran.len(), "persisting checks that never ran");
            self.enqueuer.enqueue(never_ran).await?;
        }

        Ok(())
    }
}
