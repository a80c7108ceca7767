//! Check queues.
//!
//! The server pulls work from anything implementing [`CheckQueue`].
//! [`MemoryQueue`] is the in-process due-time priority queue;
//! [`BufferedQueue`] wraps it with a persistent backing store behind
//! the [`CheckProvider`] / [`CheckEnqueuer`] contracts.

pub mod buffered;
pub mod memory;

use async_trait::async_trait;

use crate::check::Check;
use crate::error::Result;

pub use buffered::{BufferedQueue, CheckEnqueuer, CheckProvider};
pub use memory::MemoryQueue;

/// Feeds the server work: checks to execute, ordered by due time.
#[async_trait]
pub trait CheckQueue: Send + Sync {
    /// Add a check to the queue at its `due_at` priority.
    async fn enqueue(&self, check: Check);

    /// Remove and return the earliest-due check, or `None` when
    /// nothing is currently due.
    ///
    /// Backing-store failures are propagated, never swallowed.
    async fn dequeue(&self) -> Result<Option<Check>>;

    /// Number of checks currently queued.
    async fn count(&self) -> u64;

    /// Reset the queue, persisting pending state where applicable.
    async fn flush(&self) -> Result<()>;
}
