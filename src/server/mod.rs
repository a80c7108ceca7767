//! The check execution server.
//!
//! [`Server::run`] loops until cancelled, pulling due checks from a
//! [`CheckQueue`] and executing them on worker tasks under a hard
//! concurrency cap. Three tasks cooperate:
//!
//! - a dispatcher that keeps a bounded pending channel topped up from
//!   the queue, on its own task so a slow queue backend never stalls
//!   the workers
//! - a watchdog that periodically reports checks stuck in execution
//! - the main loop, which acquires a semaphore permit per check and
//!   spawns the worker
//!
//! On cancellation, in-flight workers run to completion and any checks
//! still buffered in the pending channel are pushed back into the
//! queue: a dequeued check either completes its lifecycle or returns
//! to the queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::check::Check;
use crate::error::Error;
use crate::queue::CheckQueue;

/// Default cap on concurrently executing checks.
const DEFAULT_MAX_RUNNING_CHECKS: usize = 100;

/// Dispatcher sleep when the queue has nothing due.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Dispatcher sleep when the pending channel is full.
const SATURATED_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How often the watchdog scans running checks.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

/// Execution time beyond which the watchdog reports a check.
const LONG_RUNNING_WARN_AFTER: Duration = Duration::from_secs(30);

/// Callback invoked just prior to check execution.
///
/// Callbacks run synchronously on the worker task and must not block.
pub type ExecutingCallback = Arc<dyn Fn(&Check) + Send + Sync>;

/// Callback invoked when a check execution returns an error.
pub type ErroredCallback = Arc<dyn Fn(&Check, &Error) + Send + Sync>;

/// Callback invoked after a check finishes, with its run duration.
pub type FinishedCallback = Arc<dyn Fn(&Check, Duration) + Send + Sync>;

/// Executes checks from a queue with bounded concurrency.
pub struct Server {
    queue: Arc<dyn CheckQueue>,
    max_running_checks: usize,
    auto_reenqueue: bool,
    on_check_executing: Option<ExecutingCallback>,
    on_check_errored: Option<ErroredCallback>,
    on_check_finished: Option<FinishedCallback>,
}

impl Server {
    pub fn new(queue: Arc<dyn CheckQueue>) -> Self {
        Self {
            queue,
            max_running_checks: DEFAULT_MAX_RUNNING_CHECKS,
            auto_reenqueue: true,
            on_check_executing: None,
            on_check_errored: None,
            on_check_finished: None,
        }
    }

    /// Cap on concurrently executing checks (default 100). This bounds
    /// executing checks only, not queue depth or handler parallelism
    /// within a check.
    pub fn with_max_running_checks(mut self, max: usize) -> Self {
        self.max_running_checks = max;
        self
    }

    /// Do not re-enqueue checks after they finish running.
    pub fn without_auto_reenqueue(mut self) -> Self {
        self.auto_reenqueue = false;
        self
    }

    pub fn on_check_executing(mut self, callback: impl Fn(&Check) + Send + Sync + 'static) -> Self {
        self.on_check_executing = Some(Arc::new(callback));
        self
    }

    pub fn on_check_errored(
        mut self,
        callback: impl Fn(&Check, &Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_check_errored = Some(Arc::new(callback));
        self
    }

    pub fn on_check_finished(
        mut self,
        callback: impl Fn(&Check, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.on_check_finished = Some(Arc::new(callback));
        self
    }

    /// Run the server until the token is cancelled, then drain.
    ///
    /// Returns after every in-flight worker has completed and every
    /// dequeued-but-unexecuted check has been pushed back into the
    /// queue.
    pub async fn run(&self, cancel_token: CancellationToken) {
        let (pending_tx, mut pending_rx) = mpsc::channel::<Check>(self.max_running_checks);
        let limiter = Arc::new(Semaphore::new(self.max_running_checks));
        let running: Arc<DashMap<String, Instant>> = Arc::new(DashMap::new());

        let dispatcher = tokio::spawn(dispatch_loop(
            self.queue.clone(),
            pending_tx,
            cancel_token.clone(),
        ));
        let watchdog = tokio::spawn(watchdog_loop(running.clone(), cancel_token.clone()));

        info!(
            max_running_checks = self.max_running_checks,
            auto_reenqueue = self.auto_reenqueue,
            "server started"
        );

        let mut workers = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("server received cancellation signal");
                    break;
                }
                // reap finished workers so the set does not grow without
                // bound across a long run
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "check worker task panicked");
                    }
                }
                received = pending_rx.recv() => {
                    let Some(check) = received else { break };

                    // waiting for a permit can outlast a cancellation;
                    // give the held check back instead of running it
                    let permit = tokio::select! {
                        _ = cancel_token.cancelled() => {
                            self.queue.enqueue(check).await;
                            break;
                        }
                        acquired = limiter.clone().acquire_owned() => {
                            let Ok(permit) = acquired else { break };
                            permit
                        }
                    };
                    running.insert(check.id().to_string(), Instant::now());

                    let queue = self.queue.clone();
                    let running = running.clone();
                    let auto_reenqueue = self.auto_reenqueue;
                    let on_executing = self.on_check_executing.clone();
                    let on_errored = self.on_check_errored.clone();
                    let on_finished = self.on_check_finished.clone();

                    workers.spawn(async move {
                        let _permit = permit;
                        let mut check = check;

                        if let Some(callback) = &on_executing {
                            callback(&check);
                        }

                        let start = Instant::now();
                        if let Err(err) = check.execute().await {
                            if let Some(callback) = &on_errored {
                                callback(&check, &err);
                            }
                        }
                        if let Some(callback) = &on_finished {
                            callback(&check, start.elapsed());
                        }

                        running.remove(check.id());
                        if auto_reenqueue {
                            queue.enqueue(check).await;
                        }
                    });
                }
            }
        }

        // let in-flight checks finish; they are never cancelled mid-run
        debug!("waiting for in-flight checks to complete");
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "check worker task panicked");
            }
        }

        if let Err(err) = dispatcher.await {
            error!(error = %err, "dispatcher task panicked");
        }
        if let Err(err) = watchdog.await {
            error!(error = %err, "watchdog task panicked");
        }

        // hand back any checks that were dequeued but never ran
        pending_rx.close();
        let mut returned = 0_u64;
        while let Some(check) = pending_rx.recv().await {
            self.queue.enqueue(check).await;
            returned += 1;
        }
        if returned > 0 {
            info!(count = returned, "re-enqueued checks that never ran");
        }

        info!("server stopped");
    }
}

/// Keep the pending channel topped up from the queue.
///
/// Runs on its own task so a slow `dequeue` (e.g. a backing store
/// refill) cannot stall the worker loop, and the worker loop being
/// saturated back-pressures queue polling instead of blocking it.
async fn dispatch_loop(
    queue: Arc<dyn CheckQueue>,
    pending_tx: mpsc::Sender<Check>,
    cancel_token: CancellationToken,
) {
    loop {
        if cancel_token.is_cancelled() {
            break;
        }

        if pending_tx.capacity() == 0 {
            sleep_cancellable(SATURATED_POLL_INTERVAL, &cancel_token).await;
            continue;
        }

        let mut dispatched = false;
        match queue.dequeue().await {
            Ok(Some(check)) => {
                if let Err(send_err) = pending_tx.send(check).await {
                    // receiver is gone; give the check back rather than
                    // dropping it
                    queue.enqueue(send_err.0).await;
                    break;
                }
                dispatched = true;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "check queue dequeue failed");
            }
        }

        if !dispatched {
            sleep_cancellable(IDLE_POLL_INTERVAL, &cancel_token).await;
        }
    }

    debug!("dispatcher shutting down");
}

/// Periodically report checks that have been executing for too long.
///
/// Purely observational; commands are expected to enforce their own
/// timeouts.
async fn watchdog_loop(running: Arc<DashMap<String, Instant>>, cancel_token: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(WATCHDOG_INTERVAL) => {
                for entry in running.iter() {
                    let elapsed = entry.value().elapsed();
                    if elapsed > LONG_RUNNING_WARN_AFTER {
                        warn!(
                            check_id = %entry.key(),
                            elapsed_secs = elapsed.as_secs(),
                            "check has been executing for more than {}s",
                            LONG_RUNNING_WARN_AFTER.as_secs(),
                        );
                    }
                }
            }
        }
    }
}

async fn sleep_cancellable(duration: Duration, cancel_token: &CancellationToken) {
    tokio::select! {
        _ = cancel_token.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
