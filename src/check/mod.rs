//! Checks and their execution lifecycle.
//!
//! A [`Check`] is a monitored service or host: a probe [`Command`], a
//! [`Schedule`](schedule::Schedule) deciding when it runs, and a list
//! of [`Handler`]s that post-process each result. [`Check::execute`]
//! drives one cycle: run the command, decide whether the result opens a
//! new [`Incident`], reconcile the previous one, run handler mutations
//! sequentially, run handler processing concurrently, then commit
//! `last_check`/`last_result`/`incident`.

pub mod counter;
pub mod incident;
pub mod result;
pub mod schedule;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future;

use crate::error::{Error, Result};

pub use incident::Incident;
pub use result::{CheckResult, CheckState, MetricKind, REASON_CMD_FAILURE, ResultMetric};
pub use schedule::{PeriodicSchedule, Schedule};

/// The probe operation a check runs each cycle.
///
/// A command owns its time policy: it is expected to set deadlines on
/// any external I/O and map timeouts into reason-coded results. It may
/// read `check.last_result` for value deltas and call `check.debug` for
/// tracing.
#[async_trait]
pub trait Command: Send + Sync {
    async fn run(&self, check: &mut Check) -> CommandOutcome;
}

/// What a command run produces: either a result, or a failure carrying
/// both the salvaged result and the underlying error.
pub type CommandOutcome = std::result::Result<CheckResult, CommandFailure>;

/// A command error paired with the reason-coded result the probe
/// salvaged for it. The result still flows through handlers; the error
/// is threaded up out of [`Check::execute`].
#[derive(Debug)]
pub struct CommandFailure {
    pub result: CheckResult,
    pub error: Error,
}

impl CommandFailure {
    pub fn new(result: CheckResult, error: Error) -> Self {
        Self { result, error }
    }

    /// A failure with a zero-metric UNKNOWN/`CMD_FAILURE` result.
    pub fn unknown(error: Error) -> Self {
        Self::new(CheckResult::unknown(REASON_CMD_FAILURE), error)
    }
}

/// Post-processes a check after its command has run.
///
/// `mutate` is called first, sequentially in the order handlers are
/// defined on the check, so later handlers observe earlier mutations.
/// `process` runs concurrently with the other handlers' `process`
/// calls and receives the final mutated data read-only.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Short identifier used in logs and error context.
    fn name(&self) -> &'static str;

    /// Mutate the check, result or new incident before processing.
    fn mutate(
        &self,
        _check: &mut Check,
        _result: &mut CheckResult,
        _new_incident: Option<&mut Incident>,
    ) {
    }

    /// Process the final data. Must not mutate; `new_incident` is None
    /// when the execution did not open a new incident.
    async fn process(
        &self,
        check: &Check,
        result: &CheckResult,
        new_incident: Option<&Incident>,
    ) -> Result<()>;
}

/// Sink for per-check debug trace messages.
///
/// Commands and handlers call [`Check::debug`]; when no logger is
/// attached those calls are no-ops and the message is never formatted.
pub trait DebugLogger: Send + Sync {
    fn log(&self, check_id: &str, message: &str);
}

/// A [`DebugLogger`] that forwards to `tracing::debug!`.
pub struct TracingDebugLogger;

impl DebugLogger for TracingDebugLogger {
    fn log(&self, check_id: &str, message: &str) {
        tracing::debug!(check_id = %check_id, "{message}");
    }
}

/// A service or host to be checked with a given command at a given
/// schedule.
///
/// A check is owned by exactly one place at a time: the queue, or the
/// worker executing it. Its `last_check`, `last_result` and `incident`
/// fields are updated by [`Check::execute`]; when a check is loaded
/// from an external store, the provider is responsible for restoring
/// them.
pub struct Check {
    id: String,
    schedule: Arc<dyn Schedule>,
    command: Option<Arc<dyn Command>>,
    handlers: Vec<Arc<dyn Handler>>,
    /// Caller-defined data carried with the check; opaque to the poller.
    pub meta: HashMap<String, serde_json::Value>,
    /// When true, this check never opens incidents.
    pub suppress_incidents: bool,
    /// The current open incident, or the just-resolved one awaiting
    /// discard on the next cycle.
    pub incident: Option<Incident>,
    /// Time of the last completed execution.
    pub last_check: Option<DateTime<Utc>>,
    /// Result of the last completed execution.
    pub last_result: Option<CheckResult>,
    /// Set by `execute`, cleared when the check is enqueued.
    pub executed: bool,
    debug_logger: Option<Arc<dyn DebugLogger>>,
}

impl Check {
    /// Create a new check with the given id and schedule.
    pub fn new(id: impl Into<String>, schedule: impl Schedule + 'static) -> Self {
        Self {
            id: id.into(),
            schedule: Arc::new(schedule),
            command: None,
            handlers: Vec::new(),
            meta: HashMap::new(),
            suppress_incidents: false,
            incident: None,
            last_check: None,
            last_result: None,
            executed: false,
            debug_logger: None,
        }
    }

    /// Convenience constructor for a periodically scheduled check.
    pub fn periodic(id: impl Into<String>, interval_secs: u64) -> Self {
        Self::new(id, PeriodicSchedule::new(interval_secs))
    }

    pub fn with_command(mut self, command: impl Command + 'static) -> Self {
        self.command = Some(Arc::new(command));
        self
    }

    pub fn with_shared_command(mut self, command: Arc<dyn Command>) -> Self {
        self.command = Some(command);
        self
    }

    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn with_handlers(mut self, handlers: Vec<Arc<dyn Handler>>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_meta(mut self, meta: HashMap<String, serde_json::Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_suppressed_incidents(mut self) -> Self {
        self.suppress_incidents = true;
        self
    }

    pub fn with_last_check(mut self, last_check: DateTime<Utc>) -> Self {
        self.last_check = Some(last_check);
        self
    }

    pub fn with_debug_logger(mut self, logger: impl DebugLogger + 'static) -> Self {
        self.debug_logger = Some(Arc::new(logger));
        self
    }

    pub fn set_debug_logger(&mut self, logger: Arc<dyn DebugLogger>) {
        self.debug_logger = Some(logger);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The time this check is next due. May be in the past.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.schedule.due_at(self)
    }

    /// Returns true if the check is due for execution.
    pub fn is_due(&self) -> bool {
        self.schedule.is_due(self)
    }

    /// Emit a debug trace message for this check.
    ///
    /// The closure is only invoked when a debug logger is attached, so
    /// formatting costs nothing on the common path. Commands and
    /// handlers should use this liberally.
    pub fn debug<F>(&self, message: F)
    where
        F: FnOnce() -> String,
    {
        if let Some(logger) = &self.debug_logger {
            logger.log(&self.id, &message());
        }
    }

    /// Execute the check's command followed by its handlers, then
    /// commit `last_check`, `last_result` and any new incident.
    ///
    /// A command error does not abort handler execution: handlers run
    /// on whatever result the command salvaged. Handler processing
    /// errors are collected and joined with the command error into the
    /// returned composite.
    pub async fn execute(&mut self) -> Result<()> {
        self.executed = true;

        let (mut result, command_err) = match self.command.clone() {
            Some(command) => match command.run(self).await {
                Ok(result) => (result, None),
                Err(failure) => (failure.result, Some(failure.error)),
            },
            None => (
                CheckResult::unknown(REASON_CMD_FAILURE),
                Some(Error::CommandNotDefined),
            ),
        };

        self.debug(|| {
            format!(
                "result state={} reason={} metrics={} time={}",
                result.state,
                result.reason_code,
                result.metrics.len(),
                result.time.timestamp(),
            )
        });

        let mut new_incident = self.new_incident_if_justified(&result);
        self.debug(|| format!("new-incident={}", new_incident.is_some()));
        self.resolve_or_discard_previous_incident(&result, new_incident.is_some());

        let handlers = self.handlers.clone();
        for handler in &handlers {
            handler.mutate(self, &mut result, new_incident.as_mut());
        }

        let mut errors = Vec::new();
        if let Some(err) = command_err {
            errors.push(err);
        }

        {
            let check: &Check = self;
            let outcomes = future::join_all(
                handlers
                    .iter()
                    .map(|handler| handler.process(check, &result, new_incident.as_ref())),
            )
            .await;

            for (handler, outcome) in handlers.iter().zip(outcomes) {
                if let Err(err) = outcome {
                    errors.push(Error::Handler {
                        name: handler.name().to_string(),
                        source: Box::new(err),
                    });
                }
            }
        }

        self.last_check = Some(Utc::now());
        self.last_result = Some(result);
        if let Some(incident) = new_incident {
            self.incident = Some(incident);
        }

        Error::combined(errors)
    }

    fn new_incident_if_justified(&self, result: &CheckResult) -> Option<Incident> {
        if !result.justifies_new_incident(self) {
            return None;
        }

        Some(Incident::from_results(self.last_result.as_ref(), result))
    }

    /// Resolve or discard the previous incident against the new result.
    ///
    /// An open incident is resolved (but stays attached this cycle so
    /// handlers can observe the resolution); an already-resolved one is
    /// dropped.
    fn resolve_or_discard_previous_incident(
        &mut self,
        result: &CheckResult,
        new_incident_created: bool,
    ) {
        let has_incident = self.incident.is_some();
        if !has_incident || (result.state != CheckState::Ok && !new_incident_created) {
            return;
        }

        let still_open = self.incident.as_ref().is_some_and(|i| !i.is_resolved());
        if still_open {
            self.debug(|| "resolving previous incident".to_string());
            if let Some(incident) = self.incident.as_mut() {
                incident.resolve();
            }
        } else {
            self.debug(|| "discarding previous incident".to_string());
            self.incident = None;
        }
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("id", &self.id)
            .field("suppress_incidents", &self.suppress_incidents)
            .field("handlers", &self.handlers.len())
            .field("incident", &self.incident)
            .field("last_check", &self.last_check)
            .field("last_result", &self.last_result)
            .field("executed", &self.executed)
            .finish()
    }
}
