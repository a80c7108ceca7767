//! Check results and their metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Check;

/// Reason code used when a command fails outright or is missing.
pub const REASON_CMD_FAILURE: &str = "CMD_FAILURE";

/// Health state produced by a single check execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckState {
    Ok,
    Warn,
    Crit,
    Unknown,
}

impl CheckState {
    /// Severity ordering used when aggregating sub-results:
    /// Unknown < Ok < Warn < Crit.
    pub fn severity(self) -> u8 {
        match self {
            CheckState::Unknown => 0,
            CheckState::Ok => 1,
            CheckState::Warn => 2,
            CheckState::Crit => 3,
        }
    }

    /// Returns true if this state is strictly more severe than `current`
    /// and should replace it when aggregating.
    pub fn overrides(self, current: CheckState) -> bool {
        self.severity() > current.severity()
    }

    pub fn is_ok(self) -> bool {
        self == CheckState::Ok
    }
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckState::Ok => write!(f, "OK"),
            CheckState::Warn => write!(f, "WARN"),
            CheckState::Crit => write!(f, "CRIT"),
            CheckState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Kind of a result metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// An ever-incrementing value that rolls over at its integer width.
    Counter,
    /// A point-in-time numeric value.
    Gauge,
}

/// A labeled value produced by a command.
///
/// The value is kept as a decimal string so it can hold any numeric
/// width; consumers parse it into whatever type they need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetric {
    /// Identifier for the metric (e.g. `resp`, `ifHCInOctets`).
    pub label: String,
    /// Decimal string representation of the metric's value.
    pub value: String,
    pub kind: MetricKind,
}

impl ResultMetric {
    pub fn counter(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            kind: MetricKind::Counter,
        }
    }

    pub fn gauge(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            kind: MetricKind::Gauge,
        }
    }
}

/// The state, reason, metrics and time produced by one command run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub state: CheckState,
    /// Short opaque tag explaining a non-OK state; empty for OK.
    pub reason_code: String,
    pub metrics: Vec<ResultMetric>,
    pub time: DateTime<Utc>,
}

impl CheckResult {
    /// Create a new result stamped with the current time.
    pub fn new(
        state: CheckState,
        reason_code: impl Into<String>,
        metrics: Vec<ResultMetric>,
    ) -> Self {
        Self {
            state,
            reason_code: reason_code.into(),
            metrics,
            time: Utc::now(),
        }
    }

    /// Create a zero-metric UNKNOWN result.
    ///
    /// Unknown states are common during command errors where a
    /// definitive state cannot be determined.
    pub fn unknown(reason_code: impl Into<String>) -> Self {
        Self::new(CheckState::Unknown, reason_code, Vec::new())
    }

    /// Find a metric by label.
    pub fn metric(&self, label: &str) -> Option<&ResultMetric> {
        self.metrics.iter().find(|m| m.label == label)
    }

    /// Determine whether this result, for the given check, represents a
    /// state change that justifies opening a new incident.
    pub(crate) fn justifies_new_incident(&self, check: &Check) -> bool {
        if check.suppress_incidents {
            return false;
        }

        if self.state == CheckState::Ok {
            return false;
        }

        // non-OK with a current incident: only a *different* non-OK
        // state warrants a fresh incident
        if let Some(incident) = &check.incident {
            return incident.to_state != self.state;
        }

        // non-OK, no incident, but prior history exists
        if let Some(last_result) = &check.last_result {
            return last_result.state != self.state;
        }

        // first non-OK observation ever
        true
    }
}
