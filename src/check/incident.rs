//! Incident records for non-OK state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::{CheckResult, CheckState};

/// A record of a check undergoing a non-OK state change.
///
/// An incident stays attached to its check until the check returns to
/// OK (resolving it) and then completes one further cycle (discarding
/// it), or until a different non-OK state replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub from_state: CheckState,
    pub to_state: CheckState,
    pub reason_code: String,
    pub time: DateTime<Utc>,
    /// Set once the check transitions back to OK or to a different
    /// non-OK state.
    pub resolved: Option<DateTime<Utc>>,
    /// Set only by an external actor, never by the poller itself.
    pub acknowledged: Option<DateTime<Utc>>,
}

impl Incident {
    /// Create a new incident from a check's previous result and the
    /// result that triggered the transition.
    pub fn from_results(last_result: Option<&CheckResult>, current: &CheckResult) -> Self {
        let from_state = last_result
            .map(|r| r.state)
            .unwrap_or(CheckState::Unknown);

        Self {
            id: Uuid::new_v4(),
            from_state,
            to_state: current.state,
            reason_code: current.reason_code.clone(),
            time: Utc::now(),
            resolved: None,
            acknowledged: None,
        }
    }

    /// Mark the incident resolved at the current time.
    pub fn resolve(&mut self) {
        self.resolved = Some(Utc::now());
    }

    /// Mark the incident acknowledged at the current time.
    pub fn acknowledge(&mut self) {
        self.acknowledged = Some(Utc::now());
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.is_some()
    }
}
