//! Execution schedules for checks.

use chrono::{DateTime, Duration, Utc};

use super::Check;

/// Provides a check's execution schedule.
///
/// Schedules are stateless: everything they need lives on the check
/// itself (notably `last_check`).
pub trait Schedule: Send + Sync {
    /// The exact point in time the check will next be due. May be in
    /// the past.
    fn due_at(&self, check: &Check) -> DateTime<Utc>;

    /// Returns true if the check is currently due.
    fn is_due(&self, check: &Check) -> bool {
        self.due_at(check) <= Utc::now()
    }
}

/// A schedule that is due every `interval_secs` seconds.
///
/// A check that has never executed is due immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicSchedule {
    pub interval_secs: u64,
}

impl PeriodicSchedule {
    pub fn new(interval_secs: u64) -> Self {
        Self { interval_secs }
    }
}

impl Schedule for PeriodicSchedule {
    fn due_at(&self, check: &Check) -> DateTime<Utc> {
        match check.last_check {
            Some(last_check) => last_check + Duration::seconds(self.interval_secs as i64),
            None => Utc::now(),
        }
    }
}
