//! SNMP GET probe with per-OID threshold monitors.
//!
//! The wire protocol lives behind the [`SnmpGetter`] seam; this module
//! owns the interesting part: turning fetched objects into a single
//! result. Counter-typed objects are compared against thresholds by
//! their per-cycle delta (with rollover recovery), gauges by their raw
//! value. Per-OID sub-results aggregate by severity: a strictly more
//! severe state overrides the running one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::REASON_CONNECTION_ERROR;
use crate::check::counter::{CounterWidth, counter_delta};
use crate::check::{
    Check, CheckResult, CheckState, Command, CommandFailure, CommandOutcome, ResultMetric,
};
use crate::error::{Error, Result};

/// SNMP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
    V3,
}

/// An SNMP agent to query.
#[derive(Debug, Clone)]
pub struct SnmpHost {
    pub addr: String,
    pub port: u16,
    pub community: String,
    pub version: SnmpVersion,
    pub timeout: Duration,
}

impl SnmpHost {
    pub fn new(addr: impl Into<String>, community: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            port: 161,
            community: community.into(),
            version: SnmpVersion::V2c,
            timeout: Duration::from_secs(3),
        }
    }
}

/// A value fetched for one OID.
#[derive(Debug, Clone)]
pub enum SnmpValue {
    Counter32(u32),
    Counter64(u64),
    Gauge32(u32),
    Integer(i64),
    TimeTicks(u32),
    OctetString(String),
}

impl SnmpValue {
    /// Integer interpretation of the value; non-numeric types read as
    /// zero.
    pub fn as_int(&self) -> i128 {
        match self {
            SnmpValue::Counter32(v) => *v as i128,
            SnmpValue::Counter64(v) => *v as i128,
            SnmpValue::Gauge32(v) => *v as i128,
            SnmpValue::Integer(v) => *v as i128,
            SnmpValue::TimeTicks(v) => *v as i128,
            SnmpValue::OctetString(_) => 0,
        }
    }

    /// The counter width for counter-typed values, None otherwise.
    pub fn counter_width(&self) -> Option<CounterWidth> {
        match self {
            SnmpValue::Counter32(_) => Some(CounterWidth::Bits32),
            SnmpValue::Counter64(_) => Some(CounterWidth::Bits64),
            _ => None,
        }
    }
}

/// An OID paired with its fetched value.
#[derive(Debug, Clone)]
pub struct SnmpObject {
    pub oid: String,
    pub value: SnmpValue,
}

/// Fetches SNMP objects from an agent.
///
/// Implementations own the wire protocol and their own timeouts; a
/// request timeout is reported as [`Error::Timeout`].
#[async_trait]
pub trait SnmpGetter: Send + Sync {
    async fn get(&self, host: &SnmpHost, oids: &[String]) -> Result<Vec<SnmpObject>>;
}

/// Thresholds and identity for one monitored OID.
///
/// A threshold only participates when its reason code is non-empty.
/// Min thresholds fire when the value drops below them, max thresholds
/// when it rises above.
#[derive(Debug, Clone)]
pub struct OidMonitor {
    pub oid: String,
    /// Metric label for this OID's value.
    pub name: String,
    /// Multiplier applied to gauge values before they are recorded.
    /// Not applied to counters.
    pub post_process_value: f64,

    pub warn_min_threshold: i64,
    pub crit_min_threshold: i64,
    pub warn_max_threshold: i64,
    pub crit_max_threshold: i64,
    pub warn_min_reason_code: String,
    pub crit_min_reason_code: String,
    pub warn_max_reason_code: String,
    pub crit_max_reason_code: String,
}

impl OidMonitor {
    pub fn new(oid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            name: name.into(),
            post_process_value: 1.0,
            warn_min_threshold: 0,
            crit_min_threshold: 0,
            warn_max_threshold: 0,
            crit_max_threshold: 0,
            warn_min_reason_code: String::new(),
            crit_min_reason_code: String::new(),
            warn_max_reason_code: String::new(),
            crit_max_reason_code: String::new(),
        }
    }

    pub fn with_min_thresholds(
        mut self,
        warn: i64,
        warn_reason: impl Into<String>,
        crit: i64,
        crit_reason: impl Into<String>,
    ) -> Self {
        self.warn_min_threshold = warn;
        self.warn_min_reason_code = warn_reason.into();
        self.crit_min_threshold = crit;
        self.crit_min_reason_code = crit_reason.into();
        self
    }

    pub fn with_max_thresholds(
        mut self,
        warn: i64,
        warn_reason: impl Into<String>,
        crit: i64,
        crit_reason: impl Into<String>,
    ) -> Self {
        self.warn_max_threshold = warn;
        self.warn_max_reason_code = warn_reason.into();
        self.crit_max_threshold = crit;
        self.crit_max_reason_code = crit_reason.into();
        self
    }

    pub fn with_post_process_value(mut self, factor: f64) -> Self {
        self.post_process_value = factor;
        self
    }

    /// Compare a value (raw gauge or counter delta) to the thresholds.
    fn evaluate(&self, value: i128) -> (CheckState, &str) {
        if !self.crit_min_reason_code.is_empty() && value < self.crit_min_threshold as i128 {
            (CheckState::Crit, &self.crit_min_reason_code)
        } else if !self.warn_min_reason_code.is_empty() && value < self.warn_min_threshold as i128 {
            (CheckState::Warn, &self.warn_min_reason_code)
        } else if !self.crit_max_reason_code.is_empty() && value > self.crit_max_threshold as i128 {
            (CheckState::Crit, &self.crit_max_reason_code)
        } else if !self.warn_max_reason_code.is_empty() && value > self.warn_max_threshold as i128 {
            (CheckState::Warn, &self.warn_max_reason_code)
        } else {
            (CheckState::Ok, "")
        }
    }
}

/// Fetches a set of OIDs from one agent and evaluates each against its
/// monitor.
pub struct SnmpCommand {
    pub host: SnmpHost,
    pub monitors: Vec<OidMonitor>,
    getter: Arc<dyn SnmpGetter>,
}

impl SnmpCommand {
    pub fn new(host: SnmpHost, monitors: Vec<OidMonitor>, getter: Arc<dyn SnmpGetter>) -> Self {
        Self {
            host,
            monitors,
            getter,
        }
    }

    fn monitor_for_oid<'a>(
        monitors_by_oid: &'a HashMap<&str, &OidMonitor>,
        oid: &str,
    ) -> Option<&'a OidMonitor> {
        monitors_by_oid
            .get(oid)
            .or_else(|| oid.strip_prefix('.').and_then(|o| monitors_by_oid.get(o)))
            .copied()
    }
}

#[async_trait]
impl Command for SnmpCommand {
    async fn run(&self, check: &mut Check) -> CommandOutcome {
        let oids: Vec<String> = self.monitors.iter().map(|m| m.oid.clone()).collect();
        let monitors_by_oid: HashMap<&str, &OidMonitor> = self
            .monitors
            .iter()
            .map(|m| (m.oid.as_str(), m))
            .collect();

        check.debug(|| format!("fetching {} oid(s) from {}", oids.len(), self.host.addr));

        let objects = match self.getter.get(&self.host, &oids).await {
            Ok(objects) => objects,
            Err(Error::Timeout(_)) => {
                // a quiet agent is a connectivity condition, not a
                // command defect
                return Ok(CheckResult::unknown(REASON_CONNECTION_ERROR));
            }
            Err(err) => return Err(CommandFailure::unknown(err)),
        };

        check.debug(|| format!("{} object(s) returned", objects.len()));

        let mut state = CheckState::Unknown;
        let mut reason_code = String::new();
        let mut metrics = Vec::with_capacity(objects.len());

        for object in &objects {
            let Some(monitor) = Self::monitor_for_oid(&monitors_by_oid, &object.oid) else {
                return Err(CommandFailure::unknown(Error::probe(format!(
                    "oid {} could not be found in monitors",
                    object.oid
                ))));
            };

            let (oid_state, oid_reason, metric) = match object.value.counter_width() {
                Some(width) => {
                    let current = object.value.as_int() as u64;

                    // delta against the previous cycle's sample; a
                    // missing prior sample reads as zero
                    let last = check
                        .last_result
                        .as_ref()
                        .and_then(|r| r.metric(&monitor.name))
                        .and_then(|m| m.value.parse::<u64>().ok())
                        .unwrap_or(0);
                    let delta = counter_delta(last, current, width);

                    let (oid_state, oid_reason) = monitor.evaluate(delta as i128);
                    (
                        oid_state,
                        oid_reason,
                        ResultMetric::counter(&monitor.name, current.to_string()),
                    )
                }
                None => {
                    let raw = object.value.as_int();
                    let (oid_state, oid_reason) = monitor.evaluate(raw);
                    let processed = raw as f64 * monitor.post_process_value;
                    (
                        oid_state,
                        oid_reason,
                        ResultMetric::gauge(&monitor.name, format_gauge(processed)),
                    )
                }
            };

            if oid_state.overrides(state) {
                state = oid_state;
                reason_code = oid_reason.to_string();
            }
            metrics.push(metric);
        }

        Ok(CheckResult::new(state, reason_code, metrics))
    }
}

/// Render a post-processed gauge without a trailing `.0` for whole
/// numbers.
fn format_gauge(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct StaticGetter {
        responses: Mutex<Vec<Result<Vec<SnmpObject>>>>,
    }

    impl StaticGetter {
        fn once(objects: Vec<SnmpObject>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(vec![Ok(objects)]),
            })
        }

        fn sequence(responses: Vec<Result<Vec<SnmpObject>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl SnmpGetter for StaticGetter {
        async fn get(&self, _host: &SnmpHost, _oids: &[String]) -> Result<Vec<SnmpObject>> {
            self.responses.lock().remove(0)
        }
    }

    fn host() -> SnmpHost {
        SnmpHost::new("198.51.100.10", "public")
    }

    fn octets_monitor() -> OidMonitor {
        // warn when fewer than 10,000 octets moved, crit below 999
        OidMonitor::new(".1.3.6.1.2.1.2.2.1.10.1", "ifInOctets").with_min_thresholds(
            10_000,
            "LOW_TRAFFIC_WARN",
            999,
            "LOW_TRAFFIC_CRIT",
        )
    }

    #[tokio::test]
    async fn test_counter_rollover_feeds_thresholds() {
        let getter = StaticGetter::once(vec![SnmpObject {
            oid: ".1.3.6.1.2.1.2.2.1.10.1".to_string(),
            value: SnmpValue::Counter32(4_999),
        }]);
        let cmd = SnmpCommand::new(host(), vec![octets_monitor()], getter);

        let mut check = Check::periodic("rollover", 60);
        check.last_result = Some(CheckResult::new(
            CheckState::Ok,
            "",
            vec![ResultMetric::counter("ifInOctets", "4294962295")],
        ));

        // delta across the 32-bit wrap is 9,999: above the crit floor,
        // below the warn floor
        let result = cmd.run(&mut check).await.unwrap();
        assert_eq!(result.state, CheckState::Warn);
        assert_eq!(result.reason_code, "LOW_TRAFFIC_WARN");
        assert_eq!(result.metric("ifInOctets").unwrap().value, "4999");
    }

    #[tokio::test]
    async fn test_64bit_counter_rollover() {
        let monitor = OidMonitor::new(".1.3.6.1.2.1.31.1.1.1.6.1", "ifHCInOctets")
            .with_min_thresholds(1_000, "LOW", 100, "VERY_LOW");
        let getter = StaticGetter::once(vec![SnmpObject {
            oid: ".1.3.6.1.2.1.31.1.1.1.6.1".to_string(),
            value: SnmpValue::Counter64(1_099),
        }]);
        let cmd = SnmpCommand::new(host(), vec![monitor], getter);

        let mut check = Check::periodic("rollover64", 60);
        check.last_result = Some(CheckResult::new(
            CheckState::Ok,
            "",
            vec![ResultMetric::counter(
                "ifHCInOctets",
                "18446744073709551515",
            )],
        ));

        // 64-bit wrap delta is 1,199, clearing both floors
        let result = cmd.run(&mut check).await.unwrap();
        assert_eq!(result.state, CheckState::Ok);
    }

    #[tokio::test]
    async fn test_gauge_post_processing_and_thresholds() {
        let monitor = OidMonitor::new(".1.3.6.1.4.1.9.9.13.1.3.1.3.1", "temperature")
            .with_max_thresholds(70, "HOT", 90, "CRITICAL_HOT")
            .with_post_process_value(0.5);
        let getter = StaticGetter::once(vec![SnmpObject {
            oid: ".1.3.6.1.4.1.9.9.13.1.3.1.3.1".to_string(),
            value: SnmpValue::Gauge32(160),
        }]);
        let cmd = SnmpCommand::new(host(), vec![monitor], getter);

        let mut check = Check::periodic("gauge", 60);
        let result = cmd.run(&mut check).await.unwrap();

        // raw value 160 trips the crit-max threshold; the recorded
        // metric carries the post-processed value
        assert_eq!(result.state, CheckState::Crit);
        assert_eq!(result.reason_code, "CRITICAL_HOT");
        assert_eq!(result.metric("temperature").unwrap().value, "80");
    }

    #[tokio::test]
    async fn test_severity_override_across_oids() {
        let ok_monitor = OidMonitor::new(".1.3.6.1.2.1.1.3.0", "uptime");
        let warn_monitor = OidMonitor::new(".1.3.6.1.4.1.2021.10.1.5.1", "load")
            .with_max_thresholds(100, "HIGH_LOAD", 1_000, "VERY_HIGH_LOAD");

        let getter = StaticGetter::once(vec![
            SnmpObject {
                oid: ".1.3.6.1.2.1.1.3.0".to_string(),
                value: SnmpValue::TimeTicks(12_345),
            },
            SnmpObject {
                oid: ".1.3.6.1.4.1.2021.10.1.5.1".to_string(),
                value: SnmpValue::Gauge32(250),
            },
        ]);
        let cmd = SnmpCommand::new(host(), vec![ok_monitor, warn_monitor], getter);

        let mut check = Check::periodic("multi-oid", 60);
        let result = cmd.run(&mut check).await.unwrap();

        // the first OID evaluates OK, the second WARN overrides it
        assert_eq!(result.state, CheckState::Warn);
        assert_eq!(result.reason_code, "HIGH_LOAD");
        assert_eq!(result.metrics.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_reads_as_connection_error() {
        let getter = StaticGetter::sequence(vec![Err(Error::timeout("request timeout"))]);
        let cmd = SnmpCommand::new(host(), vec![octets_monitor()], getter);

        let mut check = Check::periodic("quiet-agent", 60);
        let result = cmd.run(&mut check).await.unwrap();

        assert_eq!(result.state, CheckState::Unknown);
        assert_eq!(result.reason_code, REASON_CONNECTION_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_oid_in_response_fails() {
        let getter = StaticGetter::once(vec![SnmpObject {
            oid: ".9.9.9.9".to_string(),
            value: SnmpValue::Integer(1),
        }]);
        let cmd = SnmpCommand::new(host(), vec![octets_monitor()], getter);

        let mut check = Check::periodic("stray-oid", 60);
        let failure = cmd.run(&mut check).await.unwrap_err();

        assert_eq!(failure.result.state, CheckState::Unknown);
        assert!(failure.error.to_string().contains(".9.9.9.9"));
    }

    #[tokio::test]
    async fn test_leading_dot_oid_resolves_to_monitor() {
        let monitor = OidMonitor::new("1.3.6.1.2.1.1.3.0", "uptime");
        let getter = StaticGetter::once(vec![SnmpObject {
            oid: ".1.3.6.1.2.1.1.3.0".to_string(),
            value: SnmpValue::TimeTicks(500),
        }]);
        let cmd = SnmpCommand::new(host(), vec![monitor], getter);

        let mut check = Check::periodic("dotted", 60);
        let result = cmd.run(&mut check).await.unwrap();
        assert_eq!(result.metric("uptime").unwrap().value, "500");
    }
}
