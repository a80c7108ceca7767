//! Handler shipping result metrics to a statsd server over UDP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::check::{Check, CheckResult, Handler, Incident};
use crate::error::{Error, Result};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the statsd path prefix for a given check and result.
pub type MetricPrefixFn = Arc<dyn Fn(&Check, &CheckResult) -> String + Send + Sync>;

/// Ships each result metric as a statsd gauge.
pub struct StatsdHandler {
    /// `host:port` of the statsd server.
    addr: String,
    metric_prefix: Option<MetricPrefixFn>,
}

impl StatsdHandler {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            metric_prefix: None,
        }
    }

    /// Prefix every metric path with a fixed string.
    pub fn with_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.with_prefix_fn(move |_, _| prefix.clone())
    }

    /// Derive the metric path prefix from the check and result.
    pub fn with_prefix_fn(
        mut self,
        prefix: impl Fn(&Check, &CheckResult) -> String + Send + Sync + 'static,
    ) -> Self {
        self.metric_prefix = Some(Arc::new(prefix));
        self
    }

    fn build_protocol_message(&self, check: &Check, result: &CheckResult) -> String {
        let prefix = self
            .metric_prefix
            .as_ref()
            .map(|f| f(check, result))
            .unwrap_or_default();
        let prefix = prefix.trim_end_matches('.');

        let mut message = String::new();
        for metric in &result.metrics {
            let path = if prefix.is_empty() {
                metric.label.clone()
            } else {
                format!("{prefix}.{}", metric.label)
            };

            // statsd treats a signed value as a gauge delta; reset to
            // zero first so a negative value lands absolutely
            if metric.value.starts_with('-') {
                message.push_str(&format!("{path}:0|g\n"));
            }
            message.push_str(&format!("{path}:{}|g\n", metric.value));
        }
        message
    }
}

#[async_trait]
impl Handler for StatsdHandler {
    fn name(&self) -> &'static str {
        "statsd"
    }

    async fn process(
        &self,
        check: &Check,
        result: &CheckResult,
        _new_incident: Option<&Incident>,
    ) -> Result<()> {
        if result.metrics.is_empty() {
            return Ok(());
        }

        let message = self.build_protocol_message(check, result);
        check.debug(|| format!("shipping {} byte(s) to statsd {}", message.len(), self.addr));

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        tokio::time::timeout(SEND_TIMEOUT, socket.send_to(message.as_bytes(), self.addr.as_str()))
            .await
            .map_err(|_| Error::timeout(format!("sending to statsd {}", self.addr)))??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckState, ResultMetric};

    fn result_with(metrics: Vec<ResultMetric>) -> CheckResult {
        CheckResult::new(CheckState::Ok, "", metrics)
    }

    #[test]
    fn test_message_without_prefix() {
        let handler = StatsdHandler::new("127.0.0.1:8125");
        let check = Check::periodic("web", 60);
        let result = result_with(vec![ResultMetric::gauge("resp", "12.500")]);

        assert_eq!(
            handler.build_protocol_message(&check, &result),
            "resp:12.500|g\n"
        );
    }

    #[test]
    fn test_message_with_prefix_trims_trailing_dot() {
        let handler = StatsdHandler::new("127.0.0.1:8125").with_prefix("checks.web.");
        let check = Check::periodic("web", 60);
        let result = result_with(vec![ResultMetric::gauge("resp", "12.500")]);

        assert_eq!(
            handler.build_protocol_message(&check, &result),
            "checks.web.resp:12.500|g\n"
        );
    }

    #[test]
    fn test_negative_gauge_gets_reset_line() {
        let handler = StatsdHandler::new("127.0.0.1:8125").with_prefix("checks");
        let check = Check::periodic("web", 60);
        let result = result_with(vec![ResultMetric::gauge("drift", "-4")]);

        assert_eq!(
            handler.build_protocol_message(&check, &result),
            "checks.drift:0|g\nchecks.drift:-4|g\n"
        );
    }

    #[test]
    fn test_prefix_fn_sees_check() {
        let handler = StatsdHandler::new("127.0.0.1:8125")
            .with_prefix_fn(|check, _| format!("poller.{}", check.id()));
        let check = Check::periodic("mail", 60);
        let result = result_with(vec![ResultMetric::gauge("resp", "3")]);

        assert_eq!(
            handler.build_protocol_message(&check, &result),
            "poller.mail.resp:3|g\n"
        );
    }

    #[tokio::test]
    async fn test_process_sends_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap();

        let handler = StatsdHandler::new(addr.to_string()).with_prefix("t");
        let check = Check::periodic("udp", 60);
        let result = result_with(vec![ResultMetric::gauge("resp", "1")]);

        handler.process(&check, &result, None).await.unwrap();

        let mut buf = [0_u8; 128];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"t.resp:1|g\n");
    }

    #[tokio::test]
    async fn test_no_metrics_sends_nothing() {
        // an unroutable addr would error if a send were attempted
        let handler = StatsdHandler::new("invalid:99999");
        let check = Check::periodic("silent", 60);
        let result = result_with(Vec::new());

        handler.process(&check, &result, None).await.unwrap();
    }
}
