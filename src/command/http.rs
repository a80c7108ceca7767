//! HTTP probe.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{REASON_CONNECTION_ERROR, REASON_RESP_TIME_EXCEEDED, REASON_UNEXPECTED_RESP};
use crate::check::{
    Check, CheckResult, CheckState, Command, CommandFailure, CommandOutcome, ResultMetric,
};

/// Reason code for a TLS certificate verification failure.
pub const REASON_HTTP_SSL_FAILURE: &str = "HTTP_SSL_FAILURE";

/// Makes an HTTP request, verifies the response status and measures
/// response time against warn/crit thresholds.
///
/// Produces a `resp` gauge metric in milliseconds.
pub struct HttpCommand {
    pub url: String,
    pub method: reqwest::Method,
    pub timeout: Duration,
    pub body: String,
    pub skip_tls_verify: bool,

    pub expected_status: u16,
    pub warn_resp_time: Duration,
    pub crit_resp_time: Duration,
}

impl HttpCommand {
    pub fn new(url: impl Into<String>, expected_status: u16) -> Self {
        Self {
            url: url.into(),
            method: reqwest::Method::GET,
            timeout: Duration::from_secs(10),
            body: String::new(),
            skip_tls_verify: false,
            expected_status,
            warn_resp_time: Duration::from_millis(250),
            crit_resp_time: Duration::from_millis(500),
        }
    }

    pub fn with_method(mut self, method: reqwest::Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_skip_tls_verify(mut self) -> Self {
        self.skip_tls_verify = true;
        self
    }

    pub fn with_resp_time_thresholds(mut self, warn: Duration, crit: Duration) -> Self {
        self.warn_resp_time = warn;
        self.crit_resp_time = crit;
        self
    }

    /// Classify the response code and elapsed time into a state.
    fn evaluate(&self, status: u16, elapsed: Duration) -> (CheckState, &'static str) {
        if status != self.expected_status {
            (CheckState::Crit, REASON_UNEXPECTED_RESP)
        } else if elapsed > self.crit_resp_time {
            (CheckState::Crit, REASON_RESP_TIME_EXCEEDED)
        } else if elapsed > self.warn_resp_time {
            (CheckState::Warn, REASON_RESP_TIME_EXCEEDED)
        } else {
            (CheckState::Ok, "")
        }
    }
}

#[async_trait]
impl Command for HttpCommand {
    async fn run(&self, check: &mut Check) -> CommandOutcome {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.skip_tls_verify)
            .build()
            .map_err(|e| CommandFailure::unknown(e.into()))?;

        check.debug(|| format!("sending {} request to {}", self.method, self.url));

        let start = Instant::now();
        let response = client
            .request(self.method.clone(), &self.url)
            .body(self.body.clone())
            .send()
            .await;
        let elapsed = start.elapsed();

        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return Err(CommandFailure::new(
                    CheckResult::new(CheckState::Crit, REASON_CONNECTION_ERROR, Vec::new()),
                    err.into(),
                ));
            }
            Err(err) if is_certificate_error(&err) => {
                return Err(CommandFailure::new(
                    CheckResult::new(CheckState::Crit, REASON_HTTP_SSL_FAILURE, Vec::new()),
                    err.into(),
                ));
            }
            Err(err) => return Err(CommandFailure::unknown(err.into())),
        };

        let metrics = vec![ResultMetric::gauge(
            "resp",
            format!("{:.3}", elapsed.as_secs_f64() * 1_000.0),
        )];
        let (state, reason_code) = self.evaluate(response.status().as_u16(), elapsed);

        Ok(CheckResult::new(state, reason_code, metrics))
    }
}

/// Walk the error source chain looking for a certificate failure.
fn is_certificate_error(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        let message = inner.to_string();
        if message.contains("certificate") || message.contains("Certificate") {
            return true;
        }
        source = inner.source();
    }
    false
}
