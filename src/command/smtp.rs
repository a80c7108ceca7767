//! SMTP banner probe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;

use super::{REASON_CONNECTION_ERROR, REASON_RESP_TIME_EXCEEDED, REASON_UNEXPECTED_RESP};
use crate::check::{
    Check, CheckResult, CheckState, Command, CommandFailure, CommandOutcome, ResultMetric,
};
use crate::error::{Error, Result};

/// Reason code for a server whose greeting was not `220`.
pub const REASON_SMTP_NOT_READY: &str = "SMTP_NOT_READY";

/// An established SMTP session.
#[async_trait]
pub trait SmtpSession: Send {
    /// Send a command line and return the response code and the
    /// round-trip time.
    async fn command(&mut self, line: &str) -> Result<(u16, Duration)>;

    async fn close(&mut self) -> Result<()>;
}

/// Connects SMTP sessions. A seam so probes can be tested without a
/// live mail server.
#[async_trait]
pub trait SmtpClient: Send + Sync {
    /// Connect and consume the server greeting.
    ///
    /// Returns [`Error::ServiceNotReady`] when the greeting is not a
    /// `220`, [`Error::Timeout`] when the connection or greeting takes
    /// longer than `timeout`.
    async fn connect(
        &self,
        addr: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn SmtpSession>>;
}

/// The default [`SmtpClient`] speaking over a plain TCP stream.
pub struct TcpSmtpClient;

#[async_trait]
impl SmtpClient for TcpSmtpClient {
    async fn connect(
        &self,
        addr: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn SmtpSession>> {
        let target = format!("{addr}:{port}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| Error::timeout(format!("connecting to {target}")))??;

        let (read_half, write_half) = stream.into_split();
        let mut session = TcpSmtpSession {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
        };

        let (code, _) = session.read_response().await?;
        if code != 220 {
            return Err(Error::ServiceNotReady(format!(
                "smtp greeting returned {code}"
            )));
        }

        Ok(Box::new(session))
    }
}

struct TcpSmtpSession {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl TcpSmtpSession {
    /// Read one (possibly multi-line) SMTP response, returning its code.
    async fn read_response(&mut self) -> Result<(u16, Duration)> {
        let start = Instant::now();
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(self.timeout, self.reader.read_line(&mut line))
                .await
                .map_err(|_| Error::timeout("reading smtp response"))??;
            if read == 0 {
                return Err(Error::probe("smtp connection closed mid-response"));
            }

            if line.len() >= 4 && line.as_bytes()[3] == b' ' {
                let code = line[..3]
                    .parse::<u16>()
                    .map_err(|_| Error::probe(format!("malformed smtp response: {line}")))?;
                return Ok((code, start.elapsed()));
            }
            // continuation line ("250-..."), keep reading
        }
    }
}

#[async_trait]
impl SmtpSession for TcpSmtpSession {
    async fn command(&mut self, line: &str) -> Result<(u16, Duration)> {
        let payload = format!("{line}\r\n");
        tokio::time::timeout(self.timeout, self.writer.write_all(payload.as_bytes()))
            .await
            .map_err(|_| Error::timeout("writing smtp command"))??;

        self.read_response().await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Connects to an SMTP server, sends a greeting command (typically
/// `EHLO`/`HELO`) and verifies the response code and time.
pub struct SmtpCommand {
    client: Arc<dyn SmtpClient>,

    pub addr: String,
    pub port: u16,
    pub timeout: Duration,

    /// Command line sent after the greeting, typically `EHLO <name>`.
    pub send: String,
    /// Expected response code, typically 250.
    pub expected_response_code: u16,

    pub warn_resp_time: Duration,
    pub crit_resp_time: Duration,
}

impl SmtpCommand {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            client: Arc::new(TcpSmtpClient),
            addr: addr.into(),
            port,
            timeout: Duration::from_secs(5),
            send: "EHLO vigil.local".to_string(),
            expected_response_code: 250,
            warn_resp_time: Duration::from_millis(250),
            crit_resp_time: Duration::from_millis(500),
        }
    }

    pub fn with_client(mut self, client: Arc<dyn SmtpClient>) -> Self {
        self.client = client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_send(mut self, line: impl Into<String>, expected_response_code: u16) -> Self {
        self.send = line.into();
        self.expected_response_code = expected_response_code;
        self
    }

    pub fn with_resp_time_thresholds(mut self, warn: Duration, crit: Duration) -> Self {
        self.warn_resp_time = warn;
        self.crit_resp_time = crit;
        self
    }
}

#[async_trait]
impl Command for SmtpCommand {
    async fn run(&self, check: &mut Check) -> CommandOutcome {
        check.debug(|| format!("connecting to smtp {}:{}", self.addr, self.port));

        let mut session = match self.client.connect(&self.addr, self.port, self.timeout).await {
            Ok(session) => session,
            Err(err @ Error::ServiceNotReady(_)) => {
                return Err(CommandFailure::new(
                    CheckResult::new(CheckState::Crit, REASON_SMTP_NOT_READY, Vec::new()),
                    err,
                ));
            }
            Err(err) => {
                return Err(CommandFailure::new(
                    CheckResult::new(CheckState::Crit, REASON_CONNECTION_ERROR, Vec::new()),
                    err,
                ));
            }
        };

        let outcome = session.command(&self.send).await;
        let _ = session.close().await;

        let (code, elapsed) = match outcome {
            Ok(response) => response,
            Err(err @ Error::Timeout(_)) => {
                return Err(CommandFailure::new(
                    CheckResult::new(CheckState::Crit, REASON_CONNECTION_ERROR, Vec::new()),
                    err,
                ));
            }
            Err(err) => return Err(CommandFailure::unknown(err)),
        };

        check.debug(|| format!("smtp response code={code} elapsed={elapsed:?}"));

        let metrics = vec![ResultMetric::gauge(
            "resp",
            format!("{:.3}", elapsed.as_secs_f64() * 1_000.0),
        )];

        let (state, reason_code) = if code != self.expected_response_code {
            (CheckState::Crit, REASON_UNEXPECTED_RESP)
        } else if elapsed > self.crit_resp_time {
            (CheckState::Crit, REASON_RESP_TIME_EXCEEDED)
        } else if elapsed > self.warn_resp_time {
            (CheckState::Warn, REASON_RESP_TIME_EXCEEDED)
        } else {
            (CheckState::Ok, "")
        };

        Ok(CheckResult::new(state, reason_code, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Client whose sessions answer with a fixed code and latency.
    struct ScriptedClient {
        greeting_ready: bool,
        response_code: u16,
        latency: Duration,
    }

    struct ScriptedSession {
        response_code: u16,
        latency: Duration,
    }

    #[async_trait]
    impl SmtpSession for ScriptedSession {
        async fn command(&mut self, _line: &str) -> Result<(u16, Duration)> {
            Ok((self.response_code, self.latency))
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl SmtpClient for ScriptedClient {
        async fn connect(
            &self,
            _addr: &str,
            _port: u16,
            _timeout: Duration,
        ) -> Result<Box<dyn SmtpSession>> {
            if !self.greeting_ready {
                return Err(Error::ServiceNotReady("smtp greeting returned 554".into()));
            }
            Ok(Box::new(ScriptedSession {
                response_code: self.response_code,
                latency: self.latency,
            }))
        }
    }

    fn command_with(client: ScriptedClient) -> SmtpCommand {
        SmtpCommand::new("mail.example.com", 25)
            .with_client(Arc::new(client))
            .with_resp_time_thresholds(Duration::from_millis(250), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_expected_response_is_ok() {
        let cmd = command_with(ScriptedClient {
            greeting_ready: true,
            response_code: 250,
            latency: Duration::from_millis(10),
        });
        let mut check = Check::periodic("smtp", 60);

        let result = cmd.run(&mut check).await.unwrap();
        assert_eq!(result.state, CheckState::Ok);
        assert_eq!(result.metric("resp").unwrap().value, "10.000");
    }

    #[tokio::test]
    async fn test_unexpected_response_is_crit() {
        let cmd = command_with(ScriptedClient {
            greeting_ready: true,
            response_code: 554,
            latency: Duration::from_millis(10),
        });
        let mut check = Check::periodic("smtp", 60);

        let result = cmd.run(&mut check).await.unwrap();
        assert_eq!(result.state, CheckState::Crit);
        assert_eq!(result.reason_code, REASON_UNEXPECTED_RESP);
    }

    #[tokio::test]
    async fn test_slow_response_exceeds_thresholds() {
        let cmd = command_with(ScriptedClient {
            greeting_ready: true,
            response_code: 250,
            latency: Duration::from_millis(300),
        });
        let mut check = Check::periodic("smtp", 60);

        let result = cmd.run(&mut check).await.unwrap();
        assert_eq!(result.state, CheckState::Warn);
        assert_eq!(result.reason_code, REASON_RESP_TIME_EXCEEDED);
    }

    #[tokio::test]
    async fn test_not_ready_greeting_is_crit_with_error() {
        let cmd = command_with(ScriptedClient {
            greeting_ready: false,
            response_code: 0,
            latency: Duration::ZERO,
        });
        let mut check = Check::periodic("smtp", 60);

        let failure = cmd.run(&mut check).await.unwrap_err();
        assert_eq!(failure.result.state, CheckState::Crit);
        assert_eq!(failure.result.reason_code, REASON_SMTP_NOT_READY);
        assert!(matches!(failure.error, Error::ServiceNotReady(_)));
    }
}
