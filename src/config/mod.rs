//! Application configuration.
//!
//! Loaded from a TOML file: server tuning under `[server]`, logging
//! under `[logging]`, and one `[[checks]]` table per configured check.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::check::{Check, Handler};
use crate::command::{HttpCommand, SmtpCommand};
use crate::error::{Error, Result};
use crate::handler::{DummyHandler, StatsdHandler};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub checks: Vec<CheckConfig>,
}

/// Server tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Maximum number of concurrently executing checks.
    pub max_running_checks: usize,
    /// Re-enqueue checks after they finish running.
    pub auto_reenqueue: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_running_checks: 100,
            auto_reenqueue: true,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Directory for rotated log files; console-only when unset.
    pub directory: Option<String>,
    /// Filter directive overriding `RUST_LOG` and the default.
    pub filter: Option<String>,
}

/// One configured check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    pub id: String,
    /// Seconds between executions.
    pub interval_secs: u64,
    #[serde(default)]
    pub suppress_incidents: bool,
    pub command: CommandConfig,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

/// Probe configuration variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandConfig {
    Http {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default)]
        body: String,
        #[serde(default)]
        skip_tls_verify: bool,
        expected_status: u16,
        warn_resp_time_ms: u64,
        crit_resp_time_ms: u64,
    },
    Smtp {
        addr: String,
        #[serde(default = "default_smtp_port")]
        port: u16,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_smtp_send")]
        send: String,
        #[serde(default = "default_smtp_response_code")]
        expected_response_code: u16,
        warn_resp_time_ms: u64,
        crit_resp_time_ms: u64,
    },
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_smtp_port() -> u16 {
    25
}

fn default_smtp_send() -> String {
    "EHLO vigil.local".to_string()
}

fn default_smtp_response_code() -> u16 {
    250
}

/// Handler configuration variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerConfig {
    Dummy {},
    Statsd {
        addr: String,
        #[serde(default)]
        prefix: String,
    },
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config: AppConfig =
            toml::from_str(&raw).map_err(|e| Error::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.max_running_checks == 0 {
            return Err(Error::config("server.max_running_checks must be positive"));
        }

        let mut seen_ids = HashSet::new();
        for check in &self.checks {
            if check.id.is_empty() {
                return Err(Error::config("check id must not be empty"));
            }
            if !seen_ids.insert(check.id.as_str()) {
                return Err(Error::config(format!("duplicate check id '{}'", check.id)));
            }
            if check.interval_secs == 0 {
                return Err(Error::config(format!(
                    "check '{}': interval_secs must be positive",
                    check.id
                )));
            }
        }

        Ok(())
    }

    /// Build runnable checks from the configured definitions.
    pub fn build_checks(&self) -> Result<Vec<Check>> {
        self.checks.iter().map(build_check).collect()
    }
}

fn build_check(config: &CheckConfig) -> Result<Check> {
    let mut check = Check::periodic(config.id.as_str(), config.interval_secs)
        .with_meta(config.meta.clone());

    if config.suppress_incidents {
        check = check.with_suppressed_incidents();
    }

    check = match &config.command {
        CommandConfig::Http {
            url,
            method,
            timeout_secs,
            body,
            skip_tls_verify,
            expected_status,
            warn_resp_time_ms,
            crit_resp_time_ms,
        } => {
            let method = method
                .parse::<reqwest::Method>()
                .map_err(|_| Error::config(format!("invalid HTTP method '{method}'")))?;
            let mut command = HttpCommand::new(url.as_str(), *expected_status)
                .with_method(method)
                .with_timeout(Duration::from_secs(*timeout_secs))
                .with_body(body.clone())
                .with_resp_time_thresholds(
                    Duration::from_millis(*warn_resp_time_ms),
                    Duration::from_millis(*crit_resp_time_ms),
                );
            if *skip_tls_verify {
                command = command.with_skip_tls_verify();
            }
            check.with_command(command)
        }
        CommandConfig::Smtp {
            addr,
            port,
            timeout_secs,
            send,
            expected_response_code,
            warn_resp_time_ms,
            crit_resp_time_ms,
        } => check.with_command(
            SmtpCommand::new(addr.as_str(), *port)
                .with_timeout(Duration::from_secs(*timeout_secs))
                .with_send(send.as_str(), *expected_response_code)
                .with_resp_time_thresholds(
                    Duration::from_millis(*warn_resp_time_ms),
                    Duration::from_millis(*crit_resp_time_ms),
                ),
        ),
    };

    let handlers: Vec<Arc<dyn Handler>> = config
        .handlers
        .iter()
        .map(|handler| -> Arc<dyn Handler> {
            match handler {
                HandlerConfig::Dummy {} => Arc::new(DummyHandler),
                HandlerConfig::Statsd { addr, prefix } => {
                    let handler = StatsdHandler::new(addr.as_str());
                    if prefix.is_empty() {
                        Arc::new(handler)
                    } else {
                        Arc::new(handler.with_prefix(prefix.as_str()))
                    }
                }
            }
        })
        .collect();

    Ok(check.with_handlers(handlers))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        max_running_checks = 25

        [logging]
        filter = "vigil=debug"

        [[checks]]
        id = "web-frontend"
        interval_secs = 60
        [checks.command]
        type = "http"
        url = "https://example.com/health"
        expected_status = 200
        warn_resp_time_ms = 250
        crit_resp_time_ms = 500
        [[checks.handlers]]
        type = "statsd"
        addr = "127.0.0.1:8125"
        prefix = "poller"

        [[checks]]
        id = "mail-relay"
        interval_secs = 120
        suppress_incidents = true
        [checks.command]
        type = "smtp"
        addr = "mail.example.com"
        warn_resp_time_ms = 250
        crit_resp_time_ms = 500
        [[checks.handlers]]
        type = "dummy"
    "#;

    #[test]
    fn test_parse_sample_config() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.max_running_checks, 25);
        assert!(config.server.auto_reenqueue);
        assert_eq!(config.logging.filter.as_deref(), Some("vigil=debug"));
        assert_eq!(config.checks.len(), 2);

        match &config.checks[1].command {
            CommandConfig::Smtp {
                port,
                send,
                expected_response_code,
                ..
            } => {
                assert_eq!(*port, 25);
                assert_eq!(send, "EHLO vigil.local");
                assert_eq!(*expected_response_code, 250);
            }
            other => panic!("expected smtp command, got {other:?}"),
        }
    }

    #[test]
    fn test_build_checks_from_sample() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        let checks = config.build_checks().unwrap();

        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].id(), "web-frontend");
        assert!(checks[1].suppress_incidents);
        // never executed, so due immediately
        assert!(checks[0].is_due());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let config = AppConfig {
            checks: vec![
                CheckConfig {
                    id: "dup".to_string(),
                    interval_secs: 60,
                    suppress_incidents: false,
                    command: CommandConfig::Http {
                        url: "https://example.com".to_string(),
                        method: default_http_method(),
                        timeout_secs: 10,
                        body: String::new(),
                        skip_tls_verify: false,
                        expected_status: 200,
                        warn_resp_time_ms: 250,
                        crit_resp_time_ms: 500,
                    },
                    handlers: Vec::new(),
                    meta: HashMap::new(),
                };
                2
            ],
            ..AppConfig::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate check id"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let raw = r#"
            [[checks]]
            id = "broken"
            interval_secs = 0
            [checks.command]
            type = "http"
            url = "https://example.com"
            expected_status = 200
            warn_resp_time_ms = 250
            crit_resp_time_ms = 500
        "#;

        let config: AppConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_http_method_rejected() {
        let raw = r#"
            [[checks]]
            id = "bad-method"
            interval_secs = 60
            [checks.command]
            type = "http"
            url = "https://example.com"
            method = "GE T"
            expected_status = 200
            warn_resp_time_ms = 250
            crit_resp_time_ms = 500
        "#;

        let config: AppConfig = toml::from_str(raw).unwrap();
        assert!(config.build_checks().is_err());
    }
}
