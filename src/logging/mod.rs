//! Logging setup: console output, optional daily-rotated file output,
//! and a retention cleanup task for old log files.

use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::Error;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "vigil=info";

/// Log file base name; daily rotation appends `.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "vigil.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Custom timer that uses the local timezone via chrono, making logs
/// easier to correlate with local time.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Initialize logging.
///
/// `filter` overrides both the environment and the built-in default.
/// When `log_dir` is given, a daily-rotated file layer is added; keep
/// the returned guard alive for the application lifetime.
pub fn init_logging(
    log_dir: Option<&str>,
    filter: Option<&str>,
) -> crate::Result<Option<WorkerGuard>> {
    let env_filter = match filter {
        Some(directive) => EnvFilter::try_new(directive)
            .map_err(|e| Error::config(format!("invalid log filter directive: {e}")))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    let console_layer = fmt::layer().with_ansi(true).with_timer(LocalTimer);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    let guard = match log_dir {
        Some(dir) => {
            let log_path = PathBuf::from(dir);
            std::fs::create_dir_all(&log_path)?;

            let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            registry
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_timer(LocalTimer),
                )
                .try_init()
                .map_err(|e| Error::Other(format!("failed to set global subscriber: {e}")))?;
            Some(guard)
        }
        None => {
            registry
                .try_init()
                .map_err(|e| Error::Other(format!("failed to set global subscriber: {e}")))?;
            None
        }
    };

    Ok(guard)
}

/// Start the daily log retention cleanup task; exits when the token is
/// cancelled.
pub fn start_retention_cleanup(log_dir: PathBuf, cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let cleanup_interval = std::time::Duration::from_secs(24 * 60 * 60);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("log retention cleanup task shutting down");
                    break;
                }
                _ = tokio::time::sleep(cleanup_interval) => {
                    if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                        warn!(error = %e, "failed to cleanup old logs");
                    }
                }
            }
        }
    });
}

/// Delete rotated log files older than the retention period.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let cutoff_ts = cutoff.timestamp();
    let rotated_prefix = format!("{LOG_FILE_PREFIX}.");

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let date_str = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.starts_with(&rotated_prefix) => &name[rotated_prefix.len()..],
            _ => continue,
        };

        if let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            let file_ts = file_date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp())
                .unwrap_or(0);

            if file_ts < cutoff_ts {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "failed to delete old log file");
                } else {
                    deleted_count += 1;
                    debug!(path = %path.display(), "deleted old log file");
                }
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "cleaned up old log files");
    }

    Ok(())
}
