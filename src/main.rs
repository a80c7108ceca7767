use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil::config::AppConfig;
use vigil::logging;
use vigil::queue::{CheckQueue, MemoryQueue};
use vigil::server::Server;

#[derive(Debug, Parser)]
#[command(name = "vigil", about = "Periodic service-monitoring poller")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "vigil.toml")]
    config: PathBuf,

    /// Log filter directive, overriding the config file and RUST_LOG.
    #[arg(long)]
    log_filter: Option<String>,

    /// Override the configured concurrency cap.
    #[arg(long)]
    max_running_checks: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;

    let filter = args.log_filter.as_deref().or(config.logging.filter.as_deref());
    let _guard = logging::init_logging(config.logging.directory.as_deref(), filter)?;

    let cancel_token = CancellationToken::new();
    if let Some(dir) = &config.logging.directory {
        logging::start_retention_cleanup(PathBuf::from(dir), cancel_token.clone());
    }

    let queue = Arc::new(MemoryQueue::new());
    for check in config.build_checks()? {
        queue.enqueue(check);
    }
    info!(checks = queue.count(), "seeded check queue");

    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    let mut server = Server::new(queue.clone() as Arc<dyn CheckQueue>)
        .on_check_executing(|check| {
            debug!(check_id = %check.id(), "executing check");
        })
        .on_check_errored(|check, err| {
            warn!(check_id = %check.id(), error = %err, "check errored");
        })
        .on_check_finished(|check, elapsed| {
            debug!(check_id = %check.id(), elapsed_ms = elapsed.as_millis() as u64, "check finished");
        });

    let max_running = args
        .max_running_checks
        .unwrap_or(config.server.max_running_checks);
    server = server.with_max_running_checks(max_running);
    if !config.server.auto_reenqueue {
        server = server.without_auto_reenqueue();
    }

    server.run(cancel_token).await;

    info!(remaining = queue.count(), "shut down cleanly");
    Ok(())
}
