//! Prometheus exporter for tailed log files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use tailsight_common::{LineFormat, init_tracing};
use tailsight_exporter::{
    ExporterConfig, HttpServer, MetricCollector, SourceConfig, SystemClock,
};

/// Prometheus exporter for tailed log files.
#[derive(Parser, Debug)]
#[command(name = "tailsight-exporter")]
#[command(about = "Export windowed request and connection pool metrics from log files")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error). Overrides config.
    #[arg(long)]
    log_level: Option<String>,

    /// Request log to monitor, in addition to configured sources.
    #[arg(long)]
    request_log: Option<PathBuf>,

    /// Connection pool log to monitor, in addition to configured sources.
    #[arg(long)]
    pool_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // Apply CLI overrides
    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(path) = args.request_log {
        config
            .sources
            .push(SourceConfig::new("requests", path, LineFormat::Request));
    }
    if let Some(path) = args.pool_log {
        config
            .sources
            .push(SourceConfig::new("pool", path, LineFormat::Pool));
    }

    config.validate()?;
    init_tracing(&config.logging)?;

    info!(sources = config.sources.len(), "Starting TailSight exporter");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let collector = Arc::new(MetricCollector::from_config(
        &config,
        Arc::new(SystemClock),
    ));

    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // One tailer task per source
    let mut tasks = Vec::with_capacity(collector.sources().len() + 1);
    for source in collector.sources() {
        info!(
            source = %source.name(),
            path = %source.path().display(),
            format = %source.format(),
            "Monitoring log file"
        );
        tasks.push(tokio::spawn(source.clone().run(shutdown_rx.clone())));
    }

    // Start HTTP server
    let http_server = HttpServer::new(
        collector.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );
    let http_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    }));

    wait_for_signal().await;

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let joined = tokio::time::timeout(Duration::from_secs(5), async {
        for task in tasks {
            let _ = task.await;
        }
    })
    .await;
    if joined.is_err() {
        warn!("Timed out waiting for tasks to stop");
    }

    // Print final stats
    for (name, stats) in collector.stats() {
        info!(
            source = %name,
            lines = stats.lines,
            unparsed = stats.unparsed,
            rotations = stats.rotations,
            open_failures = stats.open_failures,
            "Final statistics"
        );
    }

    info!("Exporter stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_signal() {
    let terminate = async {
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
