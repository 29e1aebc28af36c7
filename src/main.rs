//! kafka-archiver: consumes a Kafka topic of access-log lines into per-day
//! local files and ships each closed day to object storage as a zip archive.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use kafka_archiver::config::Config;
use kafka_archiver::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use kafka_archiver::signal::cancel_on_signal;
use kafka_archiver::{metrics, run_pipeline};

/// Kafka topic to zipped daily archives.
#[derive(Parser, Debug)]
#[command(name = "kafka-archiver")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without consuming.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("kafka-archiver starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Brokers: {}", config.source.brokers);
        info!("Topic: {} (group {})", config.source.topic, config.source.group_id);
        info!("Work directory: {}", config.archive.work_directory.display());
        info!("Storage: {}{}", config.storage.url, config.storage.key_prefix);
        info!("Configuration is valid");
        return Ok(());
    }

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let stats = run_pipeline(config, shutdown).await?;

    info!("Archiver stopped");
    info!("  Records ingested: {}", stats.records_ingested);
    info!("  Records skipped: {}", stats.records_skipped);
    info!("  Archives shipped: {}", stats.archives_shipped);
    info!("  Archives failed: {}", stats.archives_failed);

    Ok(())
}
