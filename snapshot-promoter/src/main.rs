//! Snapshot Promoter - Main entry point
//!
//! Promotes the latest snapshot of a DB instance to a target region and
//! applies the retention policy there.

use anyhow::{Context, Result};
use clap::Parser;
use snapshot_promoter::{
    config::{Config, LocationConfig},
    daemon::shutdown::ShutdownCoordinator,
    store::{http::HttpSnapshotStore, SnapshotStore},
    utils, Promotion,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source DB instance name
    #[arg(long)]
    db_name: Option<String>,

    /// Copy all tags from the source snapshot to the target snapshot
    #[arg(long)]
    copy_tags: Option<bool>,

    /// KMS key ID or ARN in target region, when specified the snapshot copy will be encrypted
    #[arg(long)]
    kms_key_id: Option<String>,

    /// After successful copy, remove snapshots older than specified retention days
    #[arg(long)]
    retention: Option<u32>,

    /// Region where the snapshot is located
    #[arg(long)]
    source_region: Option<String>,

    /// Snapshot store API endpoint of the source region
    #[arg(long)]
    source_endpoint: Option<String>,

    /// Region where the snapshot will be copied to (default same as source-region)
    #[arg(long)]
    target_region: Option<String>,

    /// Snapshot store API endpoint of the target region (required when the target region differs)
    #[arg(long)]
    target_endpoint: Option<String>,

    /// Timeout in minutes when copy operation isn't progressing
    #[arg(long)]
    progress_timeout: Option<u64>,

    /// Seconds between two copy progress polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Report snapshots outside the retention window without deleting them
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    /// Flags win over the configuration file
    fn apply(self, config: &mut Config) {
        if let Some(db_name) = self.db_name {
            config.db_name = Some(db_name);
        }
        if let Some(copy_tags) = self.copy_tags {
            config.copy.copy_tags = copy_tags;
        }
        if let Some(kms_key_id) = self.kms_key_id {
            config.copy.kms_key_id = Some(kms_key_id);
        }
        if let Some(days) = self.retention {
            config.retention.days = days;
        }
        if let Some(region) = self.source_region {
            config.source.region = region;
        }
        if let Some(endpoint) = self.source_endpoint {
            config.source.endpoint = endpoint;
        }
        if self.target_region.is_some() || self.target_endpoint.is_some() {
            let target = config.target.get_or_insert_with(|| config.source.clone());
            if let Some(region) = self.target_region {
                target.region = region;
            }
            if let Some(endpoint) = self.target_endpoint {
                target.endpoint = endpoint;
            }
        }
        if let Some(minutes) = self.progress_timeout {
            config.copy.progress_timeout_minutes = minutes;
        }
        if let Some(secs) = self.poll_interval {
            config.copy.poll_interval_secs = secs;
        }
        if self.dry_run {
            config.retention.dry_run = true;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
    }
}

async fn connect(location: &LocationConfig, timeout: Duration) -> Result<Arc<dyn SnapshotStore>> {
    let store = HttpSnapshotStore::connect(&location.region, &location.endpoint, location.token.clone(), timeout)
        .await
        .with_context(|| format!("connecting to snapshot store in {}", location.region))?;
    Ok(Arc::new(store))
}

async fn run(config: Config) -> Result<()> {
    let plan = config.plan()?;

    let shutdown = ShutdownCoordinator::new();
    let listener = shutdown.spawn_signal_listener();

    let source = connect(&config.source, config.request_timeout()).await?;
    let target = connect(config.target(), config.request_timeout()).await?;

    let report = Promotion::new(source, target, plan)
        .with_cancel(shutdown.token())
        .run()
        .await;
    listener.abort();

    let report = report?;
    for failure in &report.prune.failures {
        tracing::warn!("snapshot {} was not deleted: {}", failure.snapshot_id, failure.reason);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {:#}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    args.apply(&mut config);

    // Initialize logging
    if let Err(e) = utils::logger::init(&config.log.level) {
        eprintln!("failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!("Starting snapshot-promoter v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
