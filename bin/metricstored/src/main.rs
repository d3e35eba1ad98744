//! Metricstore daemon
//!
//! Serves the metric repository with its cache and maintenance tasks, and
//! offers one-shot admin commands against the same data directory.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use metricstore_cache::{BucketManager, BucketMetricCache, CachePeriodWorker, CacheWindow};
use metricstore_common::config::LogFormat;
use metricstore_common::{Config, Document, Interval};
use metricstore_storage::{FilesystemMetricRepository, MetricRepository, TaskScheduler};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "metricstored")]
#[command(about = "Metricstore time-series metric store")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "METRICSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory of the bucket store
    #[arg(long)]
    base_path: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the store until interrupted
    Serve,

    /// List buckets
    List,

    /// Write newline-delimited JSON documents read from stdin
    Write {
        #[arg(short, long)]
        bucket: String,

        /// Bucket type recorded when the bucket is created
        #[arg(short = 't', long = "type")]
        bucket_type: Option<String>,
    },

    /// Print the documents of an interval as JSON lines
    Read {
        #[arg(short, long)]
        bucket: String,

        /// Inclusive start (RFC 3339)
        #[arg(long)]
        from: DateTime<Utc>,

        /// Exclusive end (RFC 3339)
        #[arg(long)]
        to: DateTime<Utc>,
    },

    /// Compress the days of a bucket before a date
    Compress {
        #[arg(short, long)]
        bucket: String,

        /// First day left untouched (YYYY-MM-DD)
        #[arg(long)]
        until: NaiveDate,
    },

    /// Delete the days of a bucket before a date
    Delete {
        #[arg(short, long)]
        bucket: String,

        /// First day kept (YYYY-MM-DD)
        #[arg(long)]
        until: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(base_path) = args.base_path {
        config.storage.base_path = base_path;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging.level, config.logging.format);

    match args.command {
        Commands::Serve => serve(config).await,
        Commands::List => list(&config),
        Commands::Write {
            bucket,
            bucket_type,
        } => write(&config, &bucket, bucket_type.as_deref()),
        Commands::Read { bucket, from, to } => read(&config, &bucket, from, to),
        Commands::Compress { bucket, until } => {
            let repository = FilesystemMetricRepository::open(&config)?;
            let compressed = repository.compress(&bucket, until)?.wait()?;
            println!("Compressed {compressed} days of {bucket}");
            Ok(())
        }
        Commands::Delete { bucket, until } => {
            let repository = FilesystemMetricRepository::open(&config)?;
            let deleted = repository.delete(&bucket, until)?.wait()?;
            println!("Deleted {deleted} days of {bucket}");
            Ok(())
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting Metricstore");
    info!("Base path: {:?}", config.storage.base_path);
    info!(
        "Queue: {:?} (capacity {}, wait strategy {:?})",
        config.queue.backend, config.queue.capacity, config.queue.wait_strategy
    );

    let repository = Arc::new(
        FilesystemMetricRepository::open(&config).context("Failed to open repository")?,
    );

    let cache = if config.cache.enabled {
        let cache = Arc::new(BucketMetricCache::new(
            Arc::clone(&repository) as Arc<dyn MetricRepository>,
            Arc::new(BucketManager::new(config.cache.max_expanded_buckets)),
            CacheWindow::system(config.cache.period()),
        ));
        let worker = CachePeriodWorker::new(Arc::clone(&cache), config.cache.cleanup_period());
        worker.start().context("Failed to start cache worker")?;
        info!("Cache enabled, window {:?}", config.cache.period());
        Some((cache, worker))
    } else {
        info!("Cache disabled");
        None
    };

    let scheduler = TaskScheduler::for_repository(&repository, &config.tasks)
        .context("Failed to start maintenance tasks")?;

    info!("Metricstore ready");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    scheduler.shutdown();
    if let Some((cache, worker)) = cache {
        worker.shutdown();
        let stats = cache.stats();
        info!(
            "Cache served {} requests, {} writes",
            stats.read_requests.load(std::sync::atomic::Ordering::Relaxed),
            stats.writes.load(std::sync::atomic::Ordering::Relaxed)
        );
    }
    repository.close();
    info!("Metricstore stopped");
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let repository = FilesystemMetricRepository::open(config)?;
    for bucket in repository.list_buckets()? {
        println!("{bucket}");
    }
    Ok(())
}

fn write(config: &Config, bucket: &str, bucket_type: Option<&str>) -> Result<()> {
    let repository = FilesystemMetricRepository::open(config)?;
    let mut written = 0_u64;
    let mut failed = 0_u64;
    for (number, line) in std::io::stdin().lock().lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let result = serde_json::from_str::<Document>(&line)
            .map_err(anyhow::Error::from)
            .and_then(|document| Ok(repository.write(bucket, bucket_type, document)?));
        match result {
            Ok(_) => written += 1,
            Err(e) => {
                warn!("Skipping line {}: {}", number + 1, e);
                failed += 1;
            }
        }
    }
    repository.close();
    println!("Wrote {written} metrics to {bucket} ({failed} skipped)");
    Ok(())
}

fn read(config: &Config, bucket: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<()> {
    let interval = Interval::new(from, to)?;
    let repository = FilesystemMetricRepository::open(config)?;
    let mut out = std::io::stdout().lock();
    let mut output = Ok(());
    repository.read(bucket, &interval, &mut |metric| {
        if output.is_ok() {
            output = serde_json::to_string(&metric.document)
                .map_err(anyhow::Error::from)
                .and_then(|line| Ok(writeln!(out, "{line}")?));
        }
    })?;
    output
}
