//! Station observation ingester service.
//!
//! Runs an ingestion cycle over every configured station on a fixed
//! interval, publishing the latest, hourly, long-term and status cache tiers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use ingester::config::IngesterConfig;
use ingester::pipeline::IngestionPipeline;
use ingester::scheduler::Scheduler;
use ingester::server::{self, ServerState};

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "Scheduled ingestion of meteorological station observations")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "INGESTER_CONFIG")]
    config: Option<PathBuf>,

    /// Run one cycle and exit (vs continuous scheduling)
    #[arg(long)]
    once: bool,

    /// Ingest a single station and exit
    #[arg(short, long)]
    station: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the configured fetch concurrency
    #[arg(long)]
    max_concurrent: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting station observation ingester");

    let mut config = IngesterConfig::load(args.config.as_deref())?;
    if let Some(max_concurrent) = args.max_concurrent {
        config.max_concurrent = max_concurrent.max(1);
    }
    info!(
        cache_dir = %config.cache_dir.display(),
        station_files = ?config.station_files,
        interval_secs = config.interval_secs,
        "Loaded configuration"
    );

    let prometheus = if config.metrics {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder installed");
        Some(handle)
    } else {
        None
    };

    let pipeline = Arc::new(IngestionPipeline::new(&config).await?);

    if let Some(station_id) = &args.station {
        info!(station = %station_id, "Ingesting single station");
        let outcome = pipeline
            .run_station(station_id, Utc::now())
            .await
            .with_context(|| format!("Ingestion failed for station {}", station_id))?;
        info!(
            station = %outcome.station_id,
            last_updated = %outcome.last_updated,
            track_points = outcome.track_points,
            appended = outcome.appended,
            "Station ingested"
        );
        return Ok(());
    }

    if args.once {
        info!("Running single ingestion cycle");
        let report = pipeline.run_once(Utc::now()).await;
        for failure in &report.failures {
            error!(
                station = %failure.station_id,
                kind = %failure.kind,
                error = %failure.message,
                "Station failed"
            );
        }
        return Ok(());
    }

    // Shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    if let Some(port) = config.status_port {
        let state = Arc::new(ServerState {
            pipeline: pipeline.clone(),
            prometheus,
        });
        tokio::spawn(async move {
            if let Err(e) = server::run_server(state, port).await {
                error!(error = %e, "Status server failed");
            }
        });
    }

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx_clone.send(()).ok();
    });

    info!(interval_secs = config.interval_secs, "Starting scheduled ingestion");
    Scheduler::new(pipeline, config.interval())
        .run_forever(shutdown_tx.subscribe())
        .await?;

    info!("Ingester stopped");
    Ok(())
}
