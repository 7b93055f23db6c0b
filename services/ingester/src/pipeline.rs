//! Ingestion pipeline built from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use adapters::AdapterRegistry;
use ingestion::{CycleDriver, CycleReport, StationOutcome, StationRegistry};
use obs_common::ObsResult;
use storage::CacheWriter;

use crate::config::IngesterConfig;

/// Owns the cycle driver and remembers the last cycle report.
pub struct IngestionPipeline {
    driver: CycleDriver,
    last_report: RwLock<Option<CycleReport>>,
}

impl IngestionPipeline {
    pub async fn new(config: &IngesterConfig) -> Result<Self> {
        let cache = CacheWriter::open(&config.cache_dir)
            .await
            .with_context(|| format!("Failed to open cache at {:?}", config.cache_dir))?;

        let stations = StationRegistry::load(config.station_files.clone())
            .await
            .context("Failed to load station configuration")?;

        let adapters = AdapterRegistry::with_builtin(&config.adapter_settings())
            .context("Failed to build adapters")?;

        info!(
            stations = stations.snapshot().len(),
            adapters = ?adapters.names(),
            cache_dir = %config.cache_dir.display(),
            "Ingestion pipeline ready"
        );

        let driver = CycleDriver::new(
            Arc::new(stations),
            adapters,
            Arc::new(cache),
            config.staleness.clone(),
            config.cycle_options(),
        )
        .await;

        Ok(Self::from_driver(driver))
    }

    pub fn from_driver(driver: CycleDriver) -> Self {
        Self {
            driver,
            last_report: RwLock::new(None),
        }
    }

    pub fn driver(&self) -> &CycleDriver {
        &self.driver
    }

    /// Run one full cycle and remember its report.
    pub async fn run_once(&self, now: DateTime<Utc>) -> CycleReport {
        let report = self.driver.run_cycle(now).await;
        *self.last_report.write().await = Some(report.clone());
        report
    }

    pub async fn run_station(
        &self,
        station_id: &str,
        now: DateTime<Utc>,
    ) -> ObsResult<StationOutcome> {
        self.driver.run_station(station_id, now).await
    }

    pub async fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().await.clone()
    }

    /// Station ids grouped by project from the current station set.
    pub fn stations_by_project(&self) -> std::collections::BTreeMap<String, Vec<String>> {
        self.driver.stations().snapshot().ids_by_project()
    }
}

/// Convenience for callers holding the pipeline behind an `Arc`.
pub type SharedPipeline = Arc<IngestionPipeline>;
