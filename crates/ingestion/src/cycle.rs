//! One ingestion cycle over every configured station.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::FutureExt;
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use adapters::{AdapterRegistry, FeedRequest};
use obs_common::{hour_boundaries_crossed, ErrorKind, ObsError, ObsResult, Station};
use storage::{CacheWriter, CycleState};

use crate::stations::StationRegistry;
use crate::status::{StalenessPolicy, StatusTracker};

/// Knobs for a cycle.
#[derive(Debug, Clone)]
pub struct CycleOptions {
    /// Window requested from every adapter.
    pub duration_hours: u32,
    /// Upper bound on a single adapter call.
    pub fetch_timeout: Duration,
    /// Station fetches in flight at once.
    pub max_concurrent: usize,
    /// Cap on track points kept in the latest snapshot. `None` keeps the full window.
    pub latest_track_points: Option<usize>,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            duration_hours: 24,
            fetch_timeout: Duration::from_secs(60),
            max_concurrent: 8,
            latest_track_points: None,
        }
    }
}

/// What one successful station ingestion produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationOutcome {
    pub station_id: String,
    pub last_updated: DateTime<Utc>,
    pub track_points: usize,
    /// Long-term records not already stored.
    pub appended: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationFailure {
    pub station_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Structured summary of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stations: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
    pub failures: Vec<StationFailure>,
    pub online: usize,
    pub offline: usize,
    /// Hour boundaries rotated at the end of this cycle.
    pub rotated_hours: u32,
    pub reloaded: bool,
    /// Cycle-level problems (reload, status index, rotation, state).
    pub errors: Vec<String>,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration_ms: 0,
            stations: 0,
            succeeded: 0,
            failed: 0,
            failures_by_kind: BTreeMap::new(),
            failures: Vec::new(),
            online: 0,
            offline: 0,
            rotated_hours: 0,
            reloaded: false,
            errors: Vec::new(),
        }
    }

    fn record_failure(&mut self, station_id: &str, error: &ObsError) {
        self.failed += 1;
        *self.failures_by_kind.entry(error.kind()).or_default() += 1;
        self.failures.push(StationFailure {
            station_id: station_id.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    pub fn failures_of(&self, kind: ErrorKind) -> usize {
        self.failures_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Runs ingestion cycles. Owns the status tracker and the hour-boundary
/// bookkeeping; cycles must not overlap.
pub struct CycleDriver {
    stations: Arc<StationRegistry>,
    adapters: AdapterRegistry,
    cache: Arc<CacheWriter>,
    tracker: Mutex<StatusTracker>,
    last_cycle_at: Mutex<Option<DateTime<Utc>>>,
    options: CycleOptions,
}

impl CycleDriver {
    /// Build a driver, seeding status and cycle state from the cache.
    pub async fn new(
        stations: Arc<StationRegistry>,
        adapters: AdapterRegistry,
        cache: Arc<CacheWriter>,
        policy: StalenessPolicy,
        options: CycleOptions,
    ) -> Self {
        let mut tracker = StatusTracker::new(policy);
        tracker.seed_from_snapshot(&cache.latest_snapshot().await);

        let state = match cache.read_cycle_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cycle state");
                CycleState::default()
            }
        };

        Self {
            stations,
            adapters,
            cache,
            tracker: Mutex::new(tracker),
            last_cycle_at: Mutex::new(state.last_cycle_at),
            options,
        }
    }

    pub fn stations(&self) -> &Arc<StationRegistry> {
        &self.stations
    }

    pub fn cache(&self) -> &Arc<CacheWriter> {
        &self.cache
    }

    pub fn options(&self) -> &CycleOptions {
        &self.options
    }

    /// Run one full cycle at `now`.
    ///
    /// Station failures are collected in the report. The status index is
    /// always written and the hourly buckets are rotated once if an hour
    /// boundary was crossed since the previous cycle.
    #[instrument(skip(self), fields(cycle_at = %now))]
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::new(now);

        match self.stations.reload_if_changed().await {
            Ok(reloaded) => report.reloaded = reloaded,
            Err(e) => {
                warn!(error = %e, "Station reload failed, keeping previous set");
                report.errors.push(format!("station reload: {e}"));
            }
        }

        let stations = self.stations.snapshot();
        report.stations = stations.len();

        if report.reloaded {
            self.tracker.lock().await.retain_configured(&stations);
            if let Err(e) = self.cache.prune_latest(|id| stations.contains(id)).await {
                warn!(error = %e, "Failed to prune removed stations from latest snapshot");
                report.errors.push(format!("prune latest: {e}"));
            }
        }

        let outcomes: Vec<(String, ObsResult<StationOutcome>)> = stream::iter(stations.list_all())
            .map(|station| async move {
                (station.id.clone(), self.ingest_station(station, now).await)
            })
            .buffer_unordered(self.options.max_concurrent.max(1))
            .collect::<Vec<_>>()
            .boxed()
            .await;

        {
            let mut tracker = self.tracker.lock().await;
            for (station_id, outcome) in outcomes {
                match outcome {
                    Ok(outcome) => {
                        tracker.record_success(&station_id, outcome.last_updated);
                        report.succeeded += 1;
                        counter!("ingest_station_success_total").increment(1);
                    }
                    Err(e) => {
                        warn!(
                            station = %station_id,
                            kind = %e.kind(),
                            error = %e,
                            "Station ingestion failed"
                        );
                        counter!("ingest_station_failure_total", "kind" => e.kind().as_str())
                            .increment(1);
                        report.record_failure(&station_id, &e);
                    }
                }
            }
        }

        let latest = self.cache.latest_snapshot().await;
        let views = self.tracker.lock().await.classify(&stations, &latest, now);
        report.online = views.online.len();
        report.offline = views.offline.len();
        gauge!("ingest_stations_online").set(report.online as f64);
        gauge!("ingest_stations_offline").set(report.offline as f64);
        if let Err(e) = self.cache.write_status_views(&views).await {
            error!(error = %e, "Failed to publish status index");
            report.errors.push(format!("status index: {e}"));
        }

        self.finish_cycle(now, &mut report).await;

        report.duration_ms = started.elapsed().as_millis() as u64;
        counter!("ingest_cycles_total").increment(1);
        histogram!("ingest_cycle_duration_seconds").record(started.elapsed().as_secs_f64());

        info!(
            stations = report.stations,
            succeeded = report.succeeded,
            failed = report.failed,
            online = report.online,
            offline = report.offline,
            rotated_hours = report.rotated_hours,
            duration_ms = report.duration_ms,
            "Ingestion cycle complete"
        );
        report
    }

    /// Rotate hourly buckets if needed and persist the cycle time.
    async fn finish_cycle(&self, now: DateTime<Utc>, report: &mut CycleReport) {
        let mut last = self.last_cycle_at.lock().await;
        let steps = hour_boundaries_crossed(*last, now);

        if steps > 0 {
            match self.cache.rotate_hourly_by(steps, now).await {
                Ok(()) => {
                    report.rotated_hours = steps;
                    counter!("ingest_hourly_rotations_total").increment(1);
                }
                Err(e) => {
                    // Leave the cycle time alone so the next cycle retries.
                    error!(error = %e, steps, "Hourly rotation failed");
                    report.errors.push(format!("hourly rotation: {e}"));
                    return;
                }
            }
        }

        *last = Some(last.map_or(now, |t| t.max(now)));
        let state = CycleState { last_cycle_at: *last };
        if let Err(e) = self.cache.write_cycle_state(&state).await {
            warn!(error = %e, "Failed to persist cycle state");
            report.errors.push(format!("cycle state: {e}"));
        }
    }

    /// Ingest a single station outside a full cycle.
    ///
    /// Neither the status index nor the hourly buckets are touched.
    pub async fn run_station(
        &self,
        station_id: &str,
        now: DateTime<Utc>,
    ) -> ObsResult<StationOutcome> {
        let stations = self.stations.snapshot();
        let station = stations.get(station_id)?;
        let outcome = self.ingest_station(station, now).await?;
        self.tracker
            .lock()
            .await
            .record_success(station_id, outcome.last_updated);
        Ok(outcome)
    }

    #[instrument(
        skip(self, station),
        fields(station = %station.id, adapter = %station.adapter_name)
    )]
    async fn ingest_station(
        &self,
        station: &Station,
        now: DateTime<Utc>,
    ) -> ObsResult<StationOutcome> {
        let adapter = self.adapters.resolve(&station.adapter_name)?;
        let request = FeedRequest::for_station(station, self.options.duration_hours, now);

        let fetch = tokio::time::timeout(self.options.fetch_timeout, adapter.fetch(&request));
        let result = match fetch.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ObsError::source_unavailable(
                    &station.id,
                    format!("fetch timed out after {:?}", self.options.fetch_timeout),
                ))
            }
        };

        let observations = result.observations();
        let last_updated = result.last_updated();
        let published = match self.options.latest_track_points {
            Some(max_points) => result.with_short_track(max_points),
            None => result,
        };

        self.cache.write_latest(&station.id, &published).await?;
        let appended = self
            .cache
            .append_long_term_all(&station.id, &observations, now)
            .await?;

        debug!(
            track_points = published.track.len(),
            appended,
            last_updated = %last_updated,
            "Station ingested"
        );

        Ok(StationOutcome {
            station_id: station.id.clone(),
            last_updated,
            track_points: published.track.len(),
            appended,
        })
    }
}
