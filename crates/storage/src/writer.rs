//! Filesystem cache writer owning every tier.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use obs_common::{FeedResult, Observation, ObsError, ObsResult};

use crate::hourly::{HourlyManifest, Snapshot};
use crate::layout::CacheLayout;
use crate::long_term::{day_of, merge, read_day, write_day};
use crate::publish::{publish_json, read_json};
use crate::status_index::{StatusIndex, StatusViews};

/// Driver bookkeeping persisted next to the tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleState {
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Single writer for all cache tiers.
///
/// Tier writes for one station are serialized by a per-station lock. Hourly
/// rotation takes a global gate exclusively, so it never snapshots a station
/// halfway through its latest-tier update.
pub struct CacheWriter {
    layout: CacheLayout,
    latest: Mutex<Snapshot>,
    hourly: Mutex<HourlyManifest>,
    station_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    rotation_gate: RwLock<()>,
}

impl CacheWriter {
    /// Open (creating if needed) a cache rooted at `root`, seeding in-memory
    /// state from whatever was last published.
    pub async fn open(root: impl Into<PathBuf>) -> ObsResult<Self> {
        let layout = CacheLayout::new(root);
        tokio::fs::create_dir_all(layout.root())
            .await
            .map_err(|e| ObsError::write_failure(layout.root(), e))?;

        let latest: Snapshot = match read_json(&layout.latest_snapshot()).await {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable latest snapshot");
                Snapshot::new()
            }
        };
        let hourly: HourlyManifest = match read_json(&layout.hourly_manifest()).await {
            Ok(manifest) => manifest.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable hourly manifest");
                HourlyManifest::default()
            }
        };

        info!(
            root = %layout.root().display(),
            stations = latest.len(),
            next_generation = hourly.next_generation,
            "Opened cache"
        );

        Ok(Self {
            layout,
            latest: Mutex::new(latest),
            hourly: Mutex::new(hourly),
            station_locks: std::sync::Mutex::new(HashMap::new()),
            rotation_gate: RwLock::new(()),
        })
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    fn station_lock(&self, station_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .station_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(station_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // =========================================================================
    // Latest snapshot
    // =========================================================================

    /// Replace a station's entry in the latest snapshot and republish it.
    #[instrument(skip(self, result))]
    pub async fn write_latest(&self, station_id: &str, result: &FeedResult) -> ObsResult<()> {
        let _gate = self.rotation_gate.read().await;
        let lock = self.station_lock(station_id);
        let _station = lock.lock().await;

        let station_path = self.layout.latest_station(station_id);
        publish_json(&station_path, result).await?;

        let mut latest = self.latest.lock().await;
        let previous = latest.insert(station_id.to_string(), result.clone());
        if let Err(e) = publish_json(&self.layout.latest_snapshot(), &*latest).await {
            // Put memory and the per-station file back in line with the
            // snapshot readers still see.
            match previous {
                Some(prev) => {
                    if let Err(restore) = publish_json(&station_path, &prev).await {
                        warn!(
                            station = %station_id,
                            error = %restore,
                            "Failed to restore station file"
                        );
                    }
                    latest.insert(station_id.to_string(), prev);
                }
                None => {
                    match tokio::fs::remove_file(&station_path).await {
                        Ok(()) => {}
                        Err(err) if err.kind() == IoErrorKind::NotFound => {}
                        Err(err) => warn!(
                            station = %station_id,
                            error = %err,
                            "Failed to remove station file"
                        ),
                    }
                    latest.remove(station_id);
                }
            }
            return Err(e);
        }

        debug!(station = %station_id, "Published latest snapshot");
        Ok(())
    }

    /// Drop snapshot entries for stations no longer configured.
    pub async fn prune_latest<F>(&self, keep: F) -> ObsResult<usize>
    where
        F: Fn(&str) -> bool,
    {
        let _gate = self.rotation_gate.read().await;
        let mut latest = self.latest.lock().await;
        let before = latest.len();
        let pruned: Snapshot = latest
            .iter()
            .filter(|(id, _)| keep(id))
            .map(|(id, result)| (id.clone(), result.clone()))
            .collect();

        let removed = before - pruned.len();
        if removed > 0 {
            publish_json(&self.layout.latest_snapshot(), &pruned).await?;
            *latest = pruned;
            info!(removed, "Pruned stations from latest snapshot");
        }
        Ok(removed)
    }

    /// In-memory copy of the current latest snapshot.
    pub async fn latest_snapshot(&self) -> Snapshot {
        self.latest.lock().await.clone()
    }

    /// Read the published latest snapshot from disk.
    pub async fn read_latest(&self) -> ObsResult<Snapshot> {
        Ok(read_json(&self.layout.latest_snapshot()).await?.unwrap_or_default())
    }

    // =========================================================================
    // Hourly buckets
    // =========================================================================

    /// Shift all buckets by one hour.
    pub async fn rotate_hourly(&self) -> ObsResult<()> {
        self.rotate_hourly_by(1, Utc::now()).await
    }

    /// Shift all buckets by `steps` hours in one atomic manifest update.
    ///
    /// Bucket -1 receives the current latest snapshot; the other `steps - 1`
    /// newest buckets are left empty.
    #[instrument(skip(self))]
    pub async fn rotate_hourly_by(&self, steps: u32, now: DateTime<Utc>) -> ObsResult<()> {
        if steps == 0 {
            return Ok(());
        }

        let _gate = self.rotation_gate.write().await;
        let mut manifest = self.hourly.lock().await;
        let rotation = manifest.rotate(steps as usize, now);

        let snapshot = self.latest.lock().await.clone();
        let generation_path = self.layout.hourly_generation(rotation.generation);
        publish_json(&generation_path, &snapshot).await?;

        if let Err(e) = publish_json(&self.layout.hourly_manifest(), &rotation.manifest).await {
            let _ = tokio::fs::remove_file(&generation_path).await;
            return Err(e);
        }

        for generation in &rotation.deletable {
            let path = self.layout.hourly_generation(*generation);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete retired bucket")
                }
            }
        }

        info!(
            steps,
            generation = rotation.generation,
            stations = snapshot.len(),
            "Rotated hourly buckets"
        );
        *manifest = rotation.manifest;
        Ok(())
    }

    /// Read the published hourly manifest. Missing means all buckets empty.
    pub async fn read_hourly_manifest(&self) -> ObsResult<HourlyManifest> {
        Ok(read_json(&self.layout.hourly_manifest()).await?.unwrap_or_default())
    }

    /// Read bucket `-k` (`k` in `1..=24`). `None` for an empty bucket.
    pub async fn read_bucket(&self, k: usize) -> ObsResult<Option<Snapshot>> {
        let manifest = self.read_hourly_manifest().await?;
        match manifest.generation_for(k) {
            Some(generation) => read_json(&self.layout.hourly_generation(generation)).await,
            None => Ok(None),
        }
    }

    // =========================================================================
    // Long-term series
    // =========================================================================

    /// Add one observation to its day's series. Returns `false` if it was
    /// not stored: its timestamp is already present or its day is sealed.
    pub async fn append_long_term(
        &self,
        station_id: &str,
        observation: &Observation,
    ) -> ObsResult<bool> {
        let added = self
            .append_long_term_all(station_id, std::slice::from_ref(observation), Utc::now())
            .await?;
        Ok(added == 1)
    }

    /// Add observations to their day series, rewriting each touched day once.
    ///
    /// Days before `now`'s UTC date are sealed: an existing series for such a
    /// day is never rewritten and late observations for it are dropped. A
    /// past day with no series yet is written once, so a fresh cache still
    /// backfills the fetched window.
    ///
    /// Returns the number of observations that were not already stored.
    #[instrument(skip(self, observations), fields(count = observations.len()))]
    pub async fn append_long_term_all(
        &self,
        station_id: &str,
        observations: &[Observation],
        now: DateTime<Utc>,
    ) -> ObsResult<usize> {
        let lock = self.station_lock(station_id);
        let _station = lock.lock().await;
        let today = now.date_naive();

        let mut by_day: BTreeMap<NaiveDate, Vec<Observation>> = BTreeMap::new();
        for obs in observations {
            by_day.entry(day_of(obs)).or_default().push(obs.clone());
        }

        let mut total = 0;
        for (day, incoming) in by_day {
            let path = self.layout.long_term_day(station_id, day);
            let exists = tokio::fs::try_exists(&path)
                .await
                .map_err(|e| ObsError::corrupt_cache(&path, e))?;

            if day < today && exists {
                let mut series = read_day(&path).await?;
                let late = merge(&mut series, incoming);
                if late > 0 {
                    debug!(
                        station = %station_id,
                        day = %day,
                        late,
                        "Dropped records for sealed day"
                    );
                    counter!("long_term_sealed_dropped_total").increment(late as u64);
                }
                continue;
            }

            let mut series = read_day(&path).await?;
            let added = merge(&mut series, incoming);
            if added > 0 {
                write_day(&path, &series).await?;
                debug!(
                    station = %station_id,
                    day = %day,
                    added,
                    "Appended long-term records"
                );
            }
            total += added;
        }
        Ok(total)
    }

    /// Observations for `from..=to` (UTC days), oldest first.
    pub async fn read_long_term(
        &self,
        station_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ObsResult<Vec<Observation>> {
        let mut out = Vec::new();
        for day in from.iter_days().take_while(|d| *d <= to) {
            out.extend(read_day(&self.layout.long_term_day(station_id, day)).await?);
        }
        Ok(out)
    }

    /// Days for which a station has a series, sorted.
    pub async fn long_term_days(&self, station_id: &str) -> ObsResult<Vec<NaiveDate>> {
        let dir = self.layout.long_term_dir(station_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ObsError::corrupt_cache(&dir, e)),
        };

        let mut days = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ObsError::corrupt_cache(&dir, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".jsonl") {
                if let Ok(day) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                    days.push(day);
                }
            }
        }
        days.sort();
        Ok(days)
    }

    // =========================================================================
    // Status index
    // =========================================================================

    /// Publish the all/online/offline status views.
    ///
    /// `index.json` carries all three views and is replaced in one rename, so
    /// it is the consistent source. The per-view files follow for readers that
    /// only want one view; between their renames they may briefly span two
    /// cycles.
    pub async fn write_status_index(
        &self,
        all: &StatusIndex,
        online: &StatusIndex,
        offline: &StatusIndex,
    ) -> ObsResult<()> {
        let views = StatusViews {
            all: all.clone(),
            online: online.clone(),
            offline: offline.clone(),
        };
        self.write_status_views(&views).await
    }

    pub async fn write_status_views(&self, views: &StatusViews) -> ObsResult<()> {
        publish_json(&self.layout.status_index(), views).await?;
        publish_json(&self.layout.status_view("all"), &views.all).await?;
        publish_json(&self.layout.status_view("online"), &views.online).await?;
        publish_json(&self.layout.status_view("offline"), &views.offline).await?;
        debug!(
            all = views.all.len(),
            online = views.online.len(),
            offline = views.offline.len(),
            "Published status index"
        );
        Ok(())
    }

    /// Read the combined status index. Missing means no stations.
    pub async fn read_status_index(&self) -> ObsResult<StatusViews> {
        Ok(read_json(&self.layout.status_index()).await?.unwrap_or_default())
    }

    // =========================================================================
    // Cycle bookkeeping
    // =========================================================================

    pub async fn read_cycle_state(&self) -> ObsResult<CycleState> {
        Ok(read_json(&self.layout.cycle_state()).await?.unwrap_or_default())
    }

    pub async fn write_cycle_state(&self, state: &CycleState) -> ObsResult<()> {
        publish_json(&self.layout.cycle_state(), state).await
    }
}
