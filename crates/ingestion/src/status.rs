//! Online/offline classification from observation age.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use obs_common::{Station, StationKind, StationStatus, Status};
use storage::{Snapshot, StatusEntry, StatusLocation, StatusViews};

use crate::stations::StationSet;

fn default_fixed_minutes() -> u32 {
    60
}

fn default_mobile_minutes() -> u32 {
    120
}

/// How old a station's last observation may be before it counts as offline.
///
/// Resolution order: the station's own `staleness_minutes`, then the
/// per-adapter override, then the default for the station kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StalenessPolicy {
    #[serde(default = "default_fixed_minutes")]
    pub fixed_minutes: u32,
    #[serde(default = "default_mobile_minutes")]
    pub mobile_minutes: u32,
    #[serde(default)]
    pub per_adapter: HashMap<String, u32>,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            fixed_minutes: default_fixed_minutes(),
            mobile_minutes: default_mobile_minutes(),
            per_adapter: HashMap::new(),
        }
    }
}

impl StalenessPolicy {
    pub fn threshold_for(&self, station: &Station) -> Duration {
        let minutes = station
            .staleness_minutes
            .or_else(|| self.per_adapter.get(&station.adapter_name).copied())
            .unwrap_or(match station.kind {
                StationKind::Fixed => self.fixed_minutes,
                StationKind::Mobile => self.mobile_minutes,
            });
        Duration::minutes(i64::from(minutes))
    }
}

/// Tracks the newest successfully ingested observation per station.
///
/// A failed fetch does not touch the tracker, so a station keeps its previous
/// timestamp and only goes offline once that timestamp passes the threshold.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    policy: StalenessPolicy,
    last_updated: HashMap<String, DateTime<Utc>>,
}

impl StatusTracker {
    pub fn new(policy: StalenessPolicy) -> Self {
        Self {
            policy,
            last_updated: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    /// Seed timestamps from a previously published latest snapshot.
    pub fn seed_from_snapshot(&mut self, snapshot: &Snapshot) {
        for (station_id, result) in snapshot {
            self.record_success(station_id, result.last_updated());
        }
    }

    /// Record a successful ingestion. An older timestamp never replaces a newer one.
    pub fn record_success(&mut self, station_id: &str, observed_at: DateTime<Utc>) {
        self.last_updated
            .entry(station_id.to_string())
            .and_modify(|t| *t = (*t).max(observed_at))
            .or_insert(observed_at);
    }

    pub fn last_updated(&self, station_id: &str) -> Option<DateTime<Utc>> {
        self.last_updated.get(station_id).copied()
    }

    /// Drop stations that are no longer configured.
    pub fn retain_configured(&mut self, stations: &StationSet) {
        self.last_updated.retain(|id, _| stations.contains(id));
    }

    /// Online iff `now - last_updated <= threshold`. Never observed is offline.
    pub fn status_of(&self, station: &Station, now: DateTime<Utc>) -> StationStatus {
        let last_updated = self.last_updated(&station.id);
        let status = match last_updated {
            Some(t) if now - t <= self.policy.threshold_for(station) => Status::Online,
            _ => Status::Offline,
        };
        StationStatus {
            station_id: station.id.clone(),
            status,
            last_updated,
        }
    }

    /// Build the all/online/offline status views for every configured station.
    ///
    /// Mobile stations are placed at their latest reported position; fixed
    /// stations at their configured location.
    pub fn classify(
        &self,
        stations: &StationSet,
        latest: &Snapshot,
        now: DateTime<Utc>,
    ) -> StatusViews {
        let entries = stations.list_all().map(|station| {
            let status = self.status_of(station, now);
            let location = match (station.kind, station.location, latest.get(&station.id)) {
                (StationKind::Mobile, _, Some(result)) => StatusLocation {
                    lat: result.lat,
                    lon: result.lon,
                },
                (_, Some(point), _) => StatusLocation {
                    lat: Some(point.lat),
                    lon: Some(point.lon),
                },
                (_, None, Some(result)) => StatusLocation {
                    lat: result.lat,
                    lon: result.lon,
                },
                (_, None, None) => StatusLocation::default(),
            };

            StatusEntry {
                id: station.id.clone(),
                name: station.name.clone(),
                kind: station.kind,
                location,
                variables: station.variables(),
                status: status.status,
                last_updated: status.last_updated,
                project: station.project.clone(),
                icon: station.icon.clone(),
            }
        });
        StatusViews::from_entries(entries)
    }
}
