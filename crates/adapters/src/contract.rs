//! The uniform interface every data-source adapter implements.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use obs_common::{CanonicalVariable, FeedResult, GeoPoint, ObsResult, Station};

/// Everything an adapter needs to fetch one station's feed.
#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub station_id: String,
    /// May contain strftime date directives.
    pub source_url_template: String,
    pub variable_name_map: BTreeMap<CanonicalVariable, Option<String>>,
    /// Window to return, measured back from the most recent sample.
    pub duration_hours: u32,
    /// Static position for fixed stations.
    pub location: Option<GeoPoint>,
    /// Reference instant used to render date templates.
    pub now: DateTime<Utc>,
}

impl FeedRequest {
    pub fn for_station(station: &Station, duration_hours: u32, now: DateTime<Utc>) -> Self {
        Self {
            station_id: station.id.clone(),
            source_url_template: station.source_url_template.clone(),
            variable_name_map: station.variable_name_map.clone(),
            duration_hours,
            location: station.location,
            now,
        }
    }

    /// Canonical variables paired with their source-native names, skipping unmeasured ones.
    pub fn mapped_variables(&self) -> impl Iterator<Item = (CanonicalVariable, &str)> {
        self.variable_name_map
            .iter()
            .filter_map(|(var, source)| source.as_deref().map(|s| (*var, s)))
    }

    /// Distinct source-native names to request from the provider.
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mapped_variables().map(|(_, s)| s.to_string()).collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Trait for provider feeds.
///
/// Fails with `SourceUnavailable` when no resource resolves for today or the
/// fallback date, and with `MalformedFeed` when a resolved resource cannot be
/// parsed into the canonical structure.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, request: &FeedRequest) -> ObsResult<FeedResult>;
}
