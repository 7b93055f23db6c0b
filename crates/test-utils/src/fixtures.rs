//! Builders for stations, observations and station configuration files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};

use obs_common::{
    CanonicalVariable, FeedResult, GeoPoint, Observation, Station, StationKind, DEFAULT_ICON,
};

/// Fixed reference instant used across tests: 2024-06-01T12:00:00Z.
pub fn reference_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Builder for [`Station`] values with sensible test defaults.
#[derive(Debug, Clone)]
pub struct StationBuilder {
    station: Station,
}

impl StationBuilder {
    /// A fixed station on the `mock` adapter at 60N 5E reporting wind.
    pub fn fixed(id: &str) -> Self {
        let mut variable_name_map = BTreeMap::new();
        variable_name_map.insert(CanonicalVariable::WindSpeed, Some("wind_speed".to_string()));
        variable_name_map.insert(CanonicalVariable::WindDirection, Some("wind_dir".to_string()));
        Self {
            station: Station {
                id: id.to_string(),
                name: format!("Station {id}"),
                kind: StationKind::Fixed,
                project: "test".to_string(),
                icon: DEFAULT_ICON.to_string(),
                adapter_name: "mock".to_string(),
                source_url_template: format!("mock://{id}/%Y%m%d"),
                variable_name_map,
                location: Some(GeoPoint { lat: 60.0, lon: 5.0 }),
                staleness_minutes: None,
            },
        }
    }

    /// A mobile station without a static location.
    pub fn mobile(id: &str) -> Self {
        let mut builder = Self::fixed(id);
        builder.station.kind = StationKind::Mobile;
        builder.station.location = None;
        builder
    }

    pub fn adapter(mut self, name: &str) -> Self {
        self.station.adapter_name = name.to_string();
        self
    }

    pub fn project(mut self, project: &str) -> Self {
        self.station.project = project.to_string();
        self
    }

    pub fn url(mut self, template: &str) -> Self {
        self.station.source_url_template = template.to_string();
        self
    }

    pub fn location(mut self, lat: f64, lon: f64) -> Self {
        self.station.location = Some(GeoPoint { lat, lon });
        self
    }

    pub fn staleness_minutes(mut self, minutes: u32) -> Self {
        self.station.staleness_minutes = Some(minutes);
        self
    }

    /// Map a canonical variable to a source name, or to `None` for "not measured".
    pub fn variable(mut self, var: CanonicalVariable, source: Option<&str>) -> Self {
        self.station
            .variable_name_map
            .insert(var, source.map(str::to_string));
        self
    }

    pub fn build(self) -> Station {
        self.station
    }
}

/// Observation at `time` with a wind speed reading and a position.
pub fn wind_observation(time: DateTime<Utc>, wind_speed: f64) -> Observation {
    Observation::new(time)
        .at(60.0, 5.0)
        .with(CanonicalVariable::WindSpeed, Some(wind_speed))
        .with(CanonicalVariable::WindDirection, Some(180.0))
}

/// A feed of `points` samples ten minutes apart, the last one at `latest`.
pub fn feed_ending_at(latest: DateTime<Utc>, points: usize) -> FeedResult {
    let points = points.max(1);
    let track: Vec<Observation> = (0..points)
        .rev()
        .map(|i| wind_observation(latest - Duration::minutes(10 * i as i64), 5.0 + i as f64))
        .collect();
    let last = wind_observation(latest, 5.0);
    FeedResult::new(track, last)
}

/// Write a station configuration file into `dir` and return its path.
pub fn write_station_file(dir: &Path, file_name: &str, records: &serde_json::Value) -> PathBuf {
    let path = dir.join(file_name);
    let text = serde_json::to_string_pretty(records).unwrap_or_default();
    if let Err(e) = std::fs::write(&path, text) {
        panic!("failed to write station file {}: {e}", path.display());
    }
    path
}

/// A minimal JSON station record for the given adapter.
pub fn station_record(id: &str, datasource: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": format!("Station {id}"),
        "project": "test",
        "datasource": datasource,
        "url": format!("mock://{id}/%Y%m%d"),
        "variables": {
            "windSpeed": "wind_speed",
            "windDirection": "wind_dir",
            "airTemperature": null
        },
        "lat": 60.0,
        "lon": 5.0
    })
}
