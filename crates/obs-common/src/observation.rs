//! Canonical observation schema produced by every adapter.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized measurement field that all adapters map into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalVariable {
    AirTemperature,
    SeaSurfaceTemperature,
    WindSpeed,
    WindDirection,
    RelativeHumidity,
}

impl CanonicalVariable {
    pub const ALL: [CanonicalVariable; 5] = [
        CanonicalVariable::AirTemperature,
        CanonicalVariable::SeaSurfaceTemperature,
        CanonicalVariable::WindSpeed,
        CanonicalVariable::WindDirection,
        CanonicalVariable::RelativeHumidity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalVariable::AirTemperature => "airTemperature",
            CanonicalVariable::SeaSurfaceTemperature => "seaSurfaceTemperature",
            CanonicalVariable::WindSpeed => "windSpeed",
            CanonicalVariable::WindDirection => "windDirection",
            CanonicalVariable::RelativeHumidity => "relativeHumidity",
        }
    }
}

impl fmt::Display for CanonicalVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalVariable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalVariable::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown canonical variable '{}'", s))
    }
}

/// Values of every canonical variable at one instant.
///
/// All fields are always serialized; `null` means either "not measured by
/// this station" or "missing in this sample".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Readings {
    pub air_temperature: Option<f64>,
    pub sea_surface_temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub relative_humidity: Option<f64>,
}

impl Readings {
    pub fn get(&self, var: CanonicalVariable) -> Option<f64> {
        match var {
            CanonicalVariable::AirTemperature => self.air_temperature,
            CanonicalVariable::SeaSurfaceTemperature => self.sea_surface_temperature,
            CanonicalVariable::WindSpeed => self.wind_speed,
            CanonicalVariable::WindDirection => self.wind_direction,
            CanonicalVariable::RelativeHumidity => self.relative_humidity,
        }
    }

    /// Set a value, normalizing non-finite numbers to `None`.
    pub fn set(&mut self, var: CanonicalVariable, value: Option<f64>) {
        let value = value.filter(|v| v.is_finite());
        let slot = match var {
            CanonicalVariable::AirTemperature => &mut self.air_temperature,
            CanonicalVariable::SeaSurfaceTemperature => &mut self.sea_surface_temperature,
            CanonicalVariable::WindSpeed => &mut self.wind_speed,
            CanonicalVariable::WindDirection => &mut self.wind_direction,
            CanonicalVariable::RelativeHumidity => &mut self.relative_humidity,
        };
        *slot = value;
    }

    pub fn is_empty(&self) -> bool {
        CanonicalVariable::ALL.iter().all(|v| self.get(*v).is_none())
    }
}

/// One fix in time for one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Observation instant, stored as UNIX seconds.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(flatten)]
    pub readings: Readings,
}

impl Observation {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            lat: None,
            lon: None,
            readings: Readings::default(),
        }
    }

    pub fn at(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }

    pub fn with(mut self, var: CanonicalVariable, value: Option<f64>) -> Self {
        self.readings.set(var, value);
        self
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.lat?, self.lon?))
    }
}

/// A point along a station's recent track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub variable: Observation,
}

impl From<Observation> for TrackPoint {
    fn from(obs: Observation) -> Self {
        Self {
            lat: obs.lat,
            lon: obs.lon,
            variable: obs,
        }
    }
}

/// Uniform result of one adapter call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResult {
    /// Latest position.
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    /// Oldest first.
    pub track: Vec<TrackPoint>,
    pub latest: Observation,
}

impl FeedResult {
    /// Build a result from an ordered track and the most recent sample.
    pub fn new(track: Vec<Observation>, latest: Observation) -> Self {
        Self {
            lat: latest.lat,
            lon: latest.lon,
            wind_speed: latest.readings.wind_speed,
            wind_direction: latest.readings.wind_direction,
            track: track.into_iter().map(TrackPoint::from).collect(),
            latest,
        }
    }

    /// Timestamp of the most recent observation carried by this result.
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.track
            .iter()
            .map(|p| p.variable.time)
            .chain(std::iter::once(self.latest.time))
            .max()
            .unwrap_or(self.latest.time)
    }

    /// Every distinct observation in this result, oldest first.
    pub fn observations(&self) -> Vec<Observation> {
        let mut out: Vec<Observation> = self.track.iter().map(|p| p.variable.clone()).collect();
        if !out.iter().any(|o| o.time == self.latest.time) {
            out.push(self.latest.clone());
        }
        out.sort_by_key(|o| o.time);
        out
    }

    /// Copy of this result keeping only the `max_points` most recent track points.
    pub fn with_short_track(&self, max_points: usize) -> Self {
        let skip = self.track.len().saturating_sub(max_points);
        Self {
            track: self.track[skip..].to_vec(),
            ..self.clone()
        }
    }
}
