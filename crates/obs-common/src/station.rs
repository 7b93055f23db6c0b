//! Station metadata and derived liveness status.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observation::CanonicalVariable;

/// Icon used when a station record does not name one.
pub const DEFAULT_ICON: &str = "/static/images/red_dot.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationKind {
    Fixed,
    Mobile,
}

impl fmt::Display for StationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationKind::Fixed => f.write_str("fixed"),
            StationKind::Mobile => f.write_str("mobile"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Identity and metadata for one station.
///
/// Immutable during an ingestion cycle; a configuration reload replaces the
/// whole set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub kind: StationKind,
    pub project: String,
    pub icon: String,
    pub adapter_name: String,
    /// May contain strftime date directives.
    pub source_url_template: String,
    /// Canonical name to source-native name. `None` means "not measured".
    pub variable_name_map: BTreeMap<CanonicalVariable, Option<String>>,
    /// Static position, fixed stations only.
    pub location: Option<GeoPoint>,
    /// Per-station override of the staleness threshold.
    pub staleness_minutes: Option<u32>,
}

impl Station {
    /// Canonical variables this station reports.
    pub fn variables(&self) -> Vec<CanonicalVariable> {
        self.variable_name_map
            .iter()
            .filter(|(_, source)| source.is_some())
            .map(|(var, _)| *var)
            .collect()
    }

    /// Source-native name for a canonical variable, if the station measures it.
    pub fn source_name(&self, var: CanonicalVariable) -> Option<&str> {
        self.variable_name_map.get(&var)?.as_deref()
    }

    pub fn is_mobile(&self) -> bool {
        self.kind == StationKind::Mobile
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Online => f.write_str("online"),
            Status::Offline => f.write_str("offline"),
        }
    }
}

/// Liveness of a station, derived from its observation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationStatus {
    pub station_id: String,
    pub status: Status,
    /// Timestamp of the most recent successful observation, if any.
    pub last_updated: Option<DateTime<Utc>>,
}

impl StationStatus {
    pub fn is_online(&self) -> bool {
        self.status == Status::Online
    }
}
