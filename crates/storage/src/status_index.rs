//! Station status index documents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use obs_common::{CanonicalVariable, StationKind, Status};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusLocation {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// One station's row in the status index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: StationKind,
    pub location: StatusLocation,
    pub variables: Vec<CanonicalVariable>,
    pub status: Status,
    pub last_updated: Option<DateTime<Utc>>,
    pub project: String,
    pub icon: String,
}

/// Station id -> status entry.
pub type StatusIndex = BTreeMap<String, StatusEntry>;

/// The three published views of station status.
///
/// Published together as one document so a reader never pairs views from
/// different cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusViews {
    pub all: StatusIndex,
    pub online: StatusIndex,
    pub offline: StatusIndex,
}

impl StatusViews {
    /// Split entries into the three views by their status.
    pub fn from_entries(entries: impl IntoIterator<Item = StatusEntry>) -> Self {
        let mut views = Self::default();
        for entry in entries {
            let target = match entry.status {
                Status::Online => &mut views.online,
                Status::Offline => &mut views.offline,
            };
            target.insert(entry.id.clone(), entry.clone());
            views.all.insert(entry.id.clone(), entry);
        }
        views
    }
}
