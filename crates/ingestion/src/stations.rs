//! File-backed station registry.
//!
//! Station definitions are JSON files holding an array of records (a single
//! record object is accepted too). A file whose name contains `mobile` yields
//! mobile stations unless a record sets `type` explicitly. Later files win on
//! duplicate ids.
//!
//! Consumers take an `Arc<StationSet>` snapshot; a reload builds a complete new
//! set and swaps the pointer, so a snapshot is never a mix of old and new.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use serde::Deserialize;
use tracing::{debug, info, warn};

use obs_common::{
    CanonicalVariable, GeoPoint, ObsError, ObsResult, Station, StationKind, DEFAULT_ICON,
};
use storage::station_file_stem;

const MAX_SUGGESTIONS: usize = 3;
const SUGGESTION_CUTOFF: f64 = 0.6;

/// One station as written in a configuration file.
#[derive(Debug, Deserialize)]
struct StationRecord {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(alias = "import_function")]
    datasource: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    variables: BTreeMap<String, Option<String>>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default, rename = "type")]
    kind: Option<StationKind>,
    #[serde(default)]
    staleness_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StationFile {
    Many(Vec<StationRecord>),
    One(StationRecord),
}

impl StationRecord {
    fn into_station(self, default_kind: StationKind) -> ObsResult<Station> {
        let mut variable_name_map = BTreeMap::new();
        for (key, source) in self.variables {
            let var = CanonicalVariable::from_str(&key)
                .map_err(|e| ObsError::Config(format!("station '{}': {}", self.id, e)))?;
            variable_name_map.insert(var, source);
        }

        let location = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        };

        Ok(Station {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            kind: self.kind.unwrap_or(default_kind),
            project: self.project.unwrap_or_else(|| "default".to_string()),
            icon: self.icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
            adapter_name: self.datasource,
            source_url_template: self.url,
            variable_name_map,
            location,
            staleness_minutes: self.staleness_minutes,
            id: self.id,
        })
    }
}

/// Parse one station configuration file.
pub fn parse_station_file(path: &Path, contents: &str) -> ObsResult<Vec<Station>> {
    let default_kind = if path.to_string_lossy().contains("mobile") {
        StationKind::Mobile
    } else {
        StationKind::Fixed
    };

    let records = match serde_json::from_str::<StationFile>(contents) {
        Ok(StationFile::Many(records)) => records,
        Ok(StationFile::One(record)) => vec![record],
        Err(e) => {
            return Err(ObsError::Config(format!(
                "invalid station file {}: {}",
                path.display(),
                e
            )))
        }
    };

    records
        .into_iter()
        .map(|record| record.into_station(default_kind))
        .collect()
}

/// An immutable set of stations keyed by id.
#[derive(Debug, Clone, Default)]
pub struct StationSet {
    stations: BTreeMap<String, Station>,
}

impl StationSet {
    /// Build a set; a later station replaces an earlier one with the same id.
    pub fn from_stations(stations: impl IntoIterator<Item = Station>) -> Self {
        let mut map = BTreeMap::new();
        for station in stations {
            let id = station.id.clone();
            if map.insert(id.clone(), station).is_some() {
                warn!(station = %id, "Duplicate station id, keeping the later definition");
            }
        }
        Self { stations: map }
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.stations.contains_key(id)
    }

    /// Every station, ordered by id.
    pub fn list_all(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    /// Look up a station, suggesting close ids when it is missing.
    pub fn get(&self, id: &str) -> ObsResult<&Station> {
        self.stations.get(id).ok_or_else(|| ObsError::StationNotFound {
            id: id.to_string(),
            suggestions: self.suggestions_for(id),
        })
    }

    /// Station ids grouped by project, each group sorted.
    pub fn ids_by_project(&self) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for station in self.stations.values() {
            groups
                .entry(station.project.clone())
                .or_default()
                .push(station.id.clone());
        }
        groups
    }

    /// Station ids of one kind, or all of them when `kind` is `None`.
    pub fn ids_by_kind(&self, kind: Option<StationKind>) -> Vec<String> {
        self.stations
            .values()
            .filter(|s| kind.map_or(true, |k| s.kind == k))
            .map(|s| s.id.clone())
            .collect()
    }

    fn suggestions_for(&self, id: &str) -> Vec<String> {
        let mut scored: Vec<(f64, &String)> = self
            .stations
            .keys()
            .map(|candidate| (similarity(id, candidate), candidate))
            .filter(|(score, _)| *score >= SUGGESTION_CUTOFF)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, candidate)| candidate.clone())
            .collect()
    }
}

/// Normalized edit-distance similarity in `0.0..=1.0`.
fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            row[j + 1] = substitution.min(prev[j + 1] + 1).min(row[j] + 1);
        }
        std::mem::swap(&mut prev, &mut row);
    }

    1.0 - prev[b.len()] as f64 / longest as f64
}

/// Reloadable station registry backed by configuration files.
#[derive(Debug)]
pub struct StationRegistry {
    files: Vec<PathBuf>,
    current: RwLock<Arc<StationSet>>,
    fingerprint: Mutex<Vec<Option<SystemTime>>>,
}

impl StationRegistry {
    /// Load the registry from `files`. Missing files are skipped with a warning;
    /// a file that fails to parse is an error.
    pub async fn load(files: Vec<PathBuf>) -> ObsResult<Self> {
        let fingerprint = fingerprint(&files).await;
        let set = read_station_files(&files).await?;
        info!(stations = set.len(), files = files.len(), "Loaded station configuration");
        Ok(Self {
            files,
            current: RwLock::new(Arc::new(set)),
            fingerprint: Mutex::new(fingerprint),
        })
    }

    /// A registry over a fixed set, not backed by files.
    pub fn from_set(set: StationSet) -> Self {
        Self {
            files: Vec::new(),
            current: RwLock::new(Arc::new(set)),
            fingerprint: Mutex::new(Vec::new()),
        }
    }

    /// The current station set. Holding the `Arc` pins that version.
    pub fn snapshot(&self) -> Arc<StationSet> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Re-read every file and swap in the new set. On error the previous
    /// set stays in place.
    pub async fn reload(&self) -> ObsResult<usize> {
        let stamp = fingerprint(&self.files).await;
        let set = read_station_files(&self.files).await?;
        let count = set.len();

        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(set);
        *self.fingerprint.lock().unwrap_or_else(|e| e.into_inner()) = stamp;

        info!(stations = count, "Reloaded station configuration");
        Ok(count)
    }

    /// Reload only when a file's modification time changed since the last
    /// load. Returns whether a reload happened.
    pub async fn reload_if_changed(&self) -> ObsResult<bool> {
        if self.files.is_empty() {
            return Ok(false);
        }

        let stamp = fingerprint(&self.files).await;
        let unchanged = *self.fingerprint.lock().unwrap_or_else(|e| e.into_inner()) == stamp;
        if unchanged {
            debug!("Station configuration unchanged");
            return Ok(false);
        }

        self.reload().await?;
        Ok(true)
    }
}

async fn fingerprint(files: &[PathBuf]) -> Vec<Option<SystemTime>> {
    let mut stamps = Vec::with_capacity(files.len());
    for file in files {
        let modified = match tokio::fs::metadata(file).await {
            Ok(meta) => meta.modified().ok(),
            Err(_) => None,
        };
        stamps.push(modified);
    }
    stamps
}

async fn read_station_files(files: &[PathBuf]) -> ObsResult<StationSet> {
    let mut stations = Vec::new();

    for file in files {
        let contents = match tokio::fs::read_to_string(file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                warn!(path = %file.display(), "Station file not found, skipping");
                continue;
            }
            Err(e) => {
                return Err(ObsError::Config(format!(
                    "failed to read station file {}: {}",
                    file.display(),
                    e
                )))
            }
        };

        let parsed = parse_station_file(file, &contents)?;
        debug!(path = %file.display(), stations = parsed.len(), "Parsed station file");
        stations.extend(parsed);
    }

    let set = StationSet::from_stations(stations);
    check_cache_stems(&set)?;
    Ok(set)
}

/// Reject sets where two ids would share cache files.
fn check_cache_stems(set: &StationSet) -> ObsResult<()> {
    let mut owners: HashMap<String, &str> = HashMap::new();
    for station in set.list_all() {
        let stem = station_file_stem(&station.id);
        if stem.is_empty() {
            return Err(ObsError::Config(format!(
                "station id '{}' has no usable cache file name",
                station.id
            )));
        }
        if let Some(other) = owners.insert(stem.clone(), &station.id) {
            return Err(ObsError::Config(format!(
                "station ids '{}' and '{}' map to the same cache file '{}'",
                other, station.id, stem
            )));
        }
    }
    Ok(())
}
