//! Ingester configuration.
//!
//! Loaded from a YAML file with `${VAR}` and `${VAR:-default}` environment
//! substitution applied to the raw text before parsing. Every field has a
//! default, so an empty file (or no file) is a valid configuration.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use adapters::AdapterSettings;
use ingestion::{CycleOptions, StalenessPolicy};

/// Environment variables that override credentials from the file.
pub const CREDENTIAL_ENV_VARS: &[(&str, &str)] = &[
    ("frost", "FROST_CLIENT_ID"),
    ("holfuy", "SWI_HOLFUY_API_KEY"),
    ("netatmo", "NETATMO_ACCESS_TOKEN"),
];

/// Longest window an adapter may be asked for (one year).
pub const MAX_DURATION_HOURS: u32 = 24 * 366;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngesterConfig {
    /// Root of the cache tiers.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Station definition files, read in order.
    #[serde(default = "default_station_files")]
    pub station_files: Vec<PathBuf>,
    /// Seconds between cycle starts.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Window requested from every adapter.
    #[serde(default = "default_duration_hours")]
    pub duration_hours: u32,
    #[serde(default)]
    pub latest_track_points: Option<usize>,
    #[serde(default)]
    pub staleness: StalenessPolicy,
    /// Adapter name -> API key or client id.
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default = "default_boat_min_spacing_m")]
    pub boat_min_spacing_m: f64,
    /// Serve `/health`, `/status` and `/metrics` on this port.
    #[serde(default)]
    pub status_port: Option<u16>,
    /// Install a Prometheus recorder.
    #[serde(default)]
    pub metrics: bool,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}

fn default_station_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("static/config/fixed_stations.json"),
        PathBuf::from("static/config/mobile_stations.json"),
    ]
}

fn default_interval_secs() -> u64 {
    600
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    8
}

fn default_duration_hours() -> u32 {
    24
}

fn default_boat_min_spacing_m() -> f64 {
    100.0
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            station_files: default_station_files(),
            interval_secs: default_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            duration_hours: default_duration_hours(),
            latest_track_points: None,
            staleness: StalenessPolicy::default(),
            credentials: HashMap::new(),
            boat_min_spacing_m: default_boat_min_spacing_m(),
            status_port: None,
            metrics: false,
        }
    }
}

impl IngesterConfig {
    /// Load from `path` (or defaults when `None`), apply credential
    /// overrides from the process environment, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read ingester config from {:?}", path))?;
                Self::from_yaml(&content)
                    .with_context(|| format!("Failed to parse ingester config from {:?}", path))?
            }
            None => Self::default(),
        };

        config.apply_credential_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML text after environment substitution.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&expanded).context("Invalid ingester config YAML")
    }

    /// Replace credentials with non-empty values from `lookup`.
    pub fn apply_credential_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (adapter, var) in CREDENTIAL_ENV_VARS {
            if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                self.credentials.insert(adapter.to_string(), value);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.interval_secs > 0, "interval_secs must be greater than 0");
        anyhow::ensure!(
            self.fetch_timeout_secs > 0,
            "fetch_timeout_secs must be greater than 0"
        );
        anyhow::ensure!(self.max_concurrent > 0, "max_concurrent must be greater than 0");
        anyhow::ensure!(
            self.boat_min_spacing_m >= 0.0,
            "boat_min_spacing_m cannot be negative"
        );
        anyhow::ensure!(
            self.staleness.fixed_minutes > 0 && self.staleness.mobile_minutes > 0,
            "staleness thresholds must be greater than 0"
        );
        anyhow::ensure!(!self.station_files.is_empty(), "station_files cannot be empty");
        anyhow::ensure!(
            self.duration_hours <= MAX_DURATION_HOURS,
            "duration_hours must be at most {}",
            MAX_DURATION_HOURS
        );
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            credentials: self.credentials.clone(),
            boat_min_spacing_m: self.boat_min_spacing_m,
        }
    }

    pub fn cycle_options(&self) -> CycleOptions {
        CycleOptions {
            duration_hours: self.duration_hours,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_concurrent: self.max_concurrent,
            latest_track_points: self.latest_track_points,
        }
    }
}

/// Expand `${VAR}` and `${VAR:-default}` references from the process
/// environment.
pub fn expand_env_vars(content: &str) -> Result<String> {
    expand_with(content, |name| std::env::var(name).ok())
}

/// Expand references using `lookup`. A default applies when the variable is
/// unset or empty; a reference without one must resolve.
fn expand_with<F>(content: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let body = &rest[open + 2..];
        let close = body
            .find('}')
            .with_context(|| format!("Unclosed variable reference starting at '${{{}'", body))?;

        let reference = &body[..close];
        let value = match reference.split_once(":-") {
            Some((name, fallback)) => lookup(name.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| fallback.to_string()),
            None => lookup(reference.trim())
                .with_context(|| format!("Environment variable {} not set", reference.trim()))?,
        };
        out.push_str(&value);
        rest = &body[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
