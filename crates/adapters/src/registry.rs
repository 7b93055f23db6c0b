//! Name-to-adapter registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use obs_common::{ObsError, ObsResult};

use crate::contract::Adapter;
use crate::frost::FrostAdapter;
use crate::holfuy::HolfuyAdapter;
use crate::netatmo::NetatmoAdapter;
use crate::http::build_client;
use crate::netcdf_feed::{NetCdfBoatAdapter, NetCdfLighthouseAdapter, DEFAULT_MIN_SPACING_M};

/// Settings shared by the built-in adapters.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Per-request HTTP timeout.
    pub fetch_timeout: Duration,
    /// Adapter name -> API key or client id.
    pub credentials: HashMap<String, String>,
    pub boat_min_spacing_m: f64,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(60),
            credentials: HashMap::new(),
            boat_min_spacing_m: DEFAULT_MIN_SPACING_M,
        }
    }
}

impl AdapterSettings {
    fn credential(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|name| self.credentials.get(*name))
            .find(|value| !value.is_empty())
            .cloned()
    }
}

/// Maps a station's configured adapter name to its implementation.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter, sharing one HTTP client.
    pub fn with_builtin(settings: &AdapterSettings) -> ObsResult<Self> {
        let client = build_client(settings.fetch_timeout)?;
        let mut registry = Self::new();

        registry.register(
            "netcdf_boat",
            Arc::new(NetCdfBoatAdapter::new(client.clone(), settings.boat_min_spacing_m)),
        );
        registry.register(
            "netcdf_lighthouse",
            Arc::new(NetCdfLighthouseAdapter::new(client.clone())),
        );
        registry.register(
            "frost",
            Arc::new(FrostAdapter::fixed(client.clone(), settings.credential(&["frost"]))),
        );
        registry.register(
            "frost_boat",
            Arc::new(FrostAdapter::mobile(
                client.clone(),
                settings.credential(&["frost_boat", "frost"]),
            )),
        );
        registry.register(
            "holfuy",
            Arc::new(HolfuyAdapter::new(client.clone(), settings.credential(&["holfuy"]))),
        );
        registry.register(
            "netatmo",
            Arc::new(NetatmoAdapter::new(client, settings.credential(&["netatmo"]))),
        );

        info!(adapters = ?registry.names(), "Registered built-in adapters");
        Ok(registry)
    }

    /// Register an adapter under `name`, returning any adapter it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        adapter: Arc<dyn Adapter>,
    ) -> Option<Arc<dyn Adapter>> {
        let name = name.into();
        let previous = self.adapters.insert(name.clone(), adapter);
        if previous.is_some() {
            warn!(adapter = %name, "Replaced previously registered adapter");
        }
        previous
    }

    pub fn resolve(&self, name: &str) -> ObsResult<Arc<dyn Adapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| ObsError::UnknownAdapter(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}
