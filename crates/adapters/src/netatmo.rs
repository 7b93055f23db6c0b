//! Netatmo public weather station API.
//!
//! `GET /api/getstationsdata?device_id=<mac>&scale=max&type=<a,b>&date_begin=<t0>&date_end=<t1>`
//! (UNIX seconds) with a bearer access token. The station (`devices[0]`) and
//! each of its modules carry a `dashboard_data` object holding `time_utc` and
//! the current readings keyed by Netatmo's measurement names.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use obs_common::{FeedResult, Observation, ObsError, ObsResult};

use crate::contract::{Adapter, FeedRequest};
use crate::http;
use crate::template::resolve_with_fallback;
use crate::window::select_window;

pub const NETATMO_STATIONS_URL: &str = "https://api.netatmo.com/api/getstationsdata";

#[derive(Debug, Deserialize)]
struct NetatmoResponse {
    #[serde(default)]
    body: NetatmoBody,
}

#[derive(Debug, Default, Deserialize)]
struct NetatmoBody {
    #[serde(default)]
    devices: Vec<NetatmoDevice>,
}

#[derive(Debug, Deserialize)]
struct NetatmoDevice {
    #[serde(default)]
    place: Option<NetatmoPlace>,
    #[serde(default)]
    dashboard_data: Option<Map<String, Value>>,
    #[serde(default)]
    modules: Vec<NetatmoModule>,
}

/// `location` is `[lon, lat]`.
#[derive(Debug, Deserialize)]
struct NetatmoPlace {
    #[serde(default)]
    location: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct NetatmoModule {
    #[serde(default)]
    dashboard_data: Option<Map<String, Value>>,
}

pub struct NetatmoAdapter {
    client: Client,
    access_token: Option<String>,
}

impl NetatmoAdapter {
    pub fn new(client: Client, access_token: Option<String>) -> Self {
        Self {
            client,
            access_token,
        }
    }
}

fn dashboard_time(dashboard: &Map<String, Value>) -> Option<DateTime<Utc>> {
    let secs = dashboard.get("time_utc")?.as_i64()?;
    Utc.timestamp_opt(secs, 0).single()
}

fn to_feed_result(response: NetatmoResponse, request: &FeedRequest) -> ObsResult<FeedResult> {
    let station_id = request.station_id.as_str();
    let device = response.body.devices.into_iter().next().ok_or_else(|| {
        ObsError::source_unavailable(station_id, "Netatmo returned no device")
    })?;

    let position = request.location.map(|p| (p.lat, p.lon)).or_else(|| {
        match device.place.as_ref().map(|p| p.location.as_slice()) {
            Some([lon, lat, ..]) => Some((*lat, *lon)),
            _ => None,
        }
    });

    let dashboards = device
        .dashboard_data
        .iter()
        .chain(device.modules.iter().filter_map(|m| m.dashboard_data.as_ref()));

    let mut by_time: BTreeMap<DateTime<Utc>, Observation> = BTreeMap::new();
    for dashboard in dashboards {
        let Some(time) = dashboard_time(dashboard) else {
            continue;
        };
        let obs = by_time.entry(time).or_insert_with(|| Observation::new(time));
        for (var, source) in request.mapped_variables() {
            // Each module only reports its own measurements.
            if let Some(value) = dashboard.get(source).and_then(Value::as_f64) {
                obs.readings.set(var, Some(value));
            }
        }
    }

    let samples: Vec<Observation> = by_time
        .into_values()
        .map(|obs| match position {
            Some((lat, lon)) => obs.at(lat, lon),
            None => obs,
        })
        .collect();

    debug!(station = %station_id, samples = samples.len(), "Parsed Netatmo dashboards");

    let (track, latest) = select_window(samples, request.duration_hours).ok_or_else(|| {
        ObsError::source_unavailable(station_id, "Netatmo returned no timestamped readings")
    })?;
    Ok(FeedResult::new(track, latest))
}

#[async_trait]
impl Adapter for NetatmoAdapter {
    fn name(&self) -> &str {
        "netatmo"
    }

    #[instrument(skip(self, request), fields(station = %request.station_id))]
    async fn fetch(&self, request: &FeedRequest) -> ObsResult<FeedResult> {
        let station_id = request.station_id.as_str();
        let token = self.access_token.as_deref().ok_or_else(|| {
            ObsError::Config(format!(
                "no Netatmo access token configured for station '{}'",
                station_id
            ))
        })?;

        let template = if request.source_url_template.trim().is_empty() {
            NETATMO_STATIONS_URL
        } else {
            request.source_url_template.as_str()
        };

        let hours = i64::from(request.duration_hours);
        let begin = Duration::try_hours(hours)
            .and_then(|span| request.now.checked_sub_signed(span))
            .ok_or_else(|| {
                ObsError::Config(format!(
                    "window of {} hours is out of range for station '{}'",
                    hours, station_id
                ))
            })?;
        let date_begin = begin.timestamp().to_string();
        let date_end = request.now.timestamp().to_string();
        let types = request.source_names().join(",");

        resolve_with_fallback(station_id, template, request.now, |endpoint| {
            let date_begin = date_begin.clone();
            let date_end = date_end.clone();
            let types = types.clone();
            async move {
                let response = self
                    .client
                    .get(&endpoint)
                    .bearer_auth(token)
                    .query(&[
                        ("device_id", station_id),
                        ("scale", "max"),
                        ("type", types.as_str()),
                        ("date_begin", date_begin.as_str()),
                        ("date_end", date_end.as_str()),
                    ])
                    .send()
                    .await
                    .map_err(|e| http::request_error(station_id, e))?;

                let response = http::check_status(station_id, response)?;
                let body: NetatmoResponse = response.json().await.map_err(|e| {
                    ObsError::malformed(station_id, format!("invalid Netatmo response: {}", e))
                })?;

                to_feed_result(body, request)
            }
        })
        .await
    }
}
