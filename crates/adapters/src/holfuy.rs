//! Holfuy live station API.

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::instrument;

use obs_common::{FeedResult, Observation, ObsError, ObsResult};

use crate::contract::{Adapter, FeedRequest};
use crate::http;
use crate::template::resolve_with_fallback;
use crate::window::select_window;

pub const HOLFUY_LIVE_URL: &str = "https://api.holfuy.com/live/";

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Holfuy only exposes the current reading, so the track holds at most one point.
pub struct HolfuyAdapter {
    client: Client,
    api_key: Option<String>,
}

impl HolfuyAdapter {
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    fn live_url(base: &str, station_id: &str, api_key: &str) -> Result<Url, String> {
        let mut url = Url::parse_with_params(
            base,
            &[
                ("s", station_id),
                ("m", "JSON"),
                ("tu", "C"),
                ("su", "m/s"),
                ("pw", api_key),
            ],
        )
        .map_err(|e| format!("invalid Holfuy URL '{}': {}", base, e))?;
        // `utc` is a bare flag.
        let query = format!("{}&utc", url.query().unwrap_or_default());
        url.set_query(Some(&query));
        Ok(url)
    }
}

/// Look up a source-native name, falling back to a nested `a_b` -> `a.b` lookup.
fn lookup(raw: &Value, name: &str) -> Option<f64> {
    if let Some(value) = raw.get(name) {
        return value.as_f64();
    }
    let (outer, inner) = name.split_once('_')?;
    raw.get(outer)?.get(inner)?.as_f64()
}

fn parse_reading(raw: &Value, request: &FeedRequest) -> ObsResult<Observation> {
    let station_id = &request.station_id;

    if let Some(message) = raw.get("error").and_then(Value::as_str) {
        return Err(ObsError::source_unavailable(station_id, format!("Holfuy error: {}", message)));
    }

    let stamp = raw
        .get("dateTime")
        .and_then(Value::as_str)
        .ok_or_else(|| ObsError::malformed(station_id, "missing dateTime"))?;
    let time = NaiveDateTime::parse_from_str(stamp, DATE_TIME_FORMAT)
        .map(|ndt| Utc.from_utc_datetime(&ndt))
        .map_err(|e| ObsError::malformed(station_id, format!("bad dateTime '{}': {}", stamp, e)))?;

    let mut obs = Observation::new(time);
    if let Some(point) = request.location {
        obs.lat = Some(point.lat);
        obs.lon = Some(point.lon);
    }
    for (var, source) in request.mapped_variables() {
        obs.readings.set(var, lookup(raw, source));
    }
    Ok(obs)
}

#[async_trait]
impl Adapter for HolfuyAdapter {
    fn name(&self) -> &str {
        "holfuy"
    }

    #[instrument(skip(self, request), fields(station = %request.station_id))]
    async fn fetch(&self, request: &FeedRequest) -> ObsResult<FeedResult> {
        let station_id = request.station_id.as_str();
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ObsError::Config(format!("no Holfuy API key configured for station '{}'", station_id))
        })?;

        let template = if request.source_url_template.trim().is_empty() {
            HOLFUY_LIVE_URL
        } else {
            request.source_url_template.as_str()
        };

        resolve_with_fallback(station_id, template, request.now, |base| async move {
            let url = Self::live_url(&base, station_id, api_key).map_err(ObsError::Config)?;
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| http::request_error(station_id, e))?;
            let response = http::check_status(station_id, response)?;
            let raw: Value = response.json().await.map_err(|e| {
                ObsError::malformed(station_id, format!("invalid Holfuy response: {}", e))
            })?;

            let obs = parse_reading(&raw, request)?;
            let (track, latest) = select_window(vec![obs], request.duration_hours)
                .ok_or_else(|| ObsError::source_unavailable(station_id, "no reading"))?;
            Ok::<_, ObsError>(FeedResult::new(track, latest))
        })
        .await
    }
}
