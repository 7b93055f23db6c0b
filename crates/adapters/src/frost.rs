//! MET Norway Frost observations API.
//!
//! `GET /observations/v0.jsonld?sources=<id>&elements=<a,b>&referencetime=<start>/<end>`
//! with HTTP basic auth (client id as user, empty password). The response is
//! a `data` array of `{referenceTime, observations: [{elementId, value, timeResolution}]}`.
//!
//! An element can be reported at several resolutions for the same reference
//! time. Ten-minute values win over unlabelled ones, which win over any other
//! resolution.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use obs_common::{CanonicalVariable, FeedResult, Observation, ObsError, ObsResult};

use crate::contract::{Adapter, FeedRequest};
use crate::http;
use crate::template::resolve_with_fallback;
use crate::window::select_window;

pub const FROST_OBSERVATIONS_URL: &str = "https://frost.met.no/observations/v0.jsonld";

const LATITUDE_ELEMENT: &str = "latitude";
const LONGITUDE_ELEMENT: &str = "longitude";
const PREFERRED_RESOLUTION: &str = "PT10M";

#[derive(Debug, Deserialize)]
struct FrostResponse {
    #[serde(default)]
    data: Vec<FrostItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrostItem {
    reference_time: DateTime<Utc>,
    #[serde(default)]
    observations: Vec<FrostObservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrostObservation {
    element_id: String,
    value: Option<f64>,
    #[serde(default)]
    time_resolution: Option<String>,
}

fn resolution_rank(resolution: Option<&str>) -> u8 {
    match resolution {
        Some(PREFERRED_RESOLUTION) => 2,
        None => 1,
        Some(_) => 0,
    }
}

/// Frost-backed adapter. The mobile flavour also requests per-observation
/// `latitude`/`longitude` elements.
pub struct FrostAdapter {
    client: Client,
    client_id: Option<String>,
    mobile: bool,
}

impl FrostAdapter {
    pub fn fixed(client: Client, client_id: Option<String>) -> Self {
        Self {
            client,
            client_id,
            mobile: false,
        }
    }

    pub fn mobile(client: Client, client_id: Option<String>) -> Self {
        Self {
            client,
            client_id,
            mobile: true,
        }
    }

    fn elements(&self, request: &FeedRequest) -> String {
        let mut elements = request.source_names();
        if self.mobile {
            elements.push(LATITUDE_ELEMENT.to_string());
            elements.push(LONGITUDE_ELEMENT.to_string());
        }
        elements.join(",")
    }

    fn to_feed_result(
        &self,
        response: FrostResponse,
        request: &FeedRequest,
    ) -> ObsResult<FeedResult> {
        let mut by_element: HashMap<&str, Vec<CanonicalVariable>> = HashMap::new();
        for (var, source) in request.mapped_variables() {
            by_element.entry(source).or_default().push(var);
        }

        let mut by_time: BTreeMap<DateTime<Utc>, Observation> = BTreeMap::new();
        let mut ranks: HashMap<(DateTime<Utc>, String), u8> = HashMap::new();
        for item in response.data {
            let obs = by_time
                .entry(item.reference_time)
                .or_insert_with(|| Observation::new(item.reference_time));

            for element in item.observations {
                let rank = resolution_rank(element.time_resolution.as_deref());
                let key = (item.reference_time, element.element_id.clone());
                if ranks.get(&key).is_some_and(|best| *best > rank) {
                    continue;
                }
                ranks.insert(key, rank);

                match element.element_id.as_str() {
                    LATITUDE_ELEMENT if self.mobile => obs.lat = element.value,
                    LONGITUDE_ELEMENT if self.mobile => obs.lon = element.value,
                    id => {
                        for var in by_element.get(id).into_iter().flatten() {
                            obs.readings.set(*var, element.value);
                        }
                    }
                }
            }
        }

        let samples: Vec<Observation> = by_time
            .into_values()
            .filter_map(|mut obs| {
                if self.mobile {
                    obs.position().map(|_| obs)
                } else {
                    if let Some(point) = request.location {
                        obs.lat = Some(point.lat);
                        obs.lon = Some(point.lon);
                    }
                    Some(obs)
                }
            })
            .collect();

        debug!(
            station = %request.station_id,
            samples = samples.len(),
            "Parsed Frost observations"
        );

        let (track, latest) = select_window(samples, request.duration_hours).ok_or_else(|| {
            ObsError::source_unavailable(
                &request.station_id,
                "Frost returned no usable observations",
            )
        })?;
        Ok(FeedResult::new(track, latest))
    }
}

#[async_trait]
impl Adapter for FrostAdapter {
    fn name(&self) -> &str {
        if self.mobile {
            "frost_boat"
        } else {
            "frost"
        }
    }

    #[instrument(skip(self, request), fields(station = %request.station_id))]
    async fn fetch(&self, request: &FeedRequest) -> ObsResult<FeedResult> {
        let station_id = request.station_id.as_str();
        let client_id = self.client_id.as_deref().ok_or_else(|| {
            ObsError::Config(format!(
                "no Frost client id configured for station '{}'",
                station_id
            ))
        })?;

        let template = if request.source_url_template.trim().is_empty() {
            FROST_OBSERVATIONS_URL
        } else {
            request.source_url_template.as_str()
        };

        // Frost needs a non-empty interval even when only the latest sample is wanted.
        let hours = i64::from(request.duration_hours.max(1));
        let start = Duration::try_hours(hours)
            .and_then(|span| request.now.checked_sub_signed(span))
            .ok_or_else(|| {
                ObsError::Config(format!(
                    "window of {} hours is out of range for station '{}'",
                    hours, station_id
                ))
            })?;
        let reference_time = format!(
            "{}/{}",
            start.to_rfc3339_opts(SecondsFormat::Secs, true),
            request.now.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let elements = self.elements(request);

        resolve_with_fallback(station_id, template, request.now, |endpoint| {
            let elements = elements.clone();
            let reference_time = reference_time.clone();
            async move {
                let response = self
                    .client
                    .get(&endpoint)
                    .basic_auth(client_id, Some(""))
                    .query(&[
                        ("sources", station_id),
                        ("elements", elements.as_str()),
                        ("referencetime", reference_time.as_str()),
                    ])
                    .send()
                    .await
                    .map_err(|e| http::request_error(station_id, e))?;

                let response = http::check_status(station_id, response)?;
                let body: FrostResponse = response.json().await.map_err(|e| {
                    ObsError::malformed(station_id, format!("invalid Frost response: {}", e))
                })?;

                self.to_feed_result(body, request)
            }
        })
        .await
    }
}
