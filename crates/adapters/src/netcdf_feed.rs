//! Adapters for daily NetCDF station feeds.

use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use netcdf_parser::{NetCdfError, SeriesRequest, TimeSeries};
use obs_common::{CanonicalVariable, FeedResult, GeoPoint, Observation, ObsError, ObsResult};

use crate::contract::{Adapter, FeedRequest};
use crate::http;
use crate::template::resolve_with_fallback;
use crate::window::{decimate_track, select_window};

/// Default minimum spacing between consecutive boat track points.
pub const DEFAULT_MIN_SPACING_M: f64 = 100.0;

const LATITUDE_VAR: &str = "latitude";
const LONGITUDE_VAR: &str = "longitude";

/// Vessel-mounted station: position travels with every sample.
pub struct NetCdfBoatAdapter {
    client: Client,
    min_spacing_m: f64,
}

impl NetCdfBoatAdapter {
    pub fn new(client: Client, min_spacing_m: f64) -> Self {
        Self {
            client,
            min_spacing_m,
        }
    }
}

#[async_trait]
impl Adapter for NetCdfBoatAdapter {
    fn name(&self) -> &str {
        "netcdf_boat"
    }

    #[instrument(skip(self, request), fields(station = %request.station_id))]
    async fn fetch(&self, request: &FeedRequest) -> ObsResult<FeedResult> {
        let series_request =
            SeriesRequest::new(request.source_names()).with_position(LATITUDE_VAR, LONGITUDE_VAR);

        resolve_with_fallback(
            &request.station_id,
            &request.source_url_template,
            request.now,
            |location| {
                let series_request = series_request.clone();
                async move {
                    let series =
                        load_series(&self.client, &request.station_id, location, series_request)
                            .await?;
                    let samples = observations(&series, request, None)
                        .into_iter()
                        .filter(|o| o.position().is_some())
                        .collect();
                    let (track, latest) = select_window(samples, request.duration_hours)
                        .ok_or_else(|| {
                            ObsError::source_unavailable(
                                &request.station_id,
                                "feed has no positioned samples",
                            )
                        })?;
                    Ok::<_, ObsError>(FeedResult::new(
                        decimate_track(track, self.min_spacing_m),
                        latest,
                    ))
                }
            },
        )
        .await
    }
}

/// Fixed shore station: position comes from station configuration.
pub struct NetCdfLighthouseAdapter {
    client: Client,
}

impl NetCdfLighthouseAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Adapter for NetCdfLighthouseAdapter {
    fn name(&self) -> &str {
        "netcdf_lighthouse"
    }

    #[instrument(skip(self, request), fields(station = %request.station_id))]
    async fn fetch(&self, request: &FeedRequest) -> ObsResult<FeedResult> {
        let series_request = SeriesRequest::new(request.source_names());

        resolve_with_fallback(
            &request.station_id,
            &request.source_url_template,
            request.now,
            |location| {
                let series_request = series_request.clone();
                async move {
                    let series =
                        load_series(&self.client, &request.station_id, location, series_request)
                            .await?;
                    let samples = observations(&series, request, request.location);
                    let (track, latest) = select_window(samples, request.duration_hours)
                        .ok_or_else(|| {
                            ObsError::source_unavailable(&request.station_id, "feed has no samples")
                        })?;
                    Ok::<_, ObsError>(FeedResult::new(track, latest))
                }
            },
        )
        .await
    }
}

/// Turn column data into canonical observations.
///
/// Samples with an unreadable time are skipped. Unmapped canonical variables
/// stay `None`.
fn observations(
    series: &TimeSeries,
    request: &FeedRequest,
    fixed: Option<GeoPoint>,
) -> Vec<Observation> {
    let mapped: Vec<(CanonicalVariable, &str)> = request.mapped_variables().collect();

    (0..series.len())
        .filter_map(|i| {
            let time = series.times[i]?;
            let mut obs = Observation::new(time);
            match fixed {
                Some(point) => {
                    obs.lat = Some(point.lat);
                    obs.lon = Some(point.lon);
                }
                None => {
                    if let Some((lat, lon)) = series.position(i) {
                        obs.lat = Some(lat);
                        obs.lon = Some(lon);
                    }
                }
            }
            for (var, source) in &mapped {
                obs.readings.set(*var, series.value(source, i));
            }
            Some(obs)
        })
        .collect()
}

/// Load a feed from a local path, an OPeNDAP endpoint, or a plain HTTP download.
async fn load_series(
    client: &Client,
    station_id: &str,
    location: String,
    request: SeriesRequest,
) -> ObsResult<TimeSeries> {
    let is_http = location.starts_with("http://") || location.starts_with("https://");
    debug!(station = %station_id, location = %location, "Loading NetCDF feed");

    let result = if is_http && !location.contains("/dodsC/") {
        let bytes = http::get_bytes(client, station_id, &location).await?;
        tokio::task::spawn_blocking(move || netcdf_parser::read_series_from_bytes(&bytes, &request))
            .await
    } else {
        if !is_http && !Path::new(&location).exists() {
            return Err(ObsError::source_unavailable(
                station_id,
                format!("{} does not exist", location),
            ));
        }
        tokio::task::spawn_blocking(move || netcdf_parser::read_series(&location, &request)).await
    };

    let series = result.map_err(|e| {
        ObsError::source_unavailable(station_id, format!("reader task failed: {}", e))
    })?;
    series.map_err(|e| classify(station_id, e))
}

fn classify(station_id: &str, err: NetCdfError) -> ObsError {
    match err {
        NetCdfError::Unavailable { .. } | NetCdfError::IoError(_) => {
            ObsError::source_unavailable(station_id, err)
        }
        NetCdfError::MissingData(_) | NetCdfError::InvalidFormat(_) => {
            ObsError::malformed(station_id, err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::time::Duration as StdDuration;

    struct Sample {
        time: i64,
        lat: f64,
        lon: f64,
        air: f32,
    }

    fn write_boat_feed(path: &Path, samples: &[Sample]) {
        let n = samples.len();
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("time", n).unwrap();

        let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", "seconds since 1970-01-01 00:00:00").unwrap();
        let times: Vec<f64> = samples.iter().map(|s| s.time as f64).collect();
        time.put_values(&times, ..).unwrap();

        let lats: Vec<f64> = samples.iter().map(|s| s.lat).collect();
        file.add_variable::<f64>("latitude", &["time"]).unwrap().put_values(&lats, ..).unwrap();
        let lons: Vec<f64> = samples.iter().map(|s| s.lon).collect();
        file.add_variable::<f64>("longitude", &["time"]).unwrap().put_values(&lons, ..).unwrap();

        let air: Vec<f32> = samples.iter().map(|s| s.air).collect();
        file.add_variable::<f32>("air_temp", &["time"]).unwrap().put_values(&air, ..).unwrap();

        let columns = [
            ("sea_temp", 8.0f32),
            ("wind_spd", 5.0),
            ("wind_dir", 180.0),
            ("rel_hum", 70.0),
        ];
        for (name, base) in columns {
            let values: Vec<f32> = (0..n).map(|i| base + i as f32).collect();
            file.add_variable::<f32>(name, &["time"]).unwrap().put_values(&values, ..).unwrap();
        }
    }

    fn full_map() -> BTreeMap<CanonicalVariable, Option<String>> {
        [
            (CanonicalVariable::AirTemperature, "air_temp"),
            (CanonicalVariable::SeaSurfaceTemperature, "sea_temp"),
            (CanonicalVariable::WindSpeed, "wind_spd"),
            (CanonicalVariable::WindDirection, "wind_dir"),
            (CanonicalVariable::RelativeHumidity, "rel_hum"),
        ]
        .into_iter()
        .map(|(k, v)| (k, Some(v.to_string())))
        .collect()
    }

    fn request(template: String, now: DateTime<Utc>) -> FeedRequest {
        FeedRequest {
            station_id: "station_123".into(),
            source_url_template: template,
            variable_name_map: full_map(),
            duration_hours: 24,
            location: None,
            now,
        }
    }

    fn client() -> Client {
        http::build_client(StdDuration::from_secs(5)).unwrap()
    }

    fn feed_path(dir: &Path, date: NaiveDate) -> PathBuf {
        dir.join(format!("boat_{}.nc", date.format("%Y%m%d")))
    }

    #[tokio::test]
    async fn test_boat_two_points_an_hour_apart() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        write_boat_feed(
            &feed_path(dir.path(), now.date_naive()),
            &[
                Sample { time: 1_717_236_000, lat: 60.39, lon: 5.32, air: 12.5 },
                Sample { time: 1_717_239_600, lat: 60.41, lon: 5.30, air: 13.0 },
            ],
        );

        let template = format!("{}/boat_%Y%m%d.nc", dir.path().display());
        let adapter = NetCdfBoatAdapter::new(client(), DEFAULT_MIN_SPACING_M);
        let result = adapter.fetch(&request(template, now)).await.unwrap();

        assert_eq!(result.track.len(), 2);
        assert!(result.track[0].variable.time < result.track[1].variable.time);
        assert_eq!(result.latest, result.track[1].variable);
        assert_eq!(result.lat, Some(60.41));
        assert_eq!(result.lon, Some(5.30));
        assert_eq!(result.latest.readings.air_temperature, Some(13.0));
        assert_eq!(result.latest.readings.relative_humidity, Some(71.0));
        assert_eq!(result.wind_speed, Some(6.0));
    }

    #[tokio::test]
    async fn test_boat_falls_back_to_yesterday() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 2, 0, 5, 0).unwrap();
        let yesterday = now.date_naive() - Duration::days(1);
        write_boat_feed(
            &feed_path(dir.path(), yesterday),
            &[Sample { time: 1_717_282_800, lat: 60.0, lon: 5.0, air: 9.0 }],
        );

        let template = format!("{}/boat_%Y%m%d.nc", dir.path().display());
        let adapter = NetCdfBoatAdapter::new(client(), DEFAULT_MIN_SPACING_M);
        let result = adapter.fetch(&request(template, now)).await.unwrap();

        assert_eq!(result.latest.time.date_naive(), yesterday);
    }

    #[tokio::test]
    async fn test_boat_missing_both_days() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 2, 0, 5, 0).unwrap();
        let template = format!("{}/boat_%Y%m%d.nc", dir.path().display());

        let adapter = NetCdfBoatAdapter::new(client(), DEFAULT_MIN_SPACING_M);
        let err = adapter.fetch(&request(template, now)).await.unwrap_err();
        assert!(err.is_source_unavailable(), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_unmapped_variable_is_null() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        write_boat_feed(
            &feed_path(dir.path(), now.date_naive()),
            &[Sample { time: 1_717_236_000, lat: 60.0, lon: 5.0, air: 10.0 }],
        );

        let mut req = request(format!("{}/boat_%Y%m%d.nc", dir.path().display()), now);
        req.variable_name_map.insert(CanonicalVariable::AirTemperature, None);

        let adapter = NetCdfBoatAdapter::new(client(), DEFAULT_MIN_SPACING_M);
        let result = adapter.fetch(&req).await.unwrap();
        assert_eq!(result.latest.readings.air_temperature, None);
        assert_eq!(result.latest.readings.sea_surface_temperature, Some(8.0));
    }

    #[tokio::test]
    async fn test_mapping_to_absent_variable_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        write_boat_feed(
            &feed_path(dir.path(), now.date_naive()),
            &[Sample { time: 1_717_236_000, lat: 60.0, lon: 5.0, air: 10.0 }],
        );

        let mut req = request(format!("{}/boat_%Y%m%d.nc", dir.path().display()), now);
        req.variable_name_map
            .insert(CanonicalVariable::RelativeHumidity, Some("humidity_2m".to_string()));

        let adapter = NetCdfBoatAdapter::new(client(), DEFAULT_MIN_SPACING_M);
        let err = adapter.fetch(&req).await.unwrap_err();
        assert!(matches!(err, ObsError::MalformedFeed { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_lighthouse_uses_configured_location() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        write_boat_feed(
            &feed_path(dir.path(), now.date_naive()),
            &[
                Sample { time: 1_717_236_000, lat: 0.0, lon: 0.0, air: 10.0 },
                Sample { time: 1_717_236_600, lat: 0.0, lon: 0.0, air: 11.0 },
            ],
        );

        let mut req = request(format!("{}/boat_%Y%m%d.nc", dir.path().display()), now);
        req.location = Some(GeoPoint { lat: 58.97, lon: 5.73 });
        req.duration_hours = 0;

        let adapter = NetCdfLighthouseAdapter::new(client());
        let result = adapter.fetch(&req).await.unwrap();

        assert!(result.track.is_empty());
        assert_eq!(result.latest.readings.air_temperature, Some(11.0));
        assert_eq!(result.lat, Some(58.97));
        assert_eq!(result.lon, Some(5.73));
    }
}
