//! Sample window selection and track decimation.

use chrono::Duration;

use obs_common::Observation;

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points, in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Order samples, drop duplicate timestamps and keep those within
/// `duration_hours` of the most recent one.
///
/// Returns the windowed track (oldest first) and the most recent sample, or
/// `None` if there are no samples. When two samples share a timestamp the one
/// appearing later in the input wins. A zero duration yields an empty track.
pub fn select_window(
    mut samples: Vec<Observation>,
    duration_hours: u32,
) -> Option<(Vec<Observation>, Observation)> {
    // Stable sort keeps input order among equal timestamps.
    samples.sort_by_key(|o| o.time);

    let mut deduped: Vec<Observation> = Vec::with_capacity(samples.len());
    for obs in samples {
        match deduped.last_mut() {
            Some(last) if last.time == obs.time => *last = obs,
            _ => deduped.push(obs),
        }
    }

    let latest = deduped.last()?.clone();
    if duration_hours == 0 {
        return Some((Vec::new(), latest));
    }

    // A window reaching past the representable range keeps everything.
    let cutoff = Duration::try_hours(i64::from(duration_hours))
        .and_then(|span| latest.time.checked_sub_signed(span));
    if let Some(cutoff) = cutoff {
        deduped.retain(|o| o.time >= cutoff);
    }
    Some((deduped, latest))
}

/// Thin a positioned track so consecutive points are at least `min_spacing_m`
/// apart, favouring the most recent samples.
///
/// Walks from newest to oldest; the newest point is always kept. Points
/// without a position are dropped. Output is oldest first.
pub fn decimate_track(track: Vec<Observation>, min_spacing_m: f64) -> Vec<Observation> {
    let mut kept: Vec<Observation> = Vec::with_capacity(track.len());

    for obs in track.into_iter().rev() {
        let Some((lat, lon)) = obs.position() else {
            continue;
        };
        let far_enough = match kept.last().and_then(|k| k.position()) {
            None => true,
            Some((klat, klon)) => haversine_m(klat, klon, lat, lon) >= min_spacing_m,
        };
        if far_enough {
            kept.push(obs);
        }
    }

    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use obs_common::CanonicalVariable;

    fn obs(secs: i64) -> Observation {
        Observation::new(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 1.0, "got {}", d);
        assert_eq!(haversine_m(60.0, 5.0, 60.0, 5.0), 0.0);
    }

    #[test]
    fn test_window_orders_and_filters() {
        let samples = vec![obs(7200), obs(0), obs(3600), obs(-100)];
        let (track, latest) = select_window(samples, 2).unwrap();

        let times: Vec<i64> = track.iter().map(|o| o.time.timestamp()).collect();
        assert_eq!(times, vec![0, 3600, 7200]);
        assert_eq!(latest.time.timestamp(), 7200);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let (track, _) = select_window(vec![obs(0), obs(3600)], 1).unwrap();
        assert_eq!(track.len(), 2);
    }

    #[test]
    fn test_window_zero_duration() {
        let (track, latest) = select_window(vec![obs(0), obs(60)], 0).unwrap();
        assert!(track.is_empty());
        assert_eq!(latest.time.timestamp(), 60);
    }

    #[test]
    fn test_window_longer_than_time_range_keeps_all() {
        let samples = vec![obs(-86_400 * 365), obs(0), obs(60)];
        let (track, latest) = select_window(samples, u32::MAX).unwrap();
        assert_eq!(track.len(), 3);
        assert_eq!(latest.time.timestamp(), 60);
    }

    #[test]
    fn test_window_empty() {
        assert!(select_window(Vec::new(), 24).is_none());
    }

    #[test]
    fn test_duplicate_timestamps_keep_later_sample() {
        let first = obs(60).with(CanonicalVariable::WindSpeed, Some(1.0));
        let second = obs(60).with(CanonicalVariable::WindSpeed, Some(2.0));
        let (track, latest) = select_window(vec![obs(0), first, second], 24).unwrap();

        assert_eq!(track.len(), 2);
        assert_eq!(latest.readings.wind_speed, Some(2.0));
    }

    #[test]
    fn test_decimation_keeps_newest() {
        // ~11 m apart except the last hop of ~1.1 km.
        let track = vec![
            obs(0).at(60.0, 5.0),
            obs(60).at(60.0001, 5.0),
            obs(120).at(60.0002, 5.0),
            obs(180).at(60.0102, 5.0),
        ];
        let kept = decimate_track(track, 100.0);

        let times: Vec<i64> = kept.iter().map(|o| o.time.timestamp()).collect();
        assert_eq!(times, vec![120, 180]);
    }

    #[test]
    fn test_decimation_drops_unpositioned() {
        let kept = decimate_track(vec![obs(0), obs(60).at(1.0, 1.0)], 100.0);
        assert_eq!(kept.len(), 1);
    }
}
