//! Per-station, per-day observation series stored as JSON Lines.

use std::path::Path;

use chrono::NaiveDate;
use tracing::warn;

use obs_common::{Observation, ObsResult};

use crate::publish::{publish_bytes, read_optional};

/// Load a day file. Lines that fail to parse are skipped with a warning.
pub async fn read_day(path: &Path) -> ObsResult<Vec<Observation>> {
    let Some(bytes) = read_optional(path).await? else {
        return Ok(Vec::new());
    };

    let text = String::from_utf8_lossy(&bytes);
    let mut series = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Observation>(line) {
            Ok(obs) => series.push(obs),
            Err(e) => warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %e,
                "Skipping unreadable long-term record"
            ),
        }
    }
    Ok(series)
}

/// Merge `incoming` into a time-ordered series, ignoring timestamps already present.
///
/// Returns the number of observations added.
pub fn merge(
    series: &mut Vec<Observation>,
    incoming: impl IntoIterator<Item = Observation>,
) -> usize {
    let mut added = 0;
    for obs in incoming {
        match series.binary_search_by_key(&obs.time, |o| o.time) {
            Ok(_) => continue,
            Err(pos) => {
                series.insert(pos, obs);
                added += 1;
            }
        }
    }
    added
}

/// Rewrite a day file atomically with the given series.
pub async fn write_day(path: &Path, series: &[Observation]) -> ObsResult<()> {
    let mut buf = Vec::with_capacity(series.len() * 160);
    for obs in series {
        serde_json::to_writer(&mut buf, obs)
            .map_err(|e| obs_common::ObsError::write_failure(path, e))?;
        buf.push(b'\n');
    }
    publish_bytes(path, &buf).await
}

/// Calendar day (UTC) a long-term record belongs to.
pub fn day_of(obs: &Observation) -> NaiveDate {
    obs.time.date_naive()
}
