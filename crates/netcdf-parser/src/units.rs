//! CF-convention time axis units (`<unit> since <epoch>`).

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{NetCdfError, NetCdfResult};

/// Parsed `units` attribute of a time coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    /// Length of one unit in seconds.
    pub seconds_per_unit: f64,
    pub epoch: DateTime<Utc>,
}

impl Default for TimeUnits {
    /// UNIX seconds, assumed when a feed omits the attribute.
    fn default() -> Self {
        Self {
            seconds_per_unit: 1.0,
            epoch: DateTime::<Utc>::default(),
        }
    }
}

impl TimeUnits {
    /// Parse strings like `seconds since 1970-01-01T00:00:00Z` or
    /// `days since 1950-01-01`.
    pub fn parse(units: &str) -> NetCdfResult<Self> {
        let (unit, epoch) = units
            .split_once(" since ")
            .ok_or_else(|| NetCdfError::InvalidFormat(format!("time units '{}'", units)))?;

        let seconds_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
            "second" | "seconds" | "sec" | "secs" | "s" => 1.0,
            "minute" | "minutes" | "min" | "mins" => 60.0,
            "hour" | "hours" | "hr" | "hrs" | "h" => 3600.0,
            "day" | "days" | "d" => 86400.0,
            other => {
                return Err(NetCdfError::InvalidFormat(format!(
                    "unsupported time unit '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            seconds_per_unit,
            epoch: parse_epoch(epoch.trim())?,
        })
    }

    /// Convert a raw axis value to an instant. Non-finite values yield `None`.
    pub fn to_datetime(&self, value: f64) -> Option<DateTime<Utc>> {
        if !value.is_finite() {
            return None;
        }
        let millis = (value * self.seconds_per_unit * 1000.0).round();
        if millis.abs() > i64::MAX as f64 {
            return None;
        }
        self.epoch.checked_add_signed(Duration::milliseconds(millis as i64))
    }
}

fn parse_epoch(s: &str) -> NetCdfResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let trimmed = s.trim_end_matches(" UTC").trim_end_matches('Z');
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(|d| Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN)))
        .map_err(|_| NetCdfError::InvalidFormat(format!("time epoch '{}'", s)))
}
