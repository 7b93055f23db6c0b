//! Time handling utilities: date-templated URLs and hour-boundary arithmetic.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::{ObsError, ObsResult};

/// The pair of dates a templated source is tried against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateDates {
    pub today: NaiveDate,
    pub yesterday: NaiveDate,
}

impl TemplateDates {
    /// Dates for the given instant, in UTC.
    pub fn for_instant(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self {
            today,
            yesterday: today - Duration::days(1),
        }
    }
}

/// Render a strftime-style template for a calendar date.
///
/// Time-of-day directives render as midnight. Use `%%` for a literal percent.
pub fn render_template(template: &str, date: NaiveDate) -> ObsResult<String> {
    let items: Vec<Item> = StrftimeItems::new(template).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ObsError::Config(format!(
            "invalid date directive in template '{}'",
            template
        )));
    }

    let midnight = date.and_time(chrono::NaiveTime::MIN);
    let mut out = String::with_capacity(template.len() + 8);
    write!(out, "{}", midnight.format_with_items(items.into_iter())).map_err(|_| {
        ObsError::Config(format!("template '{}' could not be rendered", template))
    })?;
    Ok(out)
}

/// Number of whole-hour boundaries between two instants.
///
/// Returns 0 when there is no previous instant or when time went backwards.
pub fn hour_boundaries_crossed(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u32 {
    let Some(previous) = previous else {
        return 0;
    };
    let prev_hour = previous.timestamp().div_euclid(3600);
    let now_hour = now.timestamp().div_euclid(3600);
    u32::try_from(now_hour - prev_hour).unwrap_or(0)
}
