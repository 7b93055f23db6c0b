//! Date-templated source resolution with a one-day fallback.

use std::future::Future;

use chrono::{DateTime, Utc};
use tracing::debug;

use obs_common::{render_template, ObsError, ObsResult, TemplateDates};

/// Render `template` for today and run `attempt` against it; if that fails
/// with `SourceUnavailable`, retry once with yesterday's rendering.
///
/// Providers often roll their daily file some time after midnight, so the
/// fallback is expected near day boundaries. Other errors are returned as-is.
/// When the template has no date directives both renderings are identical and
/// the retry is skipped.
pub async fn resolve_with_fallback<T, F, Fut>(
    station_id: &str,
    template: &str,
    now: DateTime<Utc>,
    mut attempt: F,
) -> ObsResult<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ObsResult<T>>,
{
    let dates = TemplateDates::for_instant(now);
    let today_url = render_template(template, dates.today)?;

    let first_err = match attempt(today_url.clone()).await {
        Ok(value) => return Ok(value),
        Err(e) if e.is_source_unavailable() => e,
        Err(e) => return Err(e),
    };

    let yesterday_url = render_template(template, dates.yesterday)?;
    if yesterday_url == today_url {
        return Err(first_err);
    }

    debug!(
        station = %station_id,
        url = %yesterday_url,
        error = %first_err,
        "Today's feed unavailable, trying previous day"
    );

    attempt(yesterday_url).await.map_err(|e| match e {
        ObsError::SourceUnavailable { reason, .. } => ObsError::source_unavailable(
            station_id,
            format!(
                "no feed for {} or {}: {}",
                dates.today, dates.yesterday, reason
            ),
        ),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 0, 10, 0).unwrap()
    }

    #[tokio::test]
    async fn test_uses_today_when_available() {
        let tried = Mutex::new(Vec::new());
        let result = resolve_with_fallback("s", "feed_%Y%m%d.nc", now(), |url| {
            tried.lock().unwrap().push(url.clone());
            async move { Ok::<_, ObsError>(url) }
        })
        .await
        .unwrap();

        assert_eq!(result, "feed_20240502.nc");
        assert_eq!(tried.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_yesterday() {
        let result = resolve_with_fallback("s", "feed_%Y%m%d.nc", now(), |url| async move {
            if url.ends_with("20240501.nc") {
                Ok(url)
            } else {
                Err(ObsError::source_unavailable("s", "404"))
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "feed_20240501.nc");
    }

    #[tokio::test]
    async fn test_both_dates_missing() {
        let err = resolve_with_fallback("s", "feed_%Y%m%d.nc", now(), |_url| async move {
            Err::<(), _>(ObsError::source_unavailable("s", "404"))
        })
        .await
        .unwrap_err();

        assert!(err.is_source_unavailable());
        assert!(err.to_string().contains("2024-05-01"), "got: {}", err);
    }

    #[tokio::test]
    async fn test_malformed_does_not_fall_back() {
        let calls = Mutex::new(0);
        let err = resolve_with_fallback("s", "feed_%Y%m%d.nc", now(), |_url| {
            *calls.lock().unwrap() += 1;
            async move { Err::<(), _>(ObsError::malformed("s", "bad header")) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ObsError::MalformedFeed { .. }));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_static_template_is_tried_once() {
        let calls = Mutex::new(0);
        let _ = resolve_with_fallback("s", "https://api.example.org/live", now(), |_url| {
            *calls.lock().unwrap() += 1;
            async move { Err::<(), _>(ObsError::source_unavailable("s", "503")) }
        })
        .await;

        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
