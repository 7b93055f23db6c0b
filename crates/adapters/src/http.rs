//! Shared HTTP client and response classification.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use obs_common::{ObsError, ObsResult};

/// Build the client shared by every HTTP-backed adapter.
pub fn build_client(timeout: Duration) -> ObsResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("station-ingester/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ObsError::Config(format!("failed to create HTTP client: {}", e)))
}

/// Map a transport-level failure. Every such failure is treated as transient.
pub fn request_error(station_id: &str, err: reqwest::Error) -> ObsError {
    let reason = if err.is_timeout() {
        format!("request timed out: {}", err)
    } else {
        err.to_string()
    };
    ObsError::source_unavailable(station_id, reason)
}

/// Classify a provider response by status code.
///
/// Missing resources and server-side failures are `SourceUnavailable`;
/// rejected credentials are configuration errors; anything else that is not
/// a success means the provider's interface no longer matches.
pub fn check_status(station_id: &str, response: Response) -> ObsResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let reason = format!("{} returned {}", response.url(), status);
    Err(match status {
        StatusCode::NOT_FOUND
        | StatusCode::GONE
        | StatusCode::PRECONDITION_FAILED
        | StatusCode::TOO_MANY_REQUESTS => ObsError::source_unavailable(station_id, reason),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ObsError::Config(format!("credentials rejected for '{}': {}", station_id, reason))
        }
        s if s.is_server_error() => ObsError::source_unavailable(station_id, reason),
        _ => ObsError::malformed(station_id, reason),
    })
}

/// Fetch a URL and return its body, classifying failures.
pub async fn get_bytes(client: &Client, station_id: &str, url: &str) -> ObsResult<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| request_error(station_id, e))?;
    let response = check_status(station_id, response)?;
    let body = response
        .bytes()
        .await
        .map_err(|e| request_error(station_id, e))?;
    Ok(body.to_vec())
}
