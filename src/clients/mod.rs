//! HTTP-backed implementations of the external collaborators.

pub mod classifier;
pub mod embedding;
pub mod geocoder;

use crate::error::AppError;
use std::time::Duration;

const USER_AGENT: &str = concat!("photo-indexer/", env!("CARGO_PKG_VERSION"));

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, AppError> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()?)
}

/// Parse and sanity-check a configured endpoint.
fn endpoint(raw: &str) -> Result<url::Url, AppError> {
    let url = url::Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AppError::InvalidInput(format!(
            "unsupported endpoint scheme '{}' in {}",
            other, raw
        ))),
    }
}

/// Turn a non-2xx response into an `External` error carrying the body.
async fn ensure_success(service: &str, response: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::External(format!("{} returned {}: {}", service, status, body)))
}
